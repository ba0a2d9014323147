//! End-to-end registration and attendance runs with a scripted extractor.

use chrono::NaiveTime;
use image::{Rgb, RgbImage};
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{DetectedFace, Embedding, EmbeddingExtractor, ExtractError, FaceRegion, Thresholds};
use rollcall_engine::{
    open_identity_store, AttendanceStatus, CsvStore, Engine, Error, MemoryLog, MemoryStore, Registry,
};
use std::collections::VecDeque;
use std::path::Path;

/// Replays queued detection results. The embeddings of the latest
/// detection are handed back, in order, by the following `embed` calls.
#[derive(Default)]
struct ScriptedExtractor {
    detections: VecDeque<Result<Vec<DetectedFace>, ExtractError>>,
    crops: VecDeque<Embedding>,
}

impl ScriptedExtractor {
    fn then_faces(mut self, faces: Vec<DetectedFace>) -> Self {
        self.detections.push_back(Ok(faces));
        self
    }

    fn then_error(mut self, err: ExtractError) -> Self {
        self.detections.push_back(Err(err));
        self
    }
}

impl EmbeddingExtractor for ScriptedExtractor {
    fn detect_and_embed(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let faces = self.detections.pop_front().unwrap_or(Err(ExtractError::NoFace))?;
        self.crops = faces
            .iter()
            .filter(|f| f.confidence > 0.0)
            .map(|f| f.embedding.clone())
            .collect();
        Ok(faces)
    }

    fn embed(&mut self, _crop: &RgbImage) -> Result<Embedding, ExtractError> {
        self.crops.pop_front().ok_or(ExtractError::NoFace)
    }
}

/// Unit vector at `similarity` to `[1, 0]`.
fn at(similarity: f32) -> Embedding {
    Embedding::new(vec![similarity, (1.0 - similarity * similarity).sqrt()])
}

/// Unit vector at `angle_deg` from `[1, 0]`.
fn angle(deg: f32) -> Embedding {
    let r = deg.to_radians();
    Embedding::new(vec![r.cos(), r.sin()])
}

fn face(slot: u32, embedding: Embedding) -> DetectedFace {
    DetectedFace {
        region: FaceRegion { x: slot * 16, y: 8, width: 12, height: 12 },
        confidence: 0.9,
        embedding,
    }
}

fn photo() -> RgbImage {
    RgbImage::from_fn(64, 32, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, 120]))
}

fn nine_am() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}

fn engine(extractor: ScriptedExtractor) -> (Engine<ScriptedExtractor>, MemoryLog) {
    let registry = Registry::open(Box::new(MemoryStore::new()), Thresholds::default());
    let log = MemoryLog::new();
    (Engine::new(registry, Box::new(log.clone()), extractor), log)
}

/// Engine with S1 registered at `[1, 0]`, followed by `attendance` detections.
fn enrolled(attendance: Vec<Vec<DetectedFace>>) -> (Engine<ScriptedExtractor>, MemoryLog) {
    let mut extractor = ScriptedExtractor::default().then_faces(vec![face(0, angle(0.0))]);
    for faces in attendance {
        extractor = extractor.then_faces(faces);
    }
    let (engine, log) = engine(extractor);
    engine.register_image("S1", "Ada", &photo()).unwrap();
    (engine, log)
}

#[test]
fn face_above_threshold_marks_present() {
    let (engine, log) = enrolled(vec![vec![face(0, at(0.70))]]);

    let outcome = engine
        .take_attendance_image("Math", &photo(), "2024-03-01", nine_am(), None)
        .unwrap();

    assert_eq!(outcome.present.iter().collect::<Vec<_>>(), vec!["S1"]);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].identity_id, "S1");
    assert_eq!(outcome.records[0].status, AttendanceStatus::Present);
    assert_eq!(outcome.faces[0].result.label, "Ada (0.70)");
    assert_eq!(outcome.message(), "Attendance recorded for 2024-03-01. 1 students marked as Present.");
    assert_eq!(log.records(), outcome.records);
}

#[test]
fn face_below_threshold_marks_absent() {
    let (engine, log) = enrolled(vec![vec![face(0, at(0.50))]]);

    let outcome = engine
        .take_attendance_image("Math", &photo(), "2024-03-01", nine_am(), None)
        .unwrap();

    assert!(outcome.present.is_empty());
    assert_eq!(outcome.records[0].status, AttendanceStatus::Absent);
    assert!(!outcome.faces[0].result.is_match());
    assert_eq!(
        outcome.message(),
        "Attendance taken. No recognized students were found; all marked absent."
    );
    assert_eq!(log.records().len(), 1);
}

#[test]
fn empty_registry_fails_without_writing() {
    let (engine, log) = engine(ScriptedExtractor::default().then_faces(vec![face(0, at(0.9))]));

    let err = engine
        .take_attendance_image("Math", &photo(), "2024-03-01", nine_am(), None)
        .unwrap_err();

    assert!(matches!(err, Error::EmptyRegistry));
    assert!(log.records().is_empty());
}

#[test]
fn no_faces_marks_everyone_absent() {
    let (engine, log) = enrolled(vec![]);
    // Scripted extractor reports NoFace once its queue is drained.
    let outcome = engine
        .take_attendance_image("Math", &photo(), "2024-03-01", nine_am(), None)
        .unwrap();

    assert!(outcome.no_faces);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].status, AttendanceStatus::Absent);
    assert_eq!(outcome.message(), "No faces were detected in the image. All students marked absent.");
    assert_eq!(log.records().len(), 1);
}

#[test]
fn record_count_matches_roster_for_any_face_count() {
    let mut extractor = ScriptedExtractor::default()
        .then_faces(vec![face(0, angle(0.0))])
        .then_faces(vec![face(0, angle(90.0))])
        .then_faces(vec![face(0, angle(180.0))]);
    for faces in [
        vec![],
        vec![face(0, angle(2.0))],
        vec![face(0, angle(2.0)), face(1, angle(88.0)), face(2, angle(45.0))],
    ] {
        extractor = extractor.then_faces(faces);
    }
    let (engine, _log) = engine(extractor);
    engine.register_image("S1", "Ada", &photo()).unwrap();
    engine.register_image("S2", "Grace", &photo()).unwrap();
    engine.register_image("S3", "Edsger", &photo()).unwrap();

    let mut present_counts = Vec::new();
    for _ in 0..3 {
        let outcome = engine
            .take_attendance_image("CS", &photo(), "2024-03-01", nine_am(), None)
            .unwrap();
        assert_eq!(outcome.records.len(), 3);
        present_counts.push(outcome.present.len());
    }
    assert_eq!(present_counts, vec![0, 1, 2]);
}

#[test]
fn two_faces_at_registration_is_ambiguous() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("registered_students.csv");
    let registry = Registry::open(Box::new(CsvStore::new(&store_path)), Thresholds::default());
    let extractor = ScriptedExtractor::default().then_faces(vec![face(0, angle(0.0)), face(1, angle(90.0))]);
    let engine = Engine::new(registry, Box::new(MemoryLog::new()), extractor);

    let err = engine.register_image("S1", "Ada", &photo()).unwrap_err();

    assert!(matches!(err, Error::AmbiguousInput(2)));
    assert!(engine.registry().is_empty());
    assert!(!store_path.exists());
}

#[test]
fn identifier_with_space_is_rejected() {
    let (engine, _log) = engine(ScriptedExtractor::default().then_faces(vec![face(0, angle(0.0))]));
    let err = engine.register_image("stu 1", "Ada", &photo()).unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));
    assert_eq!(err.kind(), "invalid_identifier");
}

#[test]
fn second_registration_of_same_id_fails() {
    let (engine, _log) = enrolled(vec![vec![face(0, angle(90.0))]]);
    let err = engine.register_image("S1", "Ada", &photo()).unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(_)));
    assert_eq!(engine.list().len(), 1);
}

#[test]
fn no_face_at_registration() {
    let extractor = ScriptedExtractor::default()
        .then_error(ExtractError::NoFace)
        .then_faces(vec![DetectedFace { confidence: 0.0, ..face(0, angle(0.0)) }]);
    let (engine, _log) = engine(extractor);

    for _ in 0..2 {
        let err = engine.register_image("S1", "Ada", &photo()).unwrap_err();
        assert!(matches!(err, Error::NoFaceDetected));
    }
    assert!(engine.registry().is_empty());
}

#[test]
fn duplicate_face_names_existing_student() {
    // cos(20°) ≈ 0.94
    let (engine, _log) = enrolled(vec![]);
    let engine = {
        let registry = Registry::open(
            Box::new(MemoryStore::with_identities(engine.registry().roster())),
            Thresholds::default(),
        );
        let extractor = ScriptedExtractor::default().then_faces(vec![face(0, angle(20.0))]);
        Engine::new(registry, Box::new(MemoryLog::new()), extractor)
    };

    let err = engine.register_image("S2", "Imposter", &photo()).unwrap_err();

    assert!(matches!(err, Error::DuplicateFace { ref id, .. } if id == "S1"));
    assert!(err.to_string().starts_with("Face already registered as Student ID: S1, Name: Ada (Similarity: 93.97%)"));
    assert_eq!(engine.list().len(), 1);
}

#[test]
fn matching_is_deterministic() {
    let (engine, _log) = enrolled(vec![vec![face(0, at(0.75))]; 5]);
    let mut seen = Vec::new();
    for _ in 0..5 {
        let outcome = engine
            .take_attendance_image("Math", &photo(), "2024-03-01", nine_am(), None)
            .unwrap();
        seen.push(outcome.faces[0].result.matched_identity_id.clone());
    }
    assert!(seen.iter().all(|id| id.as_deref() == Some("S1")));
}

#[test]
fn invalid_date_writes_nothing() {
    let (engine, log) = enrolled(vec![vec![face(0, at(0.9))]]);
    let err = engine
        .take_attendance_image("Math", &photo(), "03/01/2024", nine_am(), None)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidDate(_)));
    assert!(log.records().is_empty());
}

#[test]
fn extractor_failure_is_unexpected() {
    let (engine, log) = enrolled(vec![]);
    let engine = {
        let registry = Registry::open(
            Box::new(MemoryStore::with_identities(engine.registry().roster())),
            Thresholds::default(),
        );
        let extractor =
            ScriptedExtractor::default().then_error(ExtractError::Recognizer(RecognizerError::EmptyCrop));
        Engine::new(registry, Box::new(log.clone()), extractor)
    };

    let err = engine
        .take_attendance_image("Math", &photo(), "2024-03-01", nine_am(), None)
        .unwrap_err();
    assert!(matches!(err, Error::Unexpected(_)));
    assert!(log.records().is_empty());
}

#[test]
fn annotated_photo_written_next_to_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("class.png");
    photo().save(&input).unwrap();

    let (engine, _log) = enrolled(vec![vec![face(0, at(0.9)), face(2, at(0.1))]]);
    let outcome = engine.take_attendance("Math", &input, "2024-03-01").unwrap();

    let written = dir.path().join("class_processed.png");
    assert_eq!(outcome.annotated.as_deref(), Some(written.as_path()));
    let annotated = image::open(&written).unwrap().to_rgb8();
    assert_eq!(annotated.dimensions(), (64, 32));
    // Top-left corner of each box: green for the match, red for the unknown.
    assert_eq!(annotated.get_pixel(0, 8), &Rgb([0, 255, 0]));
    assert_eq!(annotated.get_pixel(32, 8), &Rgb([255, 0, 0]));
}

#[test]
fn unreadable_image_is_reported() {
    let (engine, log) = enrolled(vec![]);
    let err = engine
        .take_attendance("Math", Path::new("/nonexistent/class.jpg"), "2024-03-01")
        .unwrap_err();
    assert!(matches!(err, Error::UnreadableImage { .. }));
    assert!(log.records().is_empty());

    let err = engine.register("S9", "Nobody", Path::new("/nonexistent/face.jpg")).unwrap_err();
    assert!(matches!(err, Error::UnreadableImage { .. }));
}

#[test]
fn registrations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("registered_students.csv");
    {
        let registry = Registry::open(Box::new(CsvStore::new(&store_path)), Thresholds::default());
        let extractor = ScriptedExtractor::default()
            .then_faces(vec![face(0, angle(0.0))])
            .then_faces(vec![face(0, angle(90.0))]);
        let engine = Engine::new(registry, Box::new(MemoryLog::new()), extractor);
        engine.register_image("S1", "Ada", &photo()).unwrap();
        engine.register_image("S2", "Grace", &photo()).unwrap();
    }

    let registry = Registry::open(Box::new(CsvStore::new(&store_path)), Thresholds::default());
    assert!(registry.load_error().is_none());
    let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Ada", "Grace"]);
}

#[test]
fn photo_without_faces_is_still_written() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty_room.png");
    photo().save(&input).unwrap();

    let (engine, _log) = enrolled(vec![]);
    let outcome = engine.take_attendance("Math", &input, "2024-03-01").unwrap();

    let written = dir.path().join("empty_room_processed.png");
    assert!(outcome.no_faces);
    assert_eq!(outcome.annotated.as_deref(), Some(written.as_path()));
    assert_eq!(image::open(&written).unwrap().to_rgb8().dimensions(), (64, 32));
}

#[test]
fn corrupt_database_degrades_to_empty_registry() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("faces.db");
    std::fs::write(&store_path, "not a database\n".repeat(512)).unwrap();

    let registry = Registry::open(open_identity_store(&store_path), Thresholds::default());
    assert!(registry.load_error().is_some());
    assert!(registry.is_empty());

    let extractor = ScriptedExtractor::default().then_faces(vec![face(0, angle(0.0))]);
    let log = MemoryLog::new();
    let engine = Engine::new(registry, Box::new(log.clone()), extractor);

    let err = engine
        .take_attendance_image("Math", &photo(), "2024-03-01", nine_am(), None)
        .unwrap_err();
    assert!(matches!(err, Error::EmptyRegistry));

    let err = engine.register_image("S1", "Ada", &photo()).unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(log.records().is_empty());
}
