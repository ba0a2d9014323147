//! Registration and attendance pipelines.
//!
//! Each call is an independent transaction over shared, lock-protected
//! state: the registry, the attendance ledger and the extractor.

use chrono::{Local, NaiveDate, NaiveTime};
use image::RgbImage;
use rollcall_core::{DetectedFace, EmbeddingExtractor, Identity, IdentitySummary};
use rollcall_imaging::{processed_path, Annotator, Conditioner};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{parse_session_date, AttendanceLog, AttendanceRecord, CsvLog, Ledger};
use crate::matching::{FaceMatch, MatchingEngine};
use crate::registry::{validate_identifier, Registry};
use crate::store::open_identity_store;

/// Result of one attendance call.
#[derive(Debug, Clone)]
pub struct AttendanceOutcome {
    pub date: NaiveDate,
    /// One record per registered identity.
    pub records: Vec<AttendanceRecord>,
    pub present: BTreeSet<String>,
    pub faces: Vec<FaceMatch>,
    /// Where the annotated photo was written, if it was.
    pub annotated: Option<PathBuf>,
    /// Detection found nothing; everyone was marked absent.
    pub no_faces: bool,
}

impl AttendanceOutcome {
    pub fn message(&self) -> String {
        if self.no_faces {
            "No faces were detected in the image. All students marked absent.".to_string()
        } else if self.present.is_empty() {
            "Attendance taken. No recognized students were found; all marked absent.".to_string()
        } else {
            format!(
                "Attendance recorded for {}. {} students marked as Present.",
                self.date.format(crate::ledger::DATE_FORMAT),
                self.present.len()
            )
        }
    }
}

/// Registry, ledger and extractor wired together.
pub struct Engine<E: EmbeddingExtractor> {
    registry: Registry,
    ledger: Ledger,
    extractor: Mutex<E>,
    matching: MatchingEngine,
    conditioner: Conditioner,
    annotator: Annotator,
}

impl<E: EmbeddingExtractor> Engine<E> {
    /// Engine with default conditioning and box-only annotation.
    pub fn new(registry: Registry, log: Box<dyn AttendanceLog>, extractor: E) -> Self {
        let matching = MatchingEngine::new(registry.thresholds().matching);
        Self {
            registry,
            ledger: Ledger::new(log),
            extractor: Mutex::new(extractor),
            matching,
            conditioner: Conditioner::default(),
            annotator: Annotator::boxes_only(),
        }
    }

    /// Open the configured store and log around `extractor`.
    ///
    /// A label font that cannot be loaded is logged and annotation falls
    /// back to boxes only.
    pub fn from_config(config: &Config, extractor: E) -> Self {
        let store = open_identity_store(&config.store_path);
        let registry = Registry::open(store, config.thresholds());
        let log = Box::new(CsvLog::new(&config.attendance_log));

        let annotator = match &config.label_font {
            Some(path) => Annotator::with_font_file(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "label font unavailable; drawing boxes only");
                Annotator::boxes_only()
            }),
            None => Annotator::boxes_only(),
        };

        Self::new(registry, log, extractor)
            .with_conditioner(config.conditioner())
            .with_annotator(annotator)
    }

    pub fn with_conditioner(mut self, conditioner: Conditioner) -> Self {
        self.conditioner = conditioner;
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registered students as `{id, name}`, in registration order.
    pub fn list(&self) -> Vec<IdentitySummary> {
        self.registry.list()
    }

    /// Register a student from a photo on disk.
    pub fn register(&self, id: &str, name: &str, image_path: &Path) -> Result<Identity> {
        self.check_new_identifier(id)?;
        let image = load_image(image_path)?;
        self.register_image(id, name, &image)
    }

    /// Register a student from a photo holding exactly one face.
    ///
    /// The photo is used as-is; registration does not condition it.
    pub fn register_image(&self, id: &str, name: &str, image: &RgbImage) -> Result<Identity> {
        self.check_new_identifier(id)?;

        tracing::debug!(stage = "detecting", id, "registration");
        let mut faces = detect(&mut *self.extractor(), image)?;
        faces.retain(|f| f.confidence > 0.0);

        let face = match faces.len() {
            0 => return Err(Error::NoFaceDetected),
            1 => faces.remove(0),
            n => return Err(Error::AmbiguousInput(n)),
        };

        self.registry.register(id, name, face.embedding)
    }

    /// Take attendance from a photo on disk, for the current time of day.
    ///
    /// The annotated photo is written next to the input as
    /// `<stem>_processed.<ext>`.
    pub fn take_attendance(&self, subject: &str, image_path: &Path, date: &str) -> Result<AttendanceOutcome> {
        if self.registry.is_empty() {
            return Err(Error::EmptyRegistry);
        }
        let image = load_image(image_path)?;
        let output = processed_path(image_path);
        self.take_attendance_image(subject, &image, date, Local::now().time(), Some(&output))
    }

    /// Match every face in `image` and record a full-roster session.
    ///
    /// No faces is not an error: every student is recorded absent.
    pub fn take_attendance_image(
        &self,
        subject: &str,
        image: &RgbImage,
        date: &str,
        time: NaiveTime,
        annotate_to: Option<&Path>,
    ) -> Result<AttendanceOutcome> {
        // One snapshot feeds both matching and the ledger.
        let roster = self.registry.roster();
        if roster.is_empty() {
            return Err(Error::EmptyRegistry);
        }
        let session_date = parse_session_date(date)?;

        tracing::debug!(stage = "conditioning", subject, "attendance");
        let mut conditioned = self.conditioner.apply(image);

        let session = {
            let mut extractor = self.extractor();
            tracing::debug!(stage = "detecting", subject, "attendance");
            let detected = detect(&mut *extractor, &conditioned)?;
            tracing::debug!(stage = "matching", subject, faces = detected.len(), "attendance");
            self.matching.match_faces(&mut *extractor, &conditioned, &detected, &roster)?
        };
        let no_faces = session.faces.is_empty();

        let annotated = match annotate_to {
            Some(path) => {
                tracing::debug!(stage = "annotating", subject, "attendance");
                self.annotator
                    .annotate(&mut conditioned, session.faces.iter().map(|f| (&f.region, &f.result)));
                match Annotator::save(&conditioned, path) {
                    Ok(()) => Some(path.to_path_buf()),
                    Err(e) => {
                        tracing::warn!(error = %e, path = %path.display(), "could not write annotated image");
                        None
                    }
                }
            }
            None => None,
        };

        tracing::debug!(stage = "ledger_writing", subject, "attendance");
        let records = self
            .ledger
            .record_session(&roster, subject, &session.present, date, time)?;

        Ok(AttendanceOutcome {
            date: session_date,
            records,
            present: session.present,
            faces: session.faces,
            annotated,
            no_faces,
        })
    }

    fn check_new_identifier(&self, id: &str) -> Result<()> {
        validate_identifier(id)?;
        if self.registry.contains(id) {
            return Err(Error::AlreadyRegistered(id.to_string()));
        }
        Ok(())
    }

    fn extractor(&self) -> MutexGuard<'_, E> {
        self.extractor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run detection, folding "no face" into an empty list.
fn detect<E: EmbeddingExtractor + ?Sized>(extractor: &mut E, image: &RgbImage) -> Result<Vec<DetectedFace>> {
    match extractor.detect_and_embed(image) {
        Ok(faces) => Ok(faces),
        Err(e) if e.is_no_face() => Ok(Vec::new()),
        Err(e) => Err(Error::Unexpected(e.to_string())),
    }
}

fn load_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|e| Error::UnreadableImage {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_messages() {
        let mut outcome = AttendanceOutcome {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            records: Vec::new(),
            present: BTreeSet::new(),
            faces: Vec::new(),
            annotated: None,
            no_faces: true,
        };
        assert_eq!(outcome.message(), "No faces were detected in the image. All students marked absent.");

        outcome.no_faces = false;
        assert_eq!(
            outcome.message(),
            "Attendance taken. No recognized students were found; all marked absent."
        );

        outcome.present = ["S1".to_string(), "S2".to_string()].into_iter().collect();
        assert_eq!(outcome.message(), "Attendance recorded for 2024-03-01. 2 students marked as Present.");
    }

    #[test]
    fn test_load_image_reports_path() {
        let err = load_image(Path::new("/nonexistent/photo.jpg")).unwrap_err();
        match err {
            Error::UnreadableImage { path, .. } => assert_eq!(path, "/nonexistent/photo.jpg"),
            other => panic!("expected UnreadableImage, got {other:?}"),
        }
    }
}
