//! Review annotation: boxes and labels over each detected face.
//!
//! Green boxes mark recognized faces, red boxes mark unknown ones. Labels
//! need a TrueType font; without one only the boxes are drawn.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rollcall_core::{FaceRegion, MatchResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MATCHED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_SCALE: f32 = 20.0;
const LABEL_GAP: i32 = 10;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("cannot read font {path}: {source}")]
    FontIo {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid font file: {0}")]
    InvalidFont(String),
    #[error("cannot write annotated image: {0}")]
    Save(#[from] image::ImageError),
}

/// Draws match results onto a photo for human review.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Annotator that draws boxes only.
    pub fn boxes_only() -> Self {
        Self { font: None }
    }

    /// Annotator that also renders labels with the given TrueType/OpenType font.
    pub fn with_font_file(path: &Path) -> Result<Self, AnnotateError> {
        let data = std::fs::read(path).map_err(|source| AnnotateError::FontIo {
            path: path.display().to_string(),
            source,
        })?;
        let font = FontVec::try_from_vec(data).map_err(|e| AnnotateError::InvalidFont(e.to_string()))?;
        Ok(Self { font: Some(font) })
    }

    pub fn draws_labels(&self) -> bool {
        self.font.is_some()
    }

    /// Draw one 2px box per face, plus its label when a font is loaded.
    pub fn annotate<'a>(
        &self,
        image: &mut RgbImage,
        faces: impl IntoIterator<Item = (&'a FaceRegion, &'a MatchResult)>,
    ) {
        for (region, result) in faces {
            if region.width == 0 || region.height == 0 {
                continue;
            }
            let color = if result.is_match() { MATCHED_COLOR } else { UNKNOWN_COLOR };
            let (x, y) = (region.x as i32, region.y as i32);

            draw_hollow_rect_mut(image, Rect::at(x, y).of_size(region.width, region.height), color);
            if region.width > 2 && region.height > 2 {
                let inner = Rect::at(x + 1, y + 1).of_size(region.width - 2, region.height - 2);
                draw_hollow_rect_mut(image, inner, color);
            }

            if let Some(font) = &self.font {
                let text_y = y - LABEL_GAP - LABEL_SCALE as i32;
                draw_text_mut(image, color, x, text_y, PxScale::from(LABEL_SCALE), font, &result.label);
            }
        }
    }

    /// Write the annotated image; the format follows the path's extension.
    pub fn save(image: &RgbImage, path: &Path) -> Result<(), AnnotateError> {
        image.save(path)?;
        Ok(())
    }
}

/// `<dir>/<stem>_processed.<ext>` next to the input photo.
pub fn processed_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{stem}_processed.{}", ext.to_string_lossy()),
        None => format!("{stem}_processed"),
    };
    input.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Embedding, Identity};

    fn matched() -> MatchResult {
        let identity = Identity {
            id: "S1".into(),
            display_name: "Ada".into(),
            embedding: Embedding::new(vec![1.0]),
        };
        MatchResult::matched(&identity, 0.9)
    }

    #[test]
    fn test_boxes_drawn_in_status_colors() {
        let mut image = RgbImage::new(100, 100);
        let hit = matched();
        let miss = MatchResult::unknown(0.3);
        let a = FaceRegion { x: 10, y: 10, width: 20, height: 20 };
        let b = FaceRegion { x: 60, y: 60, width: 20, height: 20 };

        Annotator::boxes_only().annotate(&mut image, [(&a, &hit), (&b, &miss)]);

        assert_eq!(image.get_pixel(10, 10), &MATCHED_COLOR);
        assert_eq!(image.get_pixel(11, 15), &MATCHED_COLOR);
        assert_eq!(image.get_pixel(20, 20), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(79, 79), &UNKNOWN_COLOR);
    }

    #[test]
    fn test_box_at_image_edge_is_clipped() {
        let mut image = RgbImage::new(40, 40);
        let region = FaceRegion { x: 30, y: 30, width: 10, height: 10 };
        let miss = MatchResult::unknown(0.0);
        Annotator::boxes_only().annotate(&mut image, [(&region, &miss)]);
        assert_eq!(image.get_pixel(39, 39), &UNKNOWN_COLOR);
    }

    #[test]
    fn test_missing_font_file() {
        let err = Annotator::with_font_file(Path::new("/nonexistent/font.ttf")).err().unwrap();
        assert!(matches!(err, AnnotateError::FontIo { .. }));
    }

    #[test]
    fn test_garbage_font_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        let err = Annotator::with_font_file(&path).err().unwrap();
        assert!(matches!(err, AnnotateError::InvalidFont(_)));
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("class_processed.png");
        let image = RgbImage::from_pixel(8, 8, MATCHED_COLOR);
        Annotator::save(&image, &path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.get_pixel(3, 3), &MATCHED_COLOR);
    }

    #[test]
    fn test_processed_path() {
        assert_eq!(
            processed_path(Path::new("/photos/class1.jpg")),
            PathBuf::from("/photos/class1_processed.jpg")
        );
        assert_eq!(processed_path(Path::new("scan")), PathBuf::from("scan_processed"));
    }
}
