//! Image dimensions, read from the header by the `image` crate.

use super::{ExtractedMetadata, ExtractionFailure, Extractor, ModuleInfo};
use crate::types::Term;
use crate::vocab::{GRAPH_PICTURES, NFO_HEIGHT, NFO_IMAGE, NFO_WIDTH};
use image::{ImageError, ImageFormat, ImageReader};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageExtractor;

impl Extractor for ImageExtractor {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "image",
            version: 2,
            graph: GRAPH_PICTURES,
            mime_types: &["image/png", "image/gif", "image/jpeg", "image/webp"],
        }
    }

    fn extract(&self, path: &Path, mime: &str) -> Result<ExtractedMetadata, ExtractionFailure> {
        let mut reader = ImageReader::open(path)?.with_guessed_format()?;
        if reader.format().is_none() {
            // Content sniffing failed; let the decoder for the claimed type reject it.
            match ImageFormat::from_mime_type(mime) {
                Some(format) => reader.set_format(format),
                None => return Err(ExtractionFailure::Unsupported(mime.to_string())),
            }
        }
        let (width, height) = reader.into_dimensions().map_err(image_failure)?;

        let mut metadata = ExtractedMetadata::of_types(&[NFO_IMAGE]);
        metadata.set(NFO_WIDTH, Term::Integer(i64::from(width)));
        metadata.set(NFO_HEIGHT, Term::Integer(i64::from(height)));
        Ok(metadata)
    }
}

fn image_failure(e: ImageError) -> ExtractionFailure {
    match e {
        ImageError::IoError(io) => io.into(),
        other => ExtractionFailure::Malformed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn dimensions(name: &str, mime: &str, width: u32, height: u32) -> (Term, Term) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(name);
        RgbImage::from_pixel(width, height, Rgb([200, 40, 40]))
            .save(&path)
            .expect("encode");

        let meta = ImageExtractor.extract(&path, mime).expect("extract");
        assert!(meta.types.iter().any(|t| t.as_str() == NFO_IMAGE));
        (
            meta.get(NFO_WIDTH).cloned().expect("width"),
            meta.get(NFO_HEIGHT).cloned().expect("height"),
        )
    }

    #[test]
    fn png_dimensions() {
        assert_eq!(
            dimensions("a.png", "image/png", 64, 48),
            (Term::Integer(64), Term::Integer(48))
        );
    }

    #[test]
    fn gif_dimensions() {
        assert_eq!(
            dimensions("a.gif", "image/gif", 16, 32),
            (Term::Integer(16), Term::Integer(32))
        );
    }

    #[test]
    fn jpeg_dimensions() {
        assert_eq!(
            dimensions("photo.jpg", "image/jpeg", 40, 30),
            (Term::Integer(40), Term::Integer(30))
        );
    }

    #[test]
    fn webp_dimensions() {
        assert_eq!(
            dimensions("photo.webp", "image/webp", 20, 10),
            (Term::Integer(20), Term::Integer(10))
        );
    }

    #[test]
    fn photo_types_have_a_module() {
        let modules = crate::extract::ModuleManager::builtin();
        for mime in ["image/jpeg", "image/webp"] {
            assert_eq!(modules.for_mime(mime).map(|m| m.info().name), Some("image"));
        }
    }

    #[test]
    fn wrong_signature_is_malformed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake.png");
        std::fs::write(&path, b"definitely not an image at all").expect("write");

        assert!(matches!(
            ImageExtractor.extract(&path, "image/png"),
            Err(ExtractionFailure::Malformed(_))
        ));
    }
}
