//! Upload validation and staging
//!
//! Uploaded bytes are checked against an [`UploadPolicy`] before anything is
//! written, then staged in a uniquely named file that is removed when the
//! [`StagedUpload`] goes out of scope.

use std::io::Write;
use std::path::Path;

use image::ImageFormat;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::model::config::{InferenceConfig, DEFAULT_MAX_UPLOAD_BYTES};
use crate::utils::error::{MriError, Result};

/// Formats accepted at the upload boundary
pub const ACCEPTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
];

/// Size and format limits for uploaded images
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub max_bytes: usize,
    pub formats: Vec<ImageFormat>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            formats: ACCEPTED_FORMATS.to_vec(),
        }
    }
}

impl UploadPolicy {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            ..Default::default()
        }
    }

    /// Check `bytes` and return the detected format
    pub fn validate(&self, bytes: &[u8]) -> Result<ImageFormat> {
        if bytes.is_empty() {
            return Err(MriError::EmptyUpload);
        }
        if bytes.len() > self.max_bytes {
            return Err(MriError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let format = image::guess_format(bytes)
            .map_err(|_| MriError::UnsupportedFormat("unrecognized image data".to_string()))?;
        if !self.formats.contains(&format) {
            return Err(MriError::UnsupportedFormat(format!("{:?}", format)));
        }
        Ok(format)
    }
}

/// An uploaded file living in the upload directory until dropped
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
}

impl StagedUpload {
    pub fn write(dir: &Path, bytes: &[u8], format: ImageFormat) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let suffix = format!(
            ".{}",
            format.extensions_str().first().copied().unwrap_or("img")
        );

        let mut file = tempfile::Builder::new()
            .prefix("upload_")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;

        debug!("Staged {} bytes at {}", bytes.len(), file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{encode, synthetic_scan};

    #[test]
    fn test_validate_accepts_supported_formats() {
        let policy = UploadPolicy::default();
        let scan = synthetic_scan(16, 16, false, 1);
        for format in ACCEPTED_FORMATS {
            let bytes = encode(&scan, format);
            assert_eq!(policy.validate(&bytes).unwrap(), format);
        }
    }

    #[test]
    fn test_validate_rejections() {
        let policy = UploadPolicy {
            max_bytes: 64,
            ..Default::default()
        };
        assert!(matches!(policy.validate(&[]), Err(MriError::EmptyUpload)));
        assert!(matches!(
            policy.validate(&[0u8; 65]),
            Err(MriError::TooLarge { size: 65, limit: 64 })
        ));
        assert!(matches!(
            policy.validate(b"definitely not an image"),
            Err(MriError::UnsupportedFormat(_))
        ));

        // GIF is decodable in general but not accepted here
        let gif = b"GIF89a\x01\x00\x01\x00";
        assert!(matches!(
            UploadPolicy::default().validate(gif),
            Err(MriError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_staged_upload_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");

        let staged = StagedUpload::write(&uploads, b"payload", ImageFormat::Png).unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.is_file());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");

        drop(staged);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
    }
}
