//! Image preprocessing and resource reclamation capabilities

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

use crate::{Error, Result};

/// Image data ready to hand to the engine.
///
/// A temporary file created during preprocessing is deleted when the value
/// is dropped, so an attempt releases its artifacts simply by letting its
/// `PreparedImage` go out of scope.
#[derive(Debug)]
pub enum PreparedImage {
    /// The source image already satisfied the constraints
    Original(PathBuf),
    /// A converted copy owned by this value
    Temporary(TempPath),
}

impl PreparedImage {
    pub fn path(&self) -> &Path {
        match self {
            PreparedImage::Original(path) => path.as_path(),
            PreparedImage::Temporary(temp) => &**temp,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, PreparedImage::Temporary(_))
    }
}

/// Trait for turning a source image into one that fits a dimension budget
#[async_trait]
pub trait ImagePreprocessor: Send + Sync {
    /// Return image data whose longer side is at most `max_dimension`
    async fn prepare(&self, image: &Path, max_dimension: u32) -> Result<PreparedImage>;
}

/// Preprocessor for engines that size images themselves
#[derive(Debug, Clone, Default)]
pub struct PassthroughPreprocessor;

#[async_trait]
impl ImagePreprocessor for PassthroughPreprocessor {
    async fn prepare(&self, image: &Path, _max_dimension: u32) -> Result<PreparedImage> {
        if !image.exists() {
            return Err(Error::Preprocess(format!(
                "Image file not found: {}",
                image.display()
            )));
        }
        Ok(PreparedImage::Original(image.to_path_buf()))
    }
}

/// Hook for releasing cached accelerator memory before a degraded retry
pub trait ResourceReclaimer: Send + Sync {
    fn clear_resources(&self);
}

/// Reclaimer for engines that manage their own memory
#[derive(Debug, Clone, Default)]
pub struct NoopReclaimer;

impl ResourceReclaimer for NoopReclaimer {
    fn clear_resources(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_keeps_original_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let prepared = PassthroughPreprocessor
            .prepare(file.path(), 512)
            .await
            .unwrap();
        assert_eq!(prepared.path(), file.path());
        assert!(!prepared.is_temporary());
    }

    #[tokio::test]
    async fn test_passthrough_rejects_missing_file() {
        let result = PassthroughPreprocessor
            .prepare(Path::new("/nonexistent/photo.jpg"), 512)
            .await;
        assert!(matches!(result, Err(Error::Preprocess(_))));
    }

    #[test]
    fn test_temporary_image_removed_on_drop() {
        let temp = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        let path = temp.to_path_buf();
        let prepared = PreparedImage::Temporary(temp);
        assert!(prepared.is_temporary());
        assert!(path.exists());
        drop(prepared);
        assert!(!path.exists());
    }
}
