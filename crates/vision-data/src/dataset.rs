//! In-memory dataset container and error taxonomy.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating or decoding dataset files.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("dataset file not found: {0}")]
    MissingFile(PathBuf),
    #[error("{path}: invalid magic: expected {expected:#06x}, got {got:#06x}")]
    InvalidMagic {
        path: PathBuf,
        expected: u32,
        got: u32,
    },
    #[error("{path}: file length {len} is not a multiple of the {record} byte record size")]
    TruncatedRecords {
        path: PathBuf,
        len: usize,
        record: usize,
    },
    #[error("count mismatch: {images} images vs {labels} labels")]
    CountMismatch { images: usize, labels: usize },
    #[error("label {label} out of range for {classes} classes")]
    LabelOutOfRange { label: u8, classes: usize },
}

/// Which split of a dataset to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// A fully materialized image-classification dataset.
///
/// Images are stored as contiguous `u8` buffers in `[C, H, W]` layout.
#[derive(Debug)]
pub struct VisionDataset {
    images: Vec<Vec<u8>>,
    labels: Vec<u8>,
    channels: usize,
    height: usize,
    width: usize,
    classes: usize,
}

impl VisionDataset {
    pub fn new(
        images: Vec<Vec<u8>>,
        labels: Vec<u8>,
        channels: usize,
        height: usize,
        width: usize,
        classes: usize,
    ) -> Result<Self, DatasetError> {
        if images.len() != labels.len() {
            return Err(DatasetError::CountMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        if let Some(&label) = labels.iter().find(|&&label| label as usize >= classes) {
            return Err(DatasetError::LabelOutOfRange { label, classes });
        }
        Ok(Self {
            images,
            labels,
            channels,
            height,
            width,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// `[C, H, W]` shape of each image.
    pub fn image_shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn image(&self, index: usize) -> &[u8] {
        &self.images[index]
    }

    pub fn label(&self, index: usize) -> u8 {
        self.labels[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_checks_labels_against_class_count() {
        let images = vec![vec![0u8; 4]; 2];
        assert!(VisionDataset::new(images.clone(), vec![0, 9], 1, 2, 2, 10).is_ok());
        let err = VisionDataset::new(images.clone(), vec![0, 10], 1, 2, 2, 10).unwrap_err();
        assert!(matches!(err, DatasetError::LabelOutOfRange { .. }));
        let err = VisionDataset::new(images, vec![0], 1, 2, 2, 10).unwrap_err();
        assert!(matches!(err, DatasetError::CountMismatch { .. }));
    }
}
