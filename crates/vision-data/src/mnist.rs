//! MNIST IDX format parser.
//!
//! All header values are big-endian u32:
//!   images: magic(2051) | count | rows | cols | pixels...
//!   labels: magic(2049) | count | labels...

use std::fs;
use std::path::Path;

use crate::dataset::{DatasetError, Split, VisionDataset};

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

fn read_u32(bytes: &[u8], offset: usize, path: &Path) -> Result<u32, DatasetError> {
    let end = offset + 4;
    if bytes.len() < end {
        return Err(DatasetError::TruncatedRecords {
            path: path.to_path_buf(),
            len: bytes.len(),
            record: end,
        });
    }
    Ok(u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]))
}

fn read_images(path: &Path) -> Result<(Vec<Vec<u8>>, usize, usize), DatasetError> {
    if !path.exists() {
        return Err(DatasetError::MissingFile(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    let magic = read_u32(&bytes, 0, path)?;
    if magic != IMAGE_MAGIC {
        return Err(DatasetError::InvalidMagic {
            path: path.to_path_buf(),
            expected: IMAGE_MAGIC,
            got: magic,
        });
    }
    let count = read_u32(&bytes, 4, path)? as usize;
    let rows = read_u32(&bytes, 8, path)? as usize;
    let cols = read_u32(&bytes, 12, path)? as usize;
    let pixels = &bytes[16..];
    if pixels.len() != count * rows * cols {
        return Err(DatasetError::TruncatedRecords {
            path: path.to_path_buf(),
            len: bytes.len(),
            record: rows * cols,
        });
    }
    let images = pixels
        .chunks_exact(rows * cols)
        .map(|chunk| chunk.to_vec())
        .collect();
    Ok((images, rows, cols))
}

fn read_labels(path: &Path) -> Result<Vec<u8>, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::MissingFile(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    let magic = read_u32(&bytes, 0, path)?;
    if magic != LABEL_MAGIC {
        return Err(DatasetError::InvalidMagic {
            path: path.to_path_buf(),
            expected: LABEL_MAGIC,
            got: magic,
        });
    }
    let count = read_u32(&bytes, 4, path)? as usize;
    let labels = &bytes[8..];
    if labels.len() != count {
        return Err(DatasetError::TruncatedRecords {
            path: path.to_path_buf(),
            len: bytes.len(),
            record: 1,
        });
    }
    Ok(labels.to_vec())
}

/// Loads MNIST from a directory holding the standard uncompressed filenames.
pub fn load_mnist(root: &Path, split: Split) -> Result<VisionDataset, DatasetError> {
    let (image_file, label_file) = match split {
        Split::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
        Split::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
    };
    let (images, rows, cols) = read_images(&root.join(image_file))?;
    let labels = read_labels(&root.join(label_file))?;
    VisionDataset::new(images, labels, 1, rows, cols, 10)
}
