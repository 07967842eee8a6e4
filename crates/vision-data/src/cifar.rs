//! CIFAR-10 / CIFAR-100 binary format parsers.
//!
//! CIFAR-10 records are 3073 bytes: one label byte followed by 3072 pixel
//! bytes (three 32x32 channel planes). CIFAR-100 records carry two label
//! bytes (coarse, fine); only the fine label is kept. File sizes are
//! validated against the record size, not a fixed record count, so truncated
//! downloads fail loudly and synthetic fixtures of any length parse.

use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::{DatasetError, Split, VisionDataset};

const IMAGE_BYTES: usize = 3 * 32 * 32;

fn read_records(
    path: &Path,
    label_bytes: usize,
    images: &mut Vec<Vec<u8>>,
    labels: &mut Vec<u8>,
) -> Result<(), DatasetError> {
    if !path.exists() {
        return Err(DatasetError::MissingFile(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    let record = label_bytes + IMAGE_BYTES;
    if bytes.is_empty() || bytes.len() % record != 0 {
        return Err(DatasetError::TruncatedRecords {
            path: path.to_path_buf(),
            len: bytes.len(),
            record,
        });
    }
    for chunk in bytes.chunks_exact(record) {
        // CIFAR-100 stores (coarse, fine); the last label byte is the one used
        labels.push(chunk[label_bytes - 1]);
        images.push(chunk[label_bytes..].to_vec());
    }
    Ok(())
}

/// Loads CIFAR-10 from the extracted `cifar-10-batches-bin` layout.
pub fn load_cifar10(root: &Path, split: Split) -> Result<VisionDataset, DatasetError> {
    let mut images = Vec::new();
    let mut labels = Vec::new();
    let files: Vec<PathBuf> = match split {
        Split::Train => (1..=5)
            .map(|i| root.join(format!("data_batch_{i}.bin")))
            .collect(),
        Split::Test => vec![root.join("test_batch.bin")],
    };
    for file in &files {
        read_records(file, 1, &mut images, &mut labels)?;
    }
    VisionDataset::new(images, labels, 3, 32, 32, 10)
}

/// Loads CIFAR-100 (fine labels) from the extracted `cifar-100-binary` layout.
pub fn load_cifar100(root: &Path, split: Split) -> Result<VisionDataset, DatasetError> {
    let mut images = Vec::new();
    let mut labels = Vec::new();
    let file = match split {
        Split::Train => root.join("train.bin"),
        Split::Test => root.join("test.bin"),
    };
    read_records(&file, 2, &mut images, &mut labels)?;
    VisionDataset::new(images, labels, 3, 32, 32, 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cifar10_batch(path: &Path, records: usize) {
        let mut file = fs::File::create(path).unwrap();
        for i in 0..records {
            let mut record = vec![(i % 10) as u8];
            record.extend(std::iter::repeat((i % 256) as u8).take(IMAGE_BYTES));
            file.write_all(&record).unwrap();
        }
    }

    #[test]
    fn parses_synthetic_batches() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for i in 1..=5 {
            write_cifar10_batch(&dir.path().join(format!("data_batch_{i}.bin")), 4);
        }
        write_cifar10_batch(&dir.path().join("test_batch.bin"), 2);

        let train = load_cifar10(dir.path(), Split::Train)?;
        assert_eq!(train.len(), 20);
        assert_eq!(train.image_shape(), (3, 32, 32));
        assert_eq!(train.classes(), 10);
        assert_eq!(train.label(3), 3);

        let test = load_cifar10(dir.path(), Split::Test)?;
        assert_eq!(test.len(), 2);
        Ok(())
    }

    #[test]
    fn truncated_file_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("train.bin");
        fs::write(&path, vec![0u8; 100])?;
        let err = load_cifar100(dir.path(), Split::Train).unwrap_err();
        assert!(matches!(err, DatasetError::TruncatedRecords { .. }));
        Ok(())
    }

    #[test]
    fn missing_file_is_reported_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_cifar10(dir.path(), Split::Test).unwrap_err();
        assert!(matches!(err, DatasetError::MissingFile(_)));
    }

    #[test]
    fn cifar100_keeps_the_fine_label() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.bin");
        let mut bytes = vec![7u8, 42];
        bytes.extend(std::iter::repeat(0u8).take(IMAGE_BYTES));
        fs::write(&path, bytes)?;
        let data = load_cifar100(dir.path(), Split::Test)?;
        assert_eq!(data.label(0), 42);
        Ok(())
    }
}
