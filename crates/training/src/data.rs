//! Dataset resolution from the data configuration section.

use vision_data::{cifar, mnist, Augment, Normalize, Split, VisionDataset};

use crate::config::{DataSection, DatasetKind, TrainingError};

/// Train and test splits plus the transforms that go with them.
pub struct DatasetBundle {
    pub train: VisionDataset,
    pub test: VisionDataset,
    pub normalize: Normalize,
    pub augment: Option<Augment>,
    pub name: &'static str,
}

/// Loads both splits of the configured dataset.
pub fn load(config: &DataSection) -> Result<DatasetBundle, TrainingError> {
    let bundle = match config.dataset {
        DatasetKind::Cifar10 => DatasetBundle {
            train: cifar::load_cifar10(&config.root, Split::Train)?,
            test: cifar::load_cifar10(&config.root, Split::Test)?,
            normalize: Normalize::cifar10(),
            augment: config.augment.then(Augment::cifar),
            name: "cifar10",
        },
        DatasetKind::Cifar100 => DatasetBundle {
            train: cifar::load_cifar100(&config.root, Split::Train)?,
            test: cifar::load_cifar100(&config.root, Split::Test)?,
            normalize: Normalize::cifar100(),
            augment: config.augment.then(Augment::cifar),
            name: "cifar100",
        },
        DatasetKind::Mnist => DatasetBundle {
            train: mnist::load_mnist(&config.root, Split::Train)?,
            test: mnist::load_mnist(&config.root, Split::Test)?,
            normalize: Normalize::mnist(),
            // mirroring digits changes their class; jitter only
            augment: config.augment.then(|| Augment::crop_only(2)),
            name: "mnist",
        },
    };
    if bundle.train.is_empty() || bundle.test.is_empty() {
        return Err(TrainingError::initialization(format!(
            "dataset '{}' under {} has an empty split",
            bundle.name,
            config.root.display()
        )));
    }
    Ok(bundle)
}
