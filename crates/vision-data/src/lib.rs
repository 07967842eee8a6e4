//! Image-classification datasets for the spiking training driver.
//!
//! Everything is held in memory as raw `u8` pixels in `[C, H, W]` layout;
//! normalization to `f32` happens at batch-assembly time so augmentation can
//! stay integer-exact.

pub mod batcher;
pub mod cifar;
pub mod dataset;
pub mod mnist;
pub mod transform;

pub use batcher::{Batch, BatchLoader};
pub use dataset::{DatasetError, Split, VisionDataset};
pub use transform::{Augment, Normalize};
