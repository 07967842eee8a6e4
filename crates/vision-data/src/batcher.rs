//! Seeded shuffling batcher producing device tensors.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::dataset::VisionDataset;
use crate::transform::{Augment, Normalize};

/// One batch ready for the model.
#[derive(Debug)]
pub struct Batch {
    /// `[N, C, H, W]` normalized images.
    pub images: Tensor,
    /// `[N]` class indices (`u32`).
    pub labels: Tensor,
}

/// Iterates a [`VisionDataset`] in shuffled mini-batches.
///
/// Training mode shuffles every epoch from a per-epoch seed and drops the
/// ragged tail so each optimizer step sees a full batch; evaluation keeps the
/// natural order and covers every sample.
pub struct BatchLoader<'a> {
    dataset: &'a VisionDataset,
    normalize: Normalize,
    augment: Option<Augment>,
    batch_size: usize,
    device: Device,
    seed: u64,
    train: bool,
}

impl<'a> BatchLoader<'a> {
    pub fn new(
        dataset: &'a VisionDataset,
        normalize: Normalize,
        batch_size: usize,
        device: Device,
        seed: u64,
        train: bool,
    ) -> Self {
        Self {
            dataset,
            normalize,
            augment: None,
            batch_size,
            device,
            seed,
            train,
        }
    }

    pub fn with_augment(mut self, augment: Augment) -> Self {
        self.augment = Some(augment);
        self
    }

    /// Number of batches one epoch yields.
    pub fn batches_per_epoch(&self) -> usize {
        if self.train {
            self.dataset.len() / self.batch_size
        } else {
            self.dataset.len().div_ceil(self.batch_size)
        }
    }

    /// Assembles the batches of one epoch.
    pub fn epoch(&self, epoch: usize) -> EpochIter<'_, 'a> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        if self.train {
            order.shuffle(&mut rng);
        }
        EpochIter {
            loader: self,
            order,
            rng,
            cursor: 0,
        }
    }

    fn assemble(&self, indices: &[usize], rng: &mut StdRng) -> candle_core::Result<Batch> {
        let (channels, height, width) = self.dataset.image_shape();
        let image_len = channels * height * width;
        let mut pixels = Vec::with_capacity(indices.len() * image_len);
        let mut labels = Vec::with_capacity(indices.len());
        for &index in indices {
            let raw = self.dataset.image(index);
            let augmented;
            let source: &[u8] = match (&self.augment, self.train) {
                (Some(augment), true) => {
                    augmented = augment.apply(raw, channels, height, width, rng);
                    &augmented
                }
                _ => raw,
            };
            for (position, &pixel) in source.iter().enumerate() {
                let channel = position / (height * width);
                pixels.push(self.normalize.apply(pixel, channel));
            }
            labels.push(self.dataset.label(index) as u32);
        }
        let images = Tensor::from_vec(
            pixels,
            (indices.len(), channels, height, width),
            &self.device,
        )?;
        let labels = Tensor::from_vec(labels, (indices.len(),), &self.device)?;
        Ok(Batch { images, labels })
    }
}

/// Batches of a single epoch.
pub struct EpochIter<'l, 'a> {
    loader: &'l BatchLoader<'a>,
    order: Vec<usize>,
    rng: StdRng,
    cursor: usize,
}

impl Iterator for EpochIter<'_, '_> {
    type Item = candle_core::Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.order.len() - self.cursor;
        if remaining == 0 {
            return None;
        }
        if self.loader.train && remaining < self.loader.batch_size {
            return None;
        }
        let take = remaining.min(self.loader.batch_size);
        let indices = self.order[self.cursor..self.cursor + take].to_vec();
        self.cursor += take;
        Some(self.loader.assemble(&indices, &mut self.rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::VisionDataset;
    use candle_core::DType;

    fn toy_dataset(samples: usize) -> VisionDataset {
        let images = (0..samples).map(|i| vec![i as u8; 2 * 2]).collect();
        let labels = (0..samples).map(|i| (i % 4) as u8).collect();
        VisionDataset::new(images, labels, 1, 2, 2, 4).unwrap()
    }

    #[test]
    fn train_epochs_drop_the_ragged_tail() -> anyhow::Result<()> {
        let dataset = toy_dataset(10);
        let loader = BatchLoader::new(
            &dataset,
            Normalize::mnist(),
            4,
            Device::Cpu,
            17,
            true,
        );
        assert_eq!(loader.batches_per_epoch(), 2);
        let batches: Vec<_> = loader.epoch(0).collect::<candle_core::Result<_>>()?;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].images.dims(), &[4, 1, 2, 2]);
        assert_eq!(batches[0].labels.dims(), &[4]);
        assert_eq!(batches[0].labels.dtype(), DType::U32);
        Ok(())
    }

    #[test]
    fn eval_epochs_cover_every_sample() -> anyhow::Result<()> {
        let dataset = toy_dataset(10);
        let loader = BatchLoader::new(
            &dataset,
            Normalize::mnist(),
            4,
            Device::Cpu,
            17,
            false,
        );
        assert_eq!(loader.batches_per_epoch(), 3);
        let batches: Vec<_> = loader.epoch(0).collect::<candle_core::Result<_>>()?;
        let total: usize = batches.iter().map(|b| b.labels.dims()[0]).sum();
        assert_eq!(total, 10);
        // evaluation keeps the natural order
        assert_eq!(batches[0].labels.to_vec1::<u32>()?, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    fn shuffling_is_reproducible_per_seed_and_epoch() -> anyhow::Result<()> {
        let dataset = toy_dataset(16);
        let loader = BatchLoader::new(
            &dataset,
            Normalize::mnist(),
            8,
            Device::Cpu,
            99,
            true,
        );
        let a: Vec<u32> = loader
            .epoch(1)
            .map(|b| b.unwrap().labels.to_vec1::<u32>().unwrap())
            .flatten()
            .collect();
        let b: Vec<u32> = loader
            .epoch(1)
            .map(|b| b.unwrap().labels.to_vec1::<u32>().unwrap())
            .flatten()
            .collect();
        let c: Vec<u32> = loader
            .epoch(2)
            .map(|b| b.unwrap().labels.to_vec1::<u32>().unwrap())
            .flatten()
            .collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
        Ok(())
    }
}
