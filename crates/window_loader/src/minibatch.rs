use crate::collator::Collator;
use crate::sample::WindowPair;
use anyhow::{bail, Result};

/// Where one sample of a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowOrigin {
    /// Partition ordinal
    pub partition: usize,
    /// Input window start within the partition
    pub start: usize,
}

/// The `Batch` struct is an ordered `(input, target)` pair of stacked tensors.
///
/// Both sides hold the same number of samples; sample `i` of `target` is the
/// target window of sample `i` of `input`. Every batch of an epoch holds
/// exactly `batch_size` samples except possibly the last one when incomplete
/// batches are kept.
///
/// The tensor type `T` is whatever the configured [`Collator`] produces, e.g.
/// [`WindowTensor`](crate::collator::WindowTensor) for the default
/// [`StackCollator`](crate::collator::StackCollator).
#[derive(Debug)]
pub struct Batch<T> {
    pub input: T,
    pub target: T,
    /// One entry per sample, in batch order
    pub origins: Vec<WindowOrigin>,
}

impl<T> Batch<T> {
    /// Stacks aligned window pairs with the given [`Collator`].
    ///
    /// Example:
    /// let batch = Batch::collate(&pairs, &StackCollator, "cpu")?;
    pub fn collate<C>(pairs: &[WindowPair], collator: &C, device: &str) -> Result<Self>
    where
        C: Collator<Output = T> + ?Sized,
    {
        if pairs.is_empty() {
            bail!("Cannot build a batch from zero window pairs");
        }
        let inputs: Vec<_> = pairs.iter().map(|p| p.input.clone()).collect();
        let targets: Vec<_> = pairs.iter().map(|p| p.target.clone()).collect();
        Ok(Self {
            input: collator.collate(&inputs, device)?,
            target: collator.collate(&targets, device)?,
            origins: pairs
                .iter()
                .map(|p| WindowOrigin {
                    partition: p.input.partition,
                    start: p.input.start,
                })
                .collect(),
        })
    }

    /// Returns the number of samples in the batch.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Splits the batch into its `(input, target)` tensors.
    pub fn into_pair(self) -> (T, T) {
        (self.input, self.target)
    }
}
