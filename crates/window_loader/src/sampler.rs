use crate::error::{LoaderError, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Number of windows of `window` rows, `stride` rows apart, that fit in `length` rows.
///
/// `floor((length - window) / stride) + 1` when `length >= window`, else 0.
#[inline]
pub fn window_count(length: usize, window: usize, stride: usize) -> usize {
    if window == 0 || stride == 0 || length < window {
        0
    } else {
        (length - window) / stride + 1
    }
}

/// Window start indices for one partition, in iteration order.
///
/// Shorthand for `WindowSampler::new(..)?.sample()`.
pub fn sample(
    length: usize,
    window: usize,
    stride: usize,
    shuffle: bool,
    seed: u64,
) -> Result<Vec<usize>> {
    Ok(WindowSampler::new(length, window, stride, shuffle, seed)?.sample())
}

/// ============================================================================
/// Computes the valid window starts over a partition of `length` rows.
///
/// Starts are `k * stride` for `k in 0..count`. A partition shorter than one
/// window simply has no windows; that is not an error.
///
/// # Seed handling
/// With `shuffle = true` the starts are permuted by a `StdRng` seeded with
/// `seed`, so the same seed always yields the same order. The loader derives
/// one seed per partition from the epoch seed, see
/// [`derive_seed`](crate::dataloader::derive_seed).
///
/// # Example
/// ```ignore
/// let sampler = WindowSampler::new(10, 3, 1, false, 0)?;
/// assert_eq!(sampler.count(), 8);
/// assert_eq!(sampler.sample(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
/// ```
#[derive(Debug, Clone)]
pub struct WindowSampler {
    length: usize,
    window: usize,
    stride: usize,
    shuffle: bool,
    seed: u64,
}

impl WindowSampler {
    pub fn new(
        length: usize,
        window: usize,
        stride: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        if window == 0 {
            return Err(LoaderError::config("window size must be > 0"));
        }
        if stride == 0 {
            return Err(LoaderError::config("window stride must be > 0"));
        }
        Ok(Self {
            length,
            window,
            stride,
            shuffle,
            seed,
        })
    }

    /// Number of windows this sampler yields.
    pub fn count(&self) -> usize {
        window_count(self.length, self.window, self.stride)
    }

    pub fn sample(&self) -> Vec<usize> {
        let mut starts: Vec<usize> = (0..self.count()).map(|k| k * self.stride).collect();
        if self.shuffle {
            starts.shuffle(&mut StdRng::seed_from_u64(self.seed));
        }
        starts
    }
}

/// ============================================================================
/// Size and stride of one role's windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub size: usize,
    pub stride: usize,
}

/// Which stream's candidate count produced the shared index list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Input,
    Target,
}

/// Shared index list for one partition.
///
/// `starts` are input window starts; the matching target window starts at
/// `start + offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedWindows {
    pub starts: Vec<usize>,
    pub offset: usize,
    pub driver: Driver,
}

impl AlignedWindows {
    pub fn target_starts(&self) -> Vec<usize> {
        self.starts.iter().map(|s| s + self.offset).collect()
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

/// Builds the shared input/target index list for a partition of `length` rows.
///
/// The target sequence is the partition shifted by `offset`. Whichever stream
/// has fewer candidate windows drives: its sampler produces the list, expressed
/// as input starts (a start in the shifted target sequence is numerically the
/// input start). The other stream never samples on its own. Starts whose
/// partner window would run past `length` are dropped, keeping sampled order.
/// Ties go to the input stream.
pub fn align_windows(
    length: usize,
    input: WindowSpec,
    target: WindowSpec,
    offset: usize,
    shuffle: bool,
    seed: u64,
) -> Result<AlignedWindows> {
    let shifted = length.saturating_sub(offset);
    let input_count = window_count(length, input.size, input.stride);
    let target_count = window_count(shifted, target.size, target.stride);

    let (driver, sampler) = if target_count < input_count {
        (
            Driver::Target,
            WindowSampler::new(shifted, target.size, target.stride, shuffle, seed)?,
        )
    } else {
        (
            Driver::Input,
            WindowSampler::new(length, input.size, input.stride, shuffle, seed)?,
        )
    };

    let starts = sampler
        .sample()
        .into_iter()
        .filter(|&start| start + input.size <= length && start + offset + target.size <= length)
        .collect();

    Ok(AlignedWindows {
        starts,
        offset,
        driver,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TEST_SEED: u64 = 42;

    mod window_sampler_tests {
        use super::*;

        #[test]
        fn count_matches_closed_form() {
            for length in 0..40 {
                for window in 1..8 {
                    for stride in 1..5 {
                        let expected = if length >= window {
                            (length - window) / stride + 1
                        } else {
                            0
                        };
                        assert_eq!(
                            window_count(length, window, stride),
                            expected,
                            "N={} W={} S={}",
                            length,
                            window,
                            stride
                        );
                        let sampler =
                            WindowSampler::new(length, window, stride, true, TEST_SEED).unwrap();
                        assert_eq!(sampler.sample().len(), expected);
                    }
                }
            }
        }

        #[test]
        fn short_partition_is_empty_not_error() -> anyhow::Result<()> {
            assert!(sample(2, 3, 1, false, TEST_SEED)?.is_empty());
            Ok(())
        }

        #[test]
        fn rejects_zero_window_or_stride() {
            assert!(WindowSampler::new(10, 0, 1, false, TEST_SEED).is_err());
            assert!(WindowSampler::new(10, 2, 0, false, TEST_SEED).is_err());
        }

        #[test]
        fn yields_sequential_starts() -> anyhow::Result<()> {
            assert_eq!(sample(10, 3, 1, false, TEST_SEED)?, (0..8).collect::<Vec<_>>());
            assert_eq!(sample(7, 2, 2, false, TEST_SEED)?, vec![0, 2, 4]);
            Ok(())
        }

        #[test]
        fn shuffle_is_a_seeded_permutation() -> anyhow::Result<()> {
            let shuffled = sample(100, 4, 1, true, TEST_SEED)?;
            let sequential = sample(100, 4, 1, false, TEST_SEED)?;

            assert_ne!(shuffled, sequential);
            assert_eq!(
                shuffled.iter().collect::<HashSet<_>>(),
                sequential.iter().collect::<HashSet<_>>()
            );
            assert_eq!(shuffled, sample(100, 4, 1, true, TEST_SEED)?);
            assert_ne!(shuffled, sample(100, 4, 1, true, TEST_SEED + 1)?);
            Ok(())
        }
    }

    mod align_tests {
        use super::*;

        fn spec(size: usize, stride: usize) -> WindowSpec {
            WindowSpec { size, stride }
        }

        #[test]
        fn zero_offset_keeps_all_input_windows() -> anyhow::Result<()> {
            let aligned = align_windows(10, spec(3, 1), spec(3, 1), 0, false, TEST_SEED)?;
            assert_eq!(aligned.driver, Driver::Input);
            assert_eq!(aligned.starts, (0..8).collect::<Vec<_>>());
            assert_eq!(aligned.target_starts(), aligned.starts);
            Ok(())
        }

        #[test]
        fn shifted_target_drives_when_it_has_fewer_windows() -> anyhow::Result<()> {
            // Target sequence covers rows 3..10, so only 5 target windows fit.
            let aligned = align_windows(10, spec(3, 1), spec(3, 1), 3, false, TEST_SEED)?;
            assert_eq!(aligned.driver, Driver::Target);
            assert_eq!(aligned.starts, vec![0, 1, 2, 3, 4]);
            assert_eq!(aligned.target_starts(), vec![3, 4, 5, 6, 7]);
            Ok(())
        }

        #[test]
        fn every_pair_fits_inside_partition() -> anyhow::Result<()> {
            let input = spec(4, 3);
            let target = spec(2, 1);
            for length in 0..30 {
                for offset in 0..8 {
                    let aligned = align_windows(length, input, target, offset, true, TEST_SEED)?;
                    for (&s, t) in aligned.starts.iter().zip(aligned.target_starts()) {
                        assert!(s + input.size <= length);
                        assert!(t + target.size <= length);
                        assert_eq!(t, s + offset);
                    }
                }
            }
            Ok(())
        }

        #[test]
        fn offset_beyond_partition_yields_nothing() -> anyhow::Result<()> {
            let aligned = align_windows(5, spec(2, 1), spec(2, 1), 9, false, TEST_SEED)?;
            assert!(aligned.is_empty());
            Ok(())
        }

        #[test]
        fn shuffled_alignment_is_reproducible() -> anyhow::Result<()> {
            let a = align_windows(50, spec(5, 1), spec(1, 1), 5, true, TEST_SEED)?;
            let b = align_windows(50, spec(5, 1), spec(1, 1), 5, true, TEST_SEED)?;
            assert_eq!(a, b);
            Ok(())
        }
    }
}
