use crate::sample::Window;
use anyhow::{anyhow, bail, ensure, Context, Result};
use arrow::array::{Array, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;

/// A `Collator` defines how a list of same-shaped [`Window`]s is stacked into
/// one batch tensor.
///
/// The loader calls it twice per batch, once for the input windows and once
/// for the target windows, on the assembler thread. `device` is the opaque
/// placement tag from the loader configuration.
pub trait Collator: Send + Sync {
    type Output: Send + 'static;

    fn collate(&self, windows: &[Window], device: &str) -> Result<Self::Output>;
}

/// Dense, row-major `f64` tensor of shape `[batch, window, columns]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTensor {
    shape: [usize; 3],
    columns: Vec<String>,
    device: String,
    data: Vec<f64>,
}

impl WindowTensor {
    /// `[batch, window, columns]`
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Placement tag the tensor was stacked for.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Flattened `[window, columns]` values of sample `index`.
    pub fn window(&self, index: usize) -> &[f64] {
        let stride = self.shape[1] * self.shape[2];
        &self.data[index * stride..(index + 1) * stride]
    }

    /// Value at `[sample, row, column]`.
    pub fn get(&self, sample: usize, row: usize, column: usize) -> f64 {
        let [_, rows, columns] = self.shape;
        self.data[(sample * rows + row) * columns + column]
    }
}

/// A `Collator` that stacks windows with identical row counts and column
/// names into a [`WindowTensor`].
///
/// Every column is cast to `Float64`; nulls become `NaN`. It does not pad, so
/// any window with a different shape or schema is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackCollator;

impl Collator for StackCollator {
    type Output = WindowTensor;

    fn collate(&self, windows: &[Window], device: &str) -> Result<WindowTensor> {
        if windows.is_empty() {
            bail!("Cannot collate empty window list");
        }

        // Validate that shapes are compatible for stacking
        let rows = windows[0].len();
        let columns = windows[0].columns();
        for (i, window) in windows.iter().enumerate().skip(1) {
            if window.len() != rows {
                bail!(
                    "Window #{} (partition {}, start {}) has {} rows, expected {}",
                    i,
                    window.partition,
                    window.start,
                    window.len(),
                    rows
                );
            }
            let names = window.columns();
            if names != columns {
                bail!(
                    "Window #{} has mismatched columns:\n -Expected: {:?}\n -Got: {:?}",
                    i,
                    columns,
                    names
                );
            }
        }

        let width = columns.len();
        let mut data = vec![0.0; windows.len() * rows * width];
        for (b, window) in windows.iter().enumerate() {
            for (c, column) in window.rows.columns().iter().enumerate() {
                ensure!(
                    column.data_type().is_numeric(),
                    "Column '{}' holds {} values and cannot be stacked",
                    columns[c],
                    column.data_type()
                );
                let values = cast(column.as_ref(), &DataType::Float64).with_context(|| {
                    format!("Column '{}' cannot be stacked as Float64", columns[c])
                })?;
                let values = values
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| anyhow!("Cast of '{}' did not produce Float64", columns[c]))?;
                for r in 0..rows {
                    data[(b * rows + r) * width + c] = if values.is_null(r) {
                        f64::NAN
                    } else {
                        values.value(r)
                    };
                }
            }
        }

        Ok(WindowTensor {
            shape: [windows.len(), rows, width],
            columns,
            device: device.to_string(),
            data,
        })
    }
}

/// A `Collator` that stacks windows into a libtorch `Tensor` of kind `Double`
/// and shape `[batch, window, columns]`, placed on the configured device.
///
/// Device tags: `cpu`, `cuda` (device 0), `cuda:N`, `mps`.
#[cfg(feature = "tch")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TchCollator;

#[cfg(feature = "tch")]
impl TchCollator {
    pub fn parse_device(device: &str) -> Result<tch::Device> {
        match device {
            "cpu" => Ok(tch::Device::Cpu),
            "cuda" => Ok(tch::Device::Cuda(0)),
            "mps" => Ok(tch::Device::Mps),
            other => match other.strip_prefix("cuda:") {
                Some(index) => Ok(tch::Device::Cuda(
                    index
                        .parse()
                        .with_context(|| format!("Invalid CUDA device index in '{}'", other))?,
                )),
                None => bail!("Unknown device tag '{}'", other),
            },
        }
    }
}

#[cfg(feature = "tch")]
impl Collator for TchCollator {
    type Output = tch::Tensor;

    fn collate(&self, windows: &[Window], device: &str) -> Result<tch::Tensor> {
        let target = Self::parse_device(device)?;
        let stacked = StackCollator.collate(windows, device)?;
        let [batch, rows, columns] = stacked.shape();
        let shape = [batch as i64, rows as i64, columns as i64];
        Ok(tch::Tensor::from_slice(stacked.data())
            .reshape(shape)
            .to_device(target))
    }
}
