//! Device conversion engine.
//!
//! Relocates tensor-bearing fields of records and batches across compute
//! devices through a pluggable [`DeviceRuntime`]. The core has no knowledge
//! of specific hardware APIs; a runtime only needs to answer availability
//! and perform a primitive array transfer. Conversion is a pure transform:
//! it returns a new structure with newly placed tensor fields while all
//! other fields pass through unchanged.

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::batch::{Batch, BatchedField};
use crate::core::errors::{DataError, DataResult};
use crate::core::record::Record;
use crate::core::value::{TensorValue, Value};

/// A compute device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// Host memory.
    Cpu,
    /// An accelerator, addressed by ordinal.
    Gpu(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(ordinal) => write!(f, "gpu:{ordinal}"),
        }
    }
}

impl FromStr for Device {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        if let Some(ordinal) = s.strip_prefix("gpu:") {
            let ordinal = ordinal.parse::<u32>().map_err(|_| {
                DataError::invalid_input(format!("invalid device ordinal in '{s}'"))
            })?;
            return Ok(Device::Gpu(ordinal));
        }
        Err(DataError::invalid_input(format!(
            "unrecognized device identifier '{s}'"
        )))
    }
}

/// Collaborator contract for moving arrays between devices.
///
/// Implementations must return only after the transferred data is safe to
/// use; any required completion synchronization happens inside `transfer`.
pub trait DeviceRuntime {
    /// Returns true if the device can be targeted by this runtime.
    fn is_available(&self, device: Device) -> bool;

    /// Moves array data onto `target`, returning the newly placed copy.
    fn transfer(&self, data: &ArrayD<f32>, target: Device) -> DataResult<ArrayD<f32>>;
}

/// The default runtime: only the CPU exists, and transfers are copies in
/// host memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuRuntime;

impl DeviceRuntime for CpuRuntime {
    fn is_available(&self, device: Device) -> bool {
        device == Device::Cpu
    }

    fn transfer(&self, data: &ArrayD<f32>, _target: Device) -> DataResult<ArrayD<f32>> {
        Ok(data.clone())
    }
}

impl Record {
    /// Returns a copy of this record with every tensor field placed on
    /// `target`.
    ///
    /// Non-tensor fields (text, graphs, metadata) pass through unchanged.
    /// Tensors already on `target` are not transferred again. Fails with
    /// [`DataError::DeviceUnavailable`] when the runtime does not provide
    /// the device.
    pub fn to_device(&self, target: Device, runtime: &dyn DeviceRuntime) -> DataResult<Record> {
        if !runtime.is_available(target) {
            return Err(DataError::DeviceUnavailable { device: target });
        }
        let schema = self.schema().clone();
        let values = self
            .clone()
            .into_values()
            .into_iter()
            .map(|value| convert_value(value, target, runtime))
            .collect::<DataResult<Vec<_>>>()?;
        Record::from_ordered(schema, values)
    }
}

fn convert_value(
    value: Value,
    target: Device,
    runtime: &dyn DeviceRuntime,
) -> DataResult<Value> {
    match value {
        Value::Tensor(tensor) => Ok(Value::Tensor(convert_tensor(tensor, target, runtime)?)),
        Value::Record(record) => Ok(Value::Record(record.to_device(target, runtime)?)),
        Value::RecordSeq(records) => {
            let moved = records
                .into_iter()
                .map(|r| r.to_device(target, runtime))
                .collect::<DataResult<Vec<_>>>()?;
            Ok(Value::RecordSeq(moved))
        }
        other => Ok(other),
    }
}

fn convert_tensor(
    tensor: TensorValue,
    target: Device,
    runtime: &dyn DeviceRuntime,
) -> DataResult<TensorValue> {
    if tensor.device == target {
        // Identity move; skip the runtime entirely.
        return Ok(tensor);
    }
    debug!(from = %tensor.device, to = %target, "transferring tensor");
    let data = runtime.transfer(&tensor.data, target)?;
    Ok(TensorValue {
        data,
        device: target,
    })
}

impl Batch {
    /// Returns a copy of this batch with every stacked tensor field placed
    /// on `target`. Mirrors [`Record::to_device`] for batched data.
    pub fn to_device(&self, target: Device, runtime: &dyn DeviceRuntime) -> DataResult<Batch> {
        if !runtime.is_available(target) {
            return Err(DataError::DeviceUnavailable { device: target });
        }
        let fields = self
            .fields()
            .iter()
            .map(|field| convert_batched_field(field, target, runtime))
            .collect::<DataResult<Vec<_>>>()?;
        Ok(self.with_fields(fields))
    }
}

fn convert_batched_field(
    field: &BatchedField,
    target: Device,
    runtime: &dyn DeviceRuntime,
) -> DataResult<BatchedField> {
    match field {
        BatchedField::Tensors {
            data,
            device,
            shapes,
        } => {
            let (data, device) = if *device == target {
                (data.clone(), *device)
            } else {
                debug!(from = %device, to = %target, "transferring batched tensor");
                (runtime.transfer(data, target)?, target)
            };
            Ok(BatchedField::Tensors {
                data,
                device,
                shapes: shapes.clone(),
            })
        }
        BatchedField::Records(nested) => Ok(BatchedField::Records(Box::new(
            nested.to_device(target, runtime)?,
        ))),
        BatchedField::RecordSeqs(items) => {
            let moved = items
                .iter()
                .map(|records| {
                    records
                        .iter()
                        .map(|r| r.to_device(target, runtime))
                        .collect::<DataResult<Vec<_>>>()
                })
                .collect::<DataResult<Vec<_>>>()?;
            Ok(BatchedField::RecordSeqs(moved))
        }
        other => Ok(other.clone()),
    }
}
