// Telemetry reader: one field, a fixed set of motors
//
// Two acquisition modes share the same decoding:
// - sync_read: one bulk read transaction, best effort, fills the store
// - read: one request per motor, stops at the first communication failure

pub mod decode;
pub mod fallback;
pub mod session;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::motor::control_table::{ByteWidth, ControlParameterRegistry, Field, RegistryError};
use crate::motor::protocol::{CommError, HardwareErrorFlags, MotorId, PacketHandler};
use decode::DecodeError;
use session::{BulkReadSession, SessionError};

/// Configuration errors: the reader cannot do its job until the setup is fixed
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReaderError {
    #[error("No motors given to the reader")]
    NoMotors,

    #[error("Motor {id} is listed more than once")]
    DuplicateMotor { id: MotorId },

    #[error("No control parameters for motor {id}: {source}")]
    Registry { id: MotorId, source: RegistryError },

    #[error("Unknown byte size {width} for motor {id}")]
    UnsupportedByteWidth { id: MotorId, width: u8 },

    #[error("Motor {id} stores the field on {width} bytes, expected {expected}")]
    ByteWidthMismatch { id: MotorId, width: u8, expected: u8 },

    #[error("Motor {id} is not managed by this reader")]
    UnmanagedMotor { id: MotorId },

    #[error("Adding parameters failed for ID = {id}: {source}")]
    AddParam { id: MotorId, source: SessionError },

    #[error("Model {model} of motor {id} is unknown, cannot calculate angle from position")]
    UnknownModel { id: MotorId, model: u16 },

    #[error("Output holds {len} values but {ids} motors were requested")]
    OutputTooShort { ids: usize, len: usize },
}

/// What to do with a non-zero error byte in a status packet
///
/// Some motors keep raising the input voltage bit on valid readings, so the
/// default keeps the value and only logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFlagPolicy {
    #[default]
    Ignore,
    Surface,
}

/// Outcome of a bulk read that did not hit a configuration error
#[derive(Debug, Default)]
pub struct SyncReadReport {
    /// Transaction-level failure, if any
    pub comm_error: Option<CommError>,
    /// Motors whose slot was left untouched
    pub unavailable: Vec<MotorId>,
}

impl SyncReadReport {
    pub fn is_complete(&self) -> bool {
        self.comm_error.is_none() && self.unavailable.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct MotorSlot {
    id: MotorId,
    unit: f32,
    model: u16,
}

pub struct Reader {
    field: Field,
    address: u8,
    width: ByteWidth,
    slots: Vec<MotorSlot>,
    index: HashMap<MotorId, usize>,
    values: Vec<f32>,
    session: BulkReadSession,
    error_policy: ErrorFlagPolicy,
}

impl Reader {
    /// Bind `field` on `ids` to a register address and width
    ///
    /// The first motor decides the address and width; every other motor
    /// must store the field on the same number of bytes.
    pub fn new<R: ControlParameterRegistry + ?Sized>(
        field: Field,
        ids: &[MotorId],
        registry: &R,
    ) -> Result<Self, ReaderError> {
        let &first = ids.first().ok_or(ReaderError::NoMotors)?;
        let first_params = registry
            .lookup(first, field)
            .map_err(|source| ReaderError::Registry { id: first, source })?;
        let width = ByteWidth::try_from(first_params.byte_width)
            .map_err(|width| ReaderError::UnsupportedByteWidth { id: first, width })?;

        let mut slots = Vec::with_capacity(ids.len());
        let mut index = HashMap::with_capacity(ids.len());

        for (slot, &id) in ids.iter().enumerate() {
            let params = registry
                .lookup(id, field)
                .map_err(|source| ReaderError::Registry { id, source })?;

            if params.byte_width != width.bytes() {
                return Err(ReaderError::ByteWidthMismatch {
                    id,
                    width: params.byte_width,
                    expected: width.bytes(),
                });
            }
            if params.address != first_params.address {
                warn!(
                    "Motor {} has {} at address {}, reading address {} instead",
                    id, field, params.address, first_params.address
                );
            }
            if index.insert(id, slot).is_some() {
                return Err(ReaderError::DuplicateMotor { id });
            }

            // Scanned model takes precedence over the table's
            let model = registry.lookup_model_id(id).unwrap_or(params.model);
            slots.push(MotorSlot {
                id,
                unit: params.unit,
                model,
            });
        }

        info!(
            "Reader for {} on motors {:?}: address {}, {} bytes",
            field,
            ids,
            first_params.address,
            width.bytes()
        );

        Ok(Self {
            field,
            address: first_params.address,
            width,
            values: vec![0.0; slots.len()],
            slots,
            index,
            session: BulkReadSession::new(),
            error_policy: ErrorFlagPolicy::default(),
        })
    }

    pub fn with_error_policy(mut self, policy: ErrorFlagPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Read `ids` in one bulk transaction and store the decoded values
    ///
    /// Communication and availability failures are logged and reported;
    /// slots of motors without data keep their previous value.
    pub fn sync_read<B: PacketHandler + ?Sized>(
        &mut self,
        bus: &mut B,
        ids: &[MotorId],
    ) -> Result<SyncReadReport, ReaderError> {
        self.check_managed(ids)?;

        self.session.clear_params();
        for &id in ids {
            self.session
                .add_param(id, self.address, self.width)
                .map_err(|source| ReaderError::AddParam { id, source })?;
        }

        let mut report = SyncReadReport::default();
        if let Err(e) = self.session.tx_rx(bus) {
            warn!("Bulk read of {} failed: {}", self.field, e);
            report.comm_error = Some(e);
        }

        for &id in ids {
            let raw = match self.session.get_data(id, self.address, self.width) {
                Some(raw) => raw,
                None => {
                    warn!("[ID:{:03}] bulk read data unavailable for {}", id, self.field);
                    report.unavailable.push(id);
                    continue;
                }
            };

            let flags = self.session.error_flags(id).unwrap_or_default();
            if !self.accept_flags(id, flags) {
                report.unavailable.push(id);
                continue;
            }

            let slot = self.index[&id];
            self.values[slot] = self.decode_slot(slot, raw)?;
        }

        Ok(report)
    }

    /// Read `ids` one by one into `output`, aligned with `ids`
    ///
    /// Returns `Ok(false)` at the first communication failure; the motors
    /// after it are not read and their output slots are left alone.
    pub fn read<B: PacketHandler + ?Sized>(
        &self,
        bus: &mut B,
        ids: &[MotorId],
        output: &mut [f32],
    ) -> Result<bool, ReaderError> {
        if output.len() < ids.len() {
            return Err(ReaderError::OutputTooShort {
                ids: ids.len(),
                len: output.len(),
            });
        }
        self.check_managed(ids)?;

        for (out, &id) in output.iter_mut().zip(ids) {
            let (raw, flags) = match fallback::read_raw(&mut *bus, id, self.address, self.width) {
                Ok(read) => read,
                Err(e) => {
                    warn!("Read of {} from motor {} failed: {}", self.field, id, e);
                    return Ok(false);
                }
            };

            if !self.accept_flags(id, flags) {
                return Ok(false);
            }

            *out = self.decode_slot(self.index[&id], raw)?;
        }

        Ok(true)
    }

    fn check_managed(&self, ids: &[MotorId]) -> Result<(), ReaderError> {
        match ids.iter().copied().find(|id| !self.index.contains_key(id)) {
            Some(id) => Err(ReaderError::UnmanagedMotor { id }),
            None => Ok(()),
        }
    }

    fn accept_flags(&self, id: MotorId, flags: HardwareErrorFlags) -> bool {
        if flags.is_empty() {
            return true;
        }
        match self.error_policy {
            ErrorFlagPolicy::Ignore => {
                debug!("Motor {} reported {}, keeping the value", id, flags);
                true
            }
            ErrorFlagPolicy::Surface => {
                warn!("Motor {} reported {}", id, flags);
                false
            }
        }
    }

    fn decode_slot(&self, slot: usize, raw: u32) -> Result<f32, ReaderError> {
        let MotorSlot { id, unit, model } = self.slots[slot];
        decode::decode(raw, self.field, model, unit).map_err(|e| match e {
            DecodeError::UnknownModel { model } => ReaderError::UnknownModel { id, model },
        })
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn byte_width(&self) -> ByteWidth {
        self.width
    }

    /// Managed motors, in slot order
    pub fn ids(&self) -> impl Iterator<Item = MotorId> + '_ {
        self.slots.iter().map(|s| s.id)
    }

    /// Values from the last bulk reads, indexed by slot
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn slot(&self, id: MotorId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn value(&self, id: MotorId) -> Option<f32> {
        self.slot(id).map(|slot| self.values[slot])
    }
}
