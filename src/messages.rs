// Message types published by the telemetry runtime

use serde::{Deserialize, Serialize};

use crate::motor::control_table::Field;
use crate::motor::protocol::MotorId;
use crate::reader::SyncReadReport;

/// Health of the last read
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReaderHealth {
    Ok,
    Partial,
    CommFailure,
}

impl ReaderHealth {
    /// CommFailure only when the bus failed and no motor delivered data
    pub fn from_report(report: &SyncReadReport, requested: usize) -> Self {
        if report.is_complete() {
            ReaderHealth::Ok
        } else if report.comm_error.is_some() && report.unavailable.len() >= requested {
            ReaderHealth::CommFailure
        } else {
            ReaderHealth::Partial
        }
    }
}

/// One reading of a field across the managed motors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySample {
    pub field: Field,
    pub ids: Vec<MotorId>,
    pub values: Vec<f32>,
    pub health: ReaderHealth,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<MotorId>,
}
