// Protocol 1.0 control tables and the per-motor parameter registry
//
// Every supported model maps a logical field to a register address, a byte
// width and a unit that turns raw counts into SI values.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::protocol::MotorId;

/// Model numbers reported by the motors
pub const MODEL_AX_12A: u16 = 12;
pub const MODEL_MX_64: u16 = 310;
pub const MODEL_XH430_W210: u16 = 1000;
pub const MODEL_XM430_W210: u16 = 1030;

/// Logical quantity stored in a motor register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    GoalPos,
    PresentPos,
    CwAngleLimit,
    CcwAngleLimit,
    GoalSpeed,
    PresentSpeed,
    PresentLoad,
    TorqueLimit,
    PresentVoltage,
    PresentTemperature,
    TorqueEnable,
    Moving,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::GoalPos,
        Field::PresentPos,
        Field::CwAngleLimit,
        Field::CcwAngleLimit,
        Field::GoalSpeed,
        Field::PresentSpeed,
        Field::PresentLoad,
        Field::TorqueLimit,
        Field::PresentVoltage,
        Field::PresentTemperature,
        Field::TorqueEnable,
        Field::Moving,
    ];

    /// Position fields need overflow correction and model-specific scaling
    pub fn is_position(&self) -> bool {
        matches!(
            self,
            Field::GoalPos | Field::PresentPos | Field::CwAngleLimit | Field::CcwAngleLimit
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::GoalPos => "goal_pos",
            Field::PresentPos => "present_pos",
            Field::CwAngleLimit => "cw_angle_limit",
            Field::CcwAngleLimit => "ccw_angle_limit",
            Field::GoalSpeed => "goal_speed",
            Field::PresentSpeed => "present_speed",
            Field::PresentLoad => "present_load",
            Field::TorqueLimit => "torque_limit",
            Field::PresentVoltage => "present_voltage",
            Field::PresentTemperature => "present_temperature",
            Field::TorqueEnable => "torque_enable",
            Field::Moving => "moving",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// Register width, chosen once and reused for every read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteWidth {
    One,
    Two,
    Four,
}

impl ByteWidth {
    pub fn bytes(&self) -> u8 {
        match self {
            ByteWidth::One => 1,
            ByteWidth::Two => 2,
            ByteWidth::Four => 4,
        }
    }
}

impl TryFrom<u8> for ByteWidth {
    type Error = u8;

    fn try_from(width: u8) -> std::result::Result<Self, Self::Error> {
        match width {
            1 => Ok(ByteWidth::One),
            2 => Ok(ByteWidth::Two),
            4 => Ok(ByteWidth::Four),
            other => Err(other),
        }
    }
}

/// Register description of one field on one motor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlParameters {
    pub address: u8,
    pub byte_width: u8,
    pub unit: f32,
    pub model: u16,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("Motor {id} is not registered")]
    UnknownMotor { id: MotorId },

    #[error("Model {model} has no control table")]
    UnknownModel { model: u16 },

    #[error("Model {model} has no {field} register")]
    FieldUnsupported { model: u16, field: Field },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Source of per-motor register descriptions
pub trait ControlParameterRegistry {
    fn lookup(&self, id: MotorId, field: Field) -> Result<ControlParameters>;

    fn lookup_model_id(&self, id: MotorId) -> Option<u16>;
}

/// Motor declared on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorSpec {
    pub id: MotorId,
    pub model: u16,
}

// (address, byte width, unit)
type Entry = (u8, u8, f32);

const RPM_TO_RAD_S: f32 = 2.0 * PI / 60.0;

/// AX-12A: 0..1023 over 300 degrees
fn ax_12a(field: Field) -> Option<Entry> {
    let pos_unit = 300.0_f32.to_radians() / 1023.0;
    let speed_unit = 0.111 * RPM_TO_RAD_S;
    Some(match field {
        Field::CwAngleLimit => (6, 2, pos_unit),
        Field::CcwAngleLimit => (8, 2, pos_unit),
        Field::TorqueEnable => (24, 1, 1.0),
        Field::GoalPos => (30, 2, pos_unit),
        Field::GoalSpeed => (32, 2, speed_unit),
        Field::TorqueLimit => (34, 2, 0.001),
        Field::PresentPos => (36, 2, pos_unit),
        Field::PresentSpeed => (38, 2, speed_unit),
        Field::PresentLoad => (40, 2, 0.001),
        Field::PresentVoltage => (42, 1, 0.1),
        Field::PresentTemperature => (43, 1, 1.0),
        Field::Moving => (46, 1, 1.0),
    })
}

/// MX-64: same layout as the AX series, 0..4095 over a full turn
fn mx_64(field: Field) -> Option<Entry> {
    let pos_unit = 2.0 * PI / 4096.0;
    let speed_unit = 0.114 * RPM_TO_RAD_S;
    Some(match field {
        Field::CwAngleLimit => (6, 2, pos_unit),
        Field::CcwAngleLimit => (8, 2, pos_unit),
        Field::TorqueEnable => (24, 1, 1.0),
        Field::GoalPos => (30, 2, pos_unit),
        Field::GoalSpeed => (32, 2, speed_unit),
        Field::TorqueLimit => (34, 2, 0.001),
        Field::PresentPos => (36, 2, pos_unit),
        Field::PresentSpeed => (38, 2, speed_unit),
        Field::PresentLoad => (40, 2, 0.001),
        Field::PresentVoltage => (42, 1, 0.1),
        Field::PresentTemperature => (43, 1, 1.0),
        Field::Moving => (46, 1, 1.0),
    })
}

/// X series in Protocol 1.0 mode: extended table with 4-byte positions
fn x_series(field: Field) -> Option<Entry> {
    let pos_unit = 2.0 * PI / 4096.0;
    let speed_unit = 0.229 * RPM_TO_RAD_S;
    match field {
        Field::CcwAngleLimit => Some((48, 4, pos_unit)),
        Field::CwAngleLimit => Some((52, 4, pos_unit)),
        Field::TorqueEnable => Some((64, 1, 1.0)),
        Field::GoalSpeed => Some((104, 4, speed_unit)),
        Field::GoalPos => Some((116, 4, pos_unit)),
        Field::Moving => Some((122, 1, 1.0)),
        Field::PresentLoad => Some((126, 2, 0.001)),
        Field::PresentSpeed => Some((128, 4, speed_unit)),
        Field::PresentPos => Some((132, 4, pos_unit)),
        Field::PresentVoltage => Some((144, 2, 0.1)),
        Field::PresentTemperature => Some((146, 1, 1.0)),
        Field::TorqueLimit => None,
    }
}

type Table = fn(Field) -> Option<Entry>;

fn table_for(model: u16) -> Option<Table> {
    let table: Table = match model {
        MODEL_AX_12A => ax_12a,
        MODEL_MX_64 => mx_64,
        MODEL_XH430_W210 | MODEL_XM430_W210 => x_series,
        _ => return None,
    };
    Some(table)
}

/// Registry backed by the built-in control tables
#[derive(Debug, Clone, Default)]
pub struct MotorRegistry {
    models: HashMap<MotorId, u16>,
}

impl MotorRegistry {
    pub fn new(motors: &[MotorSpec]) -> Self {
        Self {
            models: motors.iter().map(|m| (m.id, m.model)).collect(),
        }
    }
}

impl ControlParameterRegistry for MotorRegistry {
    fn lookup(&self, id: MotorId, field: Field) -> Result<ControlParameters> {
        let model = self.lookup_model_id(id).ok_or(RegistryError::UnknownMotor { id })?;
        let table = table_for(model).ok_or(RegistryError::UnknownModel { model })?;
        let (address, byte_width, unit) =
            table(field).ok_or(RegistryError::FieldUnsupported { model, field })?;

        Ok(ControlParameters {
            address,
            byte_width,
            unit,
            model,
        })
    }

    fn lookup_model_id(&self, id: MotorId) -> Option<u16> {
        self.models.get(&id).copied()
    }
}
