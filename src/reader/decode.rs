// Raw register value -> SI quantity
//
// Multi-turn positions are signed on the motor but travel as unsigned
// values, so anything above OVERFLOW_THRESHOLD is a negative position that
// wrapped around UINT_OVERFLOW. Both constants are fixed by the protocol,
// whatever the register width.

use crate::motor::control_table::{
    Field, MODEL_AX_12A, MODEL_MX_64, MODEL_XH430_W210, MODEL_XM430_W210,
};

pub const OVERFLOW_THRESHOLD: i64 = 28672;
pub const UINT_OVERFLOW: i64 = 65535;

/// Highest raw position count per model
const MAX_POSITION: [(u16, u32); 4] = [
    (MODEL_XM430_W210, 4095),
    (MODEL_XH430_W210, 4095),
    (MODEL_MX_64, 4095),
    (MODEL_AX_12A, 1023),
];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("Model {model} is unknown, cannot calculate angle from position")]
    UnknownModel { model: u16 },
}

/// Position range of a motor model
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionRange {
    Known { max_position: u32 },
    Unknown,
}

impl PositionRange {
    pub fn of(model: u16) -> Self {
        MAX_POSITION
            .iter()
            .find(|(m, _)| *m == model)
            .map_or(PositionRange::Unknown, |&(_, max_position)| {
                PositionRange::Known { max_position }
            })
    }
}

/// Undo the unsigned wraparound of a multi-turn position
pub fn correct_overflow(raw: u32) -> i64 {
    let raw = raw as i64;
    if raw > OVERFLOW_THRESHOLD {
        raw - UINT_OVERFLOW
    } else {
        raw
    }
}

/// Map a corrected position to an angle centred on the middle of the range
pub fn position_to_angle(position: i64, model: u16, unit: f32) -> Result<f32, DecodeError> {
    match PositionRange::of(model) {
        PositionRange::Known { max_position } => {
            let centre = max_position as f64 / 2.0;
            Ok(((position as f64 - centre) * unit as f64) as f32)
        }
        PositionRange::Unknown => Err(DecodeError::UnknownModel { model }),
    }
}

/// Convert a raw register value of `field` into its physical quantity
pub fn decode(raw: u32, field: Field, model: u16, unit: f32) -> Result<f32, DecodeError> {
    if field.is_position() {
        position_to_angle(correct_overflow(raw), model, unit)
    } else {
        Ok(raw as f32 * unit)
    }
}
