// One read per motor, for models that cannot join a bulk read

use crate::motor::control_table::ByteWidth;
use crate::motor::protocol::{HardwareErrorFlags, MotorId, PacketHandler, Result};

/// Read one register of `width` bytes and widen it to u32
pub fn read_raw<B: PacketHandler + ?Sized>(
    bus: &mut B,
    id: MotorId,
    address: u8,
    width: ByteWidth,
) -> Result<(u32, HardwareErrorFlags)> {
    match width {
        ByteWidth::One => bus
            .read_1_byte_tx_rx(id, address)
            .map(|(value, error)| (value as u32, error)),
        ByteWidth::Two => bus
            .read_2_byte_tx_rx(id, address)
            .map(|(value, error)| (value as u32, error)),
        ByteWidth::Four => bus.read_4_byte_tx_rx(id, address),
    }
}
