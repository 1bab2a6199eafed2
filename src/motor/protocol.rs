// Dynamixel Protocol 1.0 transport boundary
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Status format: [0xFF, 0xFF, ID, Length, Error, Params..., Checksum]

use std::fmt;

/// Bus address of a single motor
pub type MotorId = u8;

/// Broadcast ID, every motor listens but none answers
pub const BROADCAST_ID: MotorId = 0xFE;

/// Highest ID a motor can be configured with
pub const MAX_MOTOR_ID: MotorId = 0xFD;

/// Packet header bytes
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set (read side only)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Read = 0x02,
    BulkRead = 0x92,
}

/// Communication failures at the transport level
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from motor {id}: {reason}")]
    InvalidResponse { id: MotorId, reason: String },

    #[error("Checksum mismatch for motor {id}")]
    ChecksumMismatch { id: MotorId },

    #[error("Timeout waiting for response from motor {id}")]
    Timeout { id: MotorId },
}

pub type Result<T> = std::result::Result<T, CommError>;

/// Error byte of a status packet
///
/// Bit layout: 0 input voltage, 1 angle limit, 2 overheating, 3 range,
/// 4 checksum, 5 overload, 6 instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareErrorFlags(pub u8);

impl HardwareErrorFlags {
    pub const INPUT_VOLTAGE: u8 = 1 << 0;
    pub const ANGLE_LIMIT: u8 = 1 << 1;
    pub const OVERHEATING: u8 = 1 << 2;
    pub const RANGE: u8 = 1 << 3;
    pub const CHECKSUM: u8 = 1 << 4;
    pub const OVERLOAD: u8 = 1 << 5;
    pub const INSTRUCTION: u8 = 1 << 6;

    const NAMES: [(u8, &'static str); 7] = [
        (Self::INPUT_VOLTAGE, "input voltage"),
        (Self::ANGLE_LIMIT, "angle limit"),
        (Self::OVERHEATING, "overheating"),
        (Self::RANGE, "range"),
        (Self::CHECKSUM, "checksum"),
        (Self::OVERLOAD, "overload"),
        (Self::INSTRUCTION, "instruction"),
    ];

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

impl fmt::Display for HardwareErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{} error (0x{:02X})", names.join(", "), self.0)
    }
}

/// Decoded status packet returned by a motor
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPacket {
    pub id: MotorId,
    pub error: HardwareErrorFlags,
    pub params: Vec<u8>,
}

/// One entry of a bulk read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkReadParam {
    pub id: MotorId,
    pub address: u8,
    pub length: u8,
}

/// Outcome of a bulk read transaction
///
/// `packets` holds every status packet received before `result` settled,
/// so a failed transaction can still carry usable data.
#[derive(Debug)]
pub struct BulkReadResponse {
    pub packets: Vec<StatusPacket>,
    pub result: Result<()>,
}

/// Request/response primitives of the bus
pub trait PacketHandler {
    /// Read `length` bytes starting at `address` from one motor
    fn read_tx_rx(&mut self, id: MotorId, address: u8, length: u8) -> Result<StatusPacket>;

    /// Send one bulk read and collect the status packet of every listed motor
    fn bulk_read_tx_rx(&mut self, params: &[BulkReadParam]) -> BulkReadResponse;

    /// Read a single byte, returning it with the status error byte
    fn read_1_byte_tx_rx(&mut self, id: MotorId, address: u8) -> Result<(u8, HardwareErrorFlags)> {
        let status = self.read_tx_rx(id, address, 1)?;
        let bytes = expect_len::<1>(&status)?;
        Ok((bytes[0], status.error))
    }

    /// Read two bytes (little-endian)
    fn read_2_byte_tx_rx(&mut self, id: MotorId, address: u8) -> Result<(u16, HardwareErrorFlags)> {
        let status = self.read_tx_rx(id, address, 2)?;
        let bytes = expect_len::<2>(&status)?;
        Ok((u16::from_le_bytes(bytes), status.error))
    }

    /// Read four bytes (little-endian)
    fn read_4_byte_tx_rx(&mut self, id: MotorId, address: u8) -> Result<(u32, HardwareErrorFlags)> {
        let status = self.read_tx_rx(id, address, 4)?;
        let bytes = expect_len::<4>(&status)?;
        Ok((u32::from_le_bytes(bytes), status.error))
    }
}

fn expect_len<const N: usize>(status: &StatusPacket) -> Result<[u8; N]> {
    status
        .params
        .get(..N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| CommError::InvalidResponse {
            id: status.id,
            reason: format!("Expected {} bytes, got {}", N, status.params.len()),
        })
}

/// Calculate checksum for a packet (excluding header)
pub fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    (!sum & 0xFF) as u8
}

/// Build an instruction packet with header and checksum
pub fn build_packet(id: MotorId, instruction: Instruction, params: &[u8]) -> Vec<u8> {
    let length = (params.len() + 2) as u8; // params + instruction + checksum
    let mut packet = Vec::with_capacity(6 + params.len());

    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push(length);
    packet.push(instruction as u8);
    packet.extend_from_slice(params);

    let checksum_data = &packet[2..]; // skip header
    packet.push(checksum(checksum_data));

    packet
}

/// Build the broadcast bulk read packet
///
/// Params: [0x00, len1, id1, addr1, len2, id2, addr2, ...]
pub fn build_bulk_read_packet(entries: &[BulkReadParam]) -> Vec<u8> {
    let mut params = Vec::with_capacity(1 + entries.len() * 3);
    params.push(0x00);
    for entry in entries {
        params.push(entry.length);
        params.push(entry.id);
        params.push(entry.address);
    }
    build_packet(BROADCAST_ID, Instruction::BulkRead, &params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=4, READ, Addr=36, Len=2
        let data = [1u8, 4, 0x02, 36, 2];
        // ~(1+4+2+36+2) = ~45 = 210
        assert_eq!(checksum(&data), 210);
    }

    #[test]
    fn test_build_read_packet() {
        let packet = build_packet(1, Instruction::Read, &[36, 2]);
        assert_eq!(packet, vec![0xFF, 0xFF, 1, 4, 0x02, 36, 2, 210]);
    }

    #[test]
    fn test_build_bulk_read_packet() {
        let packet = build_bulk_read_packet(&[
            BulkReadParam { id: 1, address: 36, length: 2 },
            BulkReadParam { id: 2, address: 36, length: 2 },
        ]);
        assert_eq!(packet[2], BROADCAST_ID);
        assert_eq!(packet[3], 9); // 7 params + instruction + checksum
        assert_eq!(packet[4], 0x92);
        assert_eq!(&packet[5..12], &[0x00, 2, 1, 36, 2, 2, 36]);
        assert_eq!(packet[12], checksum(&packet[2..12]));
    }

    #[test]
    fn test_error_flags_display() {
        assert_eq!(HardwareErrorFlags(0).to_string(), "none");
        let flags = HardwareErrorFlags(HardwareErrorFlags::INPUT_VOLTAGE | HardwareErrorFlags::OVERLOAD);
        assert_eq!(flags.to_string(), "input voltage, overload error (0x21)");
        assert!(flags.contains(HardwareErrorFlags::INPUT_VOLTAGE));
        assert!(!flags.contains(HardwareErrorFlags::RANGE));
    }

    struct FixedBus(Vec<u8>);

    impl PacketHandler for FixedBus {
        fn read_tx_rx(&mut self, id: MotorId, _address: u8, _length: u8) -> Result<StatusPacket> {
            Ok(StatusPacket {
                id,
                error: HardwareErrorFlags(HardwareErrorFlags::INPUT_VOLTAGE),
                params: self.0.clone(),
            })
        }

        fn bulk_read_tx_rx(&mut self, _params: &[BulkReadParam]) -> BulkReadResponse {
            BulkReadResponse { packets: Vec::new(), result: Ok(()) }
        }
    }

    #[test]
    fn test_width_primitives_little_endian() {
        let mut bus = FixedBus(vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(bus.read_1_byte_tx_rx(3, 0).unwrap().0, 0x78);
        assert_eq!(bus.read_2_byte_tx_rx(3, 0).unwrap().0, 0x5678);
        let (value, error) = bus.read_4_byte_tx_rx(3, 0).unwrap();
        assert_eq!(value, 0x1234_5678);
        assert!(error.contains(HardwareErrorFlags::INPUT_VOLTAGE));
    }

    #[test]
    fn test_short_response_is_invalid() {
        let mut bus = FixedBus(vec![0x01]);
        let err = bus.read_2_byte_tx_rx(4, 0).unwrap_err();
        assert!(matches!(err, CommError::InvalidResponse { id: 4, .. }));
    }
}
