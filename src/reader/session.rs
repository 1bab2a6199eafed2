// Bulk read session: clear -> add -> tx/rx -> availability -> data

use std::collections::HashMap;

use tracing::debug;

use crate::motor::control_table::ByteWidth;
use crate::motor::protocol::{
    BulkReadParam, HardwareErrorFlags, MotorId, PacketHandler, Result, BROADCAST_ID, MAX_MOTOR_ID,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("Motor {id} is already part of the bulk read")]
    DuplicateId { id: MotorId },

    #[error("ID {id} cannot take part in a bulk read")]
    InvalidId { id: MotorId },

    #[error("Bulk read is full, at most {max} motors fit in one packet")]
    TooManyMotors { max: usize },
}

/// Entries that fit in one bulk read packet
///
/// The length byte covers instruction, leading 0x00, three bytes per entry
/// and the checksum, and must stay within 255.
pub const MAX_BULK_READ_ENTRIES: usize = (u8::MAX as usize - 3) / 3;

struct Received {
    error: HardwareErrorFlags,
    data: Vec<u8>,
}

/// Parameter list and response buffer of one bulk read transaction
#[derive(Default)]
pub struct BulkReadSession {
    params: Vec<BulkReadParam>,
    received: HashMap<MotorId, Received>,
}

impl BulkReadSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every registered motor and any data from the last transaction
    pub fn clear_params(&mut self) {
        self.params.clear();
        self.received.clear();
    }

    /// Register a motor for the next transaction
    pub fn add_param(
        &mut self,
        id: MotorId,
        address: u8,
        width: ByteWidth,
    ) -> std::result::Result<(), SessionError> {
        if id == BROADCAST_ID || id > MAX_MOTOR_ID {
            return Err(SessionError::InvalidId { id });
        }
        if self.params.iter().any(|p| p.id == id) {
            return Err(SessionError::DuplicateId { id });
        }
        if self.params.len() >= MAX_BULK_READ_ENTRIES {
            return Err(SessionError::TooManyMotors {
                max: MAX_BULK_READ_ENTRIES,
            });
        }

        self.params.push(BulkReadParam {
            id,
            address,
            length: width.bytes(),
        });
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn params(&self) -> &[BulkReadParam] {
        &self.params
    }

    /// Send the bulk read and store whatever came back
    ///
    /// Packets received before a failure are kept, so availability can
    /// still be checked per motor afterwards.
    pub fn tx_rx<B: PacketHandler + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        self.received.clear();
        let response = bus.bulk_read_tx_rx(&self.params);

        for packet in response.packets {
            if !self.params.iter().any(|p| p.id == packet.id) {
                debug!("Ignoring status packet from unrequested motor {}", packet.id);
                continue;
            }
            self.received.insert(
                packet.id,
                Received {
                    error: packet.error,
                    data: packet.params,
                },
            );
        }

        response.result
    }

    /// True if `id` answered with enough data for the requested register
    pub fn is_available(&self, id: MotorId, address: u8, width: ByteWidth) -> bool {
        let Some(param) = self.params.iter().find(|p| p.id == id) else {
            return false;
        };
        let Some(received) = self.received.get(&id) else {
            return false;
        };
        if address < param.address {
            return false;
        }

        let start = (address - param.address) as usize;
        let end = start + width.bytes() as usize;
        end <= param.length as usize && end <= received.data.len()
    }

    /// Little-endian register value, if available
    pub fn get_data(&self, id: MotorId, address: u8, width: ByteWidth) -> Option<u32> {
        if !self.is_available(id, address, width) {
            return None;
        }
        let param = self.params.iter().find(|p| p.id == id)?;
        let data = &self.received.get(&id)?.data;
        let start = (address - param.address) as usize;
        let bytes = &data[start..start + width.bytes() as usize];

        Some(
            bytes
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32),
        )
    }

    /// Error byte reported by `id` in the last transaction
    pub fn error_flags(&self, id: MotorId) -> Option<HardwareErrorFlags> {
        self.received.get(&id).map(|r| r.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::mock::MockBus;
    use crate::motor::protocol::{build_bulk_read_packet, CommError};

    #[test]
    fn test_add_param_rejects_duplicates_and_broadcast() {
        let mut session = BulkReadSession::new();
        session.add_param(1, 36, ByteWidth::Two).unwrap();
        assert_eq!(
            session.add_param(1, 36, ByteWidth::Two),
            Err(SessionError::DuplicateId { id: 1 })
        );
        assert_eq!(
            session.add_param(BROADCAST_ID, 36, ByteWidth::Two),
            Err(SessionError::InvalidId { id: BROADCAST_ID })
        );
        assert_eq!(
            session.add_param(0xFF, 36, ByteWidth::Two),
            Err(SessionError::InvalidId { id: 0xFF })
        );
        assert_eq!(session.params().len(), 1);
    }

    #[test]
    fn test_add_param_stops_at_packet_limit() {
        let mut session = BulkReadSession::new();
        for id in 0..MAX_BULK_READ_ENTRIES as u8 {
            session.add_param(id, 36, ByteWidth::Two).unwrap();
        }
        assert_eq!(
            session.add_param(MAX_BULK_READ_ENTRIES as u8, 36, ByteWidth::Two),
            Err(SessionError::TooManyMotors { max: 84 })
        );

        let packet = build_bulk_read_packet(session.params());
        assert_eq!(packet[3], 255);
        assert_eq!(packet.len(), 4 + 255);
    }

    #[test]
    fn test_clear_drops_params_and_data() {
        let mut bus = MockBus::new().with_register(1, 36, &[0x00, 0x08]);
        let mut session = BulkReadSession::new();
        session.add_param(1, 36, ByteWidth::Two).unwrap();
        session.tx_rx(&mut bus).unwrap();
        assert!(session.is_available(1, 36, ByteWidth::Two));

        session.clear_params();
        assert!(session.params().is_empty());
        assert!(!session.is_available(1, 36, ByteWidth::Two));
    }

    #[test]
    fn test_get_data_widths() {
        let mut bus = MockBus::new()
            .with_register(1, 36, &[0x34, 0x12])
            .with_register(2, 132, &[0x78, 0x56, 0x34, 0x12])
            .with_register(3, 43, &[0x2A]);
        let mut session = BulkReadSession::new();
        session.add_param(1, 36, ByteWidth::Two).unwrap();
        session.add_param(2, 132, ByteWidth::Four).unwrap();
        session.add_param(3, 43, ByteWidth::One).unwrap();
        session.tx_rx(&mut bus).unwrap();

        assert_eq!(session.get_data(1, 36, ByteWidth::Two), Some(0x1234));
        assert_eq!(session.get_data(2, 132, ByteWidth::Four), Some(0x1234_5678));
        assert_eq!(session.get_data(3, 43, ByteWidth::One), Some(42));
        // Outside the requested window
        assert_eq!(session.get_data(1, 37, ByteWidth::Two), None);
        assert_eq!(session.get_data(1, 35, ByteWidth::One), None);
        assert_eq!(session.get_data(9, 36, ByteWidth::Two), None);
    }

    #[test]
    fn test_partial_response_keeps_received_packets() {
        let mut bus = MockBus::new()
            .with_register(1, 36, &[0x00, 0x02])
            .with_register(2, 36, &[0x00, 0x02])
            .silent(2);
        let mut session = BulkReadSession::new();
        session.add_param(1, 36, ByteWidth::Two).unwrap();
        session.add_param(2, 36, ByteWidth::Two).unwrap();

        let result = session.tx_rx(&mut bus);
        assert!(matches!(result, Err(CommError::Timeout { id: 2 })));
        assert!(session.is_available(1, 36, ByteWidth::Two));
        assert!(!session.is_available(2, 36, ByteWidth::Two));
    }

    #[test]
    fn test_error_flags_are_recorded() {
        let mut bus = MockBus::new()
            .with_register(4, 36, &[0x00, 0x02])
            .with_error_flags(4, HardwareErrorFlags::INPUT_VOLTAGE);
        let mut session = BulkReadSession::new();
        session.add_param(4, 36, ByteWidth::Two).unwrap();
        session.tx_rx(&mut bus).unwrap();

        let flags = session.error_flags(4).unwrap();
        assert!(flags.contains(HardwareErrorFlags::INPUT_VOLTAGE));
        assert_eq!(session.error_flags(5), None);
    }
}
