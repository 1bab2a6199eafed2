// Serial implementation of the Protocol 1.0 packet handler

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::protocol::{
    build_bulk_read_packet, build_packet, checksum, BulkReadParam, BulkReadResponse, CommError,
    HardwareErrorFlags, Instruction, MotorId, PacketHandler, Result, StatusPacket, HEADER,
};
use crate::config::DEFAULT_TIMEOUT_MS;

/// Dynamixel bus over a serial port
pub struct SerialBus {
    port: Box<dyn SerialPort>,
}

impl SerialBus {
    /// Open the bus at `baudrate`
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        // Drop anything left over from a previous, half-read transaction
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_status(&mut self, expected_id: MotorId) -> Result<StatusPacket> {
        read_status_from(&mut self.port, expected_id)
    }
}

/// Read one status packet from `reader`
///
/// The error byte is returned to the caller rather than turned into an
/// error, since some motors raise it on otherwise valid responses.
fn read_status_from<R: Read + ?Sized>(reader: &mut R, expected_id: MotorId) -> Result<StatusPacket> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).map_err(|e| {
        if e.kind() == std::io::ErrorKind::TimedOut {
            CommError::Timeout { id: expected_id }
        } else {
            CommError::Io(e)
        }
    })?;

    if header != HEADER {
        return Err(CommError::InvalidResponse {
            id: expected_id,
            reason: format!("Invalid header: {:02X?}", header),
        });
    }

    let mut id_length = [0u8; 2];
    reader.read_exact(&mut id_length)?;
    let id = id_length[0];
    let length = id_length[1] as usize;

    if id != expected_id {
        return Err(CommError::InvalidResponse {
            id: expected_id,
            reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
        });
    }
    if length < 2 {
        return Err(CommError::InvalidResponse {
            id,
            reason: format!("Length {} too short for a status packet", length),
        });
    }

    // error + params + checksum = length bytes
    let mut remaining = vec![0u8; length];
    reader.read_exact(&mut remaining)?;

    let mut checksum_data = vec![id, length as u8];
    checksum_data.extend_from_slice(&remaining[..remaining.len() - 1]);
    if checksum(&checksum_data) != remaining[remaining.len() - 1] {
        return Err(CommError::ChecksumMismatch { id });
    }

    Ok(StatusPacket {
        id,
        error: HardwareErrorFlags(remaining[0]),
        params: remaining[1..remaining.len() - 1].to_vec(),
    })
}

impl PacketHandler for SerialBus {
    fn read_tx_rx(&mut self, id: MotorId, address: u8, length: u8) -> Result<StatusPacket> {
        let packet = build_packet(id, Instruction::Read, &[address, length]);
        self.send_packet(&packet)?;

        let status = self.read_status(id)?;
        debug!(
            "Read {} bytes from motor {} at {}: {:02X?}",
            length, id, address, status.params
        );
        Ok(status)
    }

    fn bulk_read_tx_rx(&mut self, params: &[BulkReadParam]) -> BulkReadResponse {
        if params.is_empty() {
            return BulkReadResponse { packets: Vec::new(), result: Ok(()) };
        }
        if let Err(e) = self.port.clear(serialport::ClearBuffer::Input) {
            return BulkReadResponse { packets: Vec::new(), result: Err(e.into()) };
        }
        bulk_read_on(&mut self.port, params)
    }
}

/// Send one bulk read on `stream` and collect the answers
///
/// Stops at the first status packet that fails, keeping the ones before it.
fn bulk_read_on<S: Read + Write + ?Sized>(stream: &mut S, params: &[BulkReadParam]) -> BulkReadResponse {
    let mut packets = Vec::with_capacity(params.len());
    if params.is_empty() {
        return BulkReadResponse { packets, result: Ok(()) };
    }

    let packet = build_bulk_read_packet(params);
    debug!("Bulk read from {} motors", params.len());
    let sent = stream.write_all(&packet).and_then(|_| stream.flush());
    if let Err(e) = sent {
        return BulkReadResponse { packets, result: Err(e.into()) };
    }

    // Motors answer one after another, in request order
    for param in params {
        match read_status_from(stream, param.id) {
            Ok(status) => packets.push(status),
            Err(e) => return BulkReadResponse { packets, result: Err(e) },
        }
    }

    BulkReadResponse { packets, result: Ok(()) }
}
