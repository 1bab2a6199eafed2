// In-memory motor bus for tests

use std::collections::{HashMap, HashSet};

use super::protocol::{
    BulkReadParam, BulkReadResponse, CommError, HardwareErrorFlags, MotorId, PacketHandler,
    Result, StatusPacket,
};

const MEMORY_SIZE: usize = 256;

/// Motors with a flat register memory; unknown or silent motors time out
#[derive(Default)]
pub struct MockBus {
    memory: HashMap<MotorId, Vec<u8>>,
    errors: HashMap<MotorId, u8>,
    silent: HashSet<MotorId>,
    /// Every bulk read request, in order
    pub bulk_requests: Vec<Vec<BulkReadParam>>,
    /// Every single read as (id, address, length)
    pub single_reads: Vec<(MotorId, u8, u8)>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_register(mut self, id: MotorId, address: u8, bytes: &[u8]) -> Self {
        self.set_register(id, address, bytes);
        self
    }

    pub fn with_error_flags(mut self, id: MotorId, flags: u8) -> Self {
        self.errors.insert(id, flags);
        self
    }

    pub fn silent(mut self, id: MotorId) -> Self {
        self.silent.insert(id);
        self
    }

    pub fn set_register(&mut self, id: MotorId, address: u8, bytes: &[u8]) {
        let memory = self.memory.entry(id).or_insert_with(|| vec![0; MEMORY_SIZE]);
        let start = address as usize;
        memory[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn respond(&self, id: MotorId, address: u8, length: u8) -> Result<StatusPacket> {
        if self.silent.contains(&id) {
            return Err(CommError::Timeout { id });
        }
        let memory = self.memory.get(&id).ok_or(CommError::Timeout { id })?;
        let start = address as usize;
        let end = (start + length as usize).min(MEMORY_SIZE);

        Ok(StatusPacket {
            id,
            error: HardwareErrorFlags(self.errors.get(&id).copied().unwrap_or(0)),
            params: memory[start..end].to_vec(),
        })
    }
}

impl PacketHandler for MockBus {
    fn read_tx_rx(&mut self, id: MotorId, address: u8, length: u8) -> Result<StatusPacket> {
        self.single_reads.push((id, address, length));
        self.respond(id, address, length)
    }

    fn bulk_read_tx_rx(&mut self, params: &[BulkReadParam]) -> BulkReadResponse {
        self.bulk_requests.push(params.to_vec());

        let mut packets = Vec::new();
        for param in params {
            match self.respond(param.id, param.address, param.length) {
                Ok(packet) => packets.push(packet),
                Err(e) => return BulkReadResponse { packets, result: Err(e) },
            }
        }
        BulkReadResponse { packets, result: Ok(()) }
    }
}
