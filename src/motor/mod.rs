// Dynamixel bus access
//
// Provides:
// - Protocol 1.0 packet handling and the transport trait
// - Serial port implementation of the transport
// - Per-model control tables and the parameter registry

pub mod control_table;
#[cfg(test)]
pub(crate) mod mock;
pub mod protocol;
mod serial;

pub use control_table::{
    ByteWidth, ControlParameterRegistry, ControlParameters, Field, MotorRegistry, MotorSpec,
    RegistryError,
};
pub use protocol::{CommError, HardwareErrorFlags, MotorId, PacketHandler};
pub use serial::SerialBus;
