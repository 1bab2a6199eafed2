// Servo telemetry: read Dynamixel Protocol 1.0 registers and convert them to SI units

pub mod config;
pub mod messages;
pub mod motor;
pub mod reader;
pub mod runtime;
