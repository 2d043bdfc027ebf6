//! Protocol module - EverDrive-64 USB command definitions.

pub mod command;
pub mod constants;

pub use command::{AckMismatch, Command, FrameSize, ProtocolError, check_ack};
pub use constants::*;
