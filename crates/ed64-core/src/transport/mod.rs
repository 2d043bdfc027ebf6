//! Transport layer module.

pub mod ftdi;
pub mod mock;
pub mod traits;

pub use ftdi::{ChipType, FtdiTransport, chip_id_wanted};
pub use mock::MockTransport;
pub use traits::{Transport, TransportError};
