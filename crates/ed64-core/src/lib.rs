//! ED64-Core: EverDrive-64 USB upload protocol in Rust.
//!
//! Uploads a raw ROM image to the cartridge's SDRAM over its FTDI USB port
//! and asks the cartridge to boot it.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, `cmd` frame encoding, acknowledgement checks
//! - **Transport**: USB communication abstraction (FTDI over nusb, mock)
//! - **Plan**: Padded transfer length, fill decision, chunk reader
//! - **State**: Session state machine
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use ed64_core::{DeviceSession, SessionConfig, TracingObserver, TransferPlan};
//!
//! let plan = TransferPlan::for_file("rom.z64").expect("stat failed");
//! let image = std::fs::File::open("rom.z64").expect("open failed");
//!
//! let mut session = DeviceSession::open(SessionConfig::default(), TracingObserver)
//!     .expect("no device");
//! session.upload(&plan, image).expect("upload failed");
//! session.close().expect("close failed");
//! ```

pub mod events;
pub mod plan;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use events::{LoaderEvent, LoaderObserver, NullObserver, TracingObserver};
pub use plan::{ChunkReader, PlanError, TailFill, TransferPlan};
pub use protocol::{AckMismatch, Command, FrameSize, ProtocolError};
pub use session::{CheckStage, DeviceSession, SessionConfig, SessionError};
pub use state::SessionState;
pub use transport::{FtdiTransport, MockTransport, Transport, TransportError};
