//! Device session - drives the upload protocol.
//!
//! ```text
//! Opened --t/r--> LivenessConfirmed --c, 1s, t/r--> Filled --W + chunks--> Written --s--> BootSignaled
//!                                  \____________________________________/
//!                                     (fill skipped for images >= CRC region)
//! ```

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Level, debug, instrument, warn};

use crate::events::{LoaderEvent, LoaderObserver};
use crate::plan::{ChunkReader, PlanError, TailFill, TransferPlan, fill_blocks};
use crate::protocol::constants::*;
use crate::protocol::{AckMismatch, Command, FrameSize, check_ack};
use crate::state::SessionState;
use crate::transport::{FtdiTransport, Transport, TransportError, chip_id_wanted};

/// Tunables for an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// USB read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// USB write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Content of the unread tail of the last chunk.
    pub tail_fill: TailFill,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: USB_READ_TIMEOUT_MS,
            write_timeout_ms: USB_WRITE_TIMEOUT_MS,
            tail_fill: TailFill::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Which acknowledgement check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStage {
    /// First test exchange after opening.
    Liveness,
    /// Test exchange after the fill command.
    FillConfirm,
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStage::Liveness => write!(f, "init test"),
            CheckStage::FillConfirm => write!(f, "fill test"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{stage}: failed, got {got} - ED64 not running?")]
    NotRunning { stage: CheckStage, got: u8 },

    #[error("Failed to write chunk {index}: {source}")]
    ChunkWrite {
        index: u64,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Failed to read image: {0}")]
    Source(#[source] io::Error),

    #[error("Cannot {op} in state {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
}

impl SessionError {
    /// The device did not acknowledge; the run ends without writing.
    pub fn is_not_running(&self) -> bool {
        matches!(self, SessionError::NotRunning { .. })
    }
}

/// One upload run against one device.
pub struct DeviceSession<T: Transport, O: LoaderObserver> {
    transport: T,
    observer: O,
    config: SessionConfig,
    state: SessionState,
}

impl<O: LoaderObserver> DeviceSession<FtdiTransport, O> {
    /// Open the EverDrive-64 USB port and start a session on it.
    #[instrument(skip_all)]
    pub fn open(config: SessionConfig, observer: O) -> Result<Self, SessionError> {
        let transport = FtdiTransport::open(FTDI_VENDOR_ID, ED64_PRODUCT_ID)?;

        if chip_id_wanted(transport.chip_type(), tracing::enabled!(Level::DEBUG)) {
            match transport.read_chip_id() {
                Ok(Some(chip_id)) => debug!(chip_id = %format!("{:08X}", chip_id), "FTDI chip id"),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "Could not read FTDI chip id"),
            }
        }

        Ok(Self::new(transport, config, observer))
    }
}

impl<T: Transport, O: LoaderObserver> DeviceSession<T, O> {
    /// Start a session on an already open transport.
    pub fn new(mut transport: T, config: SessionConfig, observer: O) -> Self {
        transport.set_timeouts(config.read_timeout(), config.write_timeout());
        observer.on_event(&LoaderEvent::DeviceOpened {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });

        let mut session = Self {
            transport,
            observer,
            config,
            state: SessionState::Idle,
        };
        session.set_state(SessionState::Opened);
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the whole sequence: liveness, optional fill, write, boot.
    #[instrument(skip(self, source), fields(raw_len = plan.raw_len()))]
    pub fn upload<R: Read>(&mut self, plan: &TransferPlan, source: R) -> Result<(), SessionError> {
        debug!(
            raw_len = plan.raw_len(),
            padded_len = %format!("0x{:X}", plan.padded_len()),
            "Transfer plan"
        );

        self.check_liveness()?;
        if plan.needs_fill() {
            debug!("Needs filling");
            self.fill()?;
        }
        self.write_image(plan, source)?;
        self.boot()
    }

    /// Send a full-size test frame and require the ready acknowledgement.
    pub fn check_liveness(&mut self) -> Result<(), SessionError> {
        self.require("run liveness test", &[SessionState::Opened])?;
        let result = self.test_exchange(FrameSize::Full, CheckStage::Liveness);
        self.advance(result, SessionState::LivenessConfirmed)?;
        debug!("Init test: ok");
        Ok(())
    }

    /// Fill the CRC region, wait for the erase, and confirm with a test.
    pub fn fill(&mut self) -> Result<(), SessionError> {
        self.require("fill", &[SessionState::LivenessConfirmed])?;
        let result = self.fill_and_confirm();
        self.advance(result, SessionState::Filled)?;
        debug!("Fill test: ok");
        Ok(())
    }

    /// Announce the write and stream every chunk of `source`.
    pub fn write_image<R: Read>(
        &mut self,
        plan: &TransferPlan,
        source: R,
    ) -> Result<(), SessionError> {
        self.require(
            "write",
            &[SessionState::LivenessConfirmed, SessionState::Filled],
        )?;
        let result = self.stream(plan, source);
        self.advance(result, SessionState::Written)
    }

    /// Tell the device to boot the written image. Nothing is read back.
    pub fn boot(&mut self) -> Result<(), SessionError> {
        self.require("boot", &[SessionState::Written])?;
        let result = self.send_command(Command::Boot, FrameSize::Short).map(|_| ());
        self.advance(result, SessionState::BootSignaled)?;
        debug!("PIF boot simulation instructed");
        Ok(())
    }

    /// Release the transport.
    pub fn close(&mut self) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::InvalidState {
                op: "close",
                state: self.state,
            });
        }
        let result = self.transport.close().map_err(SessionError::from);
        self.advance(result, SessionState::Closed)
    }

    fn fill_and_confirm(&mut self) -> Result<(), SessionError> {
        self.send_command(
            Command::Fill {
                offset: ROM_BASE_ADDRESS,
                blocks: fill_blocks(),
            },
            FrameSize::Short,
        )?;

        thread::sleep(FILL_SETTLE);

        self.test_exchange(FrameSize::Short, CheckStage::FillConfirm)
    }

    fn stream<R: Read>(&mut self, plan: &TransferPlan, source: R) -> Result<(), SessionError> {
        let blocks = plan.write_blocks()?;
        let sent = self.send_command(
            Command::Write {
                offset: ROM_BASE_ADDRESS,
                blocks,
            },
            FrameSize::Short,
        )?;
        debug!(sent, "Sent write command");

        let mut chunks = ChunkReader::new(source, plan, self.config.tail_fill);
        let total = chunks.total();
        self.observer.on_event(&LoaderEvent::TransferStarted {
            padded_len: plan.padded_len(),
            total_chunks: total,
        });

        while let Some(chunk) = chunks.next_chunk().map_err(SessionError::Source)? {
            let written = self
                .transport
                .write(chunk.data)
                .map_err(|source| SessionError::ChunkWrite {
                    index: chunk.index,
                    source,
                })?;
            if written < chunk.data.len() {
                warn!(
                    index = chunk.index,
                    written,
                    expected = chunk.data.len(),
                    "Short chunk write"
                );
            }
            self.observer.on_event(&LoaderEvent::ChunkSent {
                index: chunk.index,
                total,
                bytes_read: chunk.bytes_read,
            });
        }

        self.observer.on_event(&LoaderEvent::TransferComplete);
        Ok(())
    }

    fn test_exchange(&mut self, size: FrameSize, stage: CheckStage) -> Result<(), SessionError> {
        self.send_command(Command::Test, size)?;

        let mut response = [0u8; FULL_FRAME_LEN];
        let len = self.transport.read(&mut response[..size.len()])?;
        self.observer.on_event(&LoaderEvent::ResponseReceived {
            len,
            ack: response[OP_OFFSET],
        });

        check_ack(&response[..size.len()])
            .map_err(|AckMismatch { got }| SessionError::NotRunning { stage, got })
    }

    fn send_command(&mut self, command: Command, size: FrameSize) -> Result<usize, SessionError> {
        let mut frame = [0u8; FULL_FRAME_LEN];
        let frame = &mut frame[..size.len()];
        command.encode_into(frame);

        let sent = self.transport.write(frame)?;
        if sent < frame.len() {
            warn!(command = %command, sent, expected = frame.len(), "Short command write");
        }
        self.observer.on_event(&LoaderEvent::CommandSent {
            command,
            frame_len: frame.len(),
            sent,
        });
        Ok(sent)
    }

    fn require(&self, op: &'static str, allowed: &[SessionState]) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    fn advance(
        &mut self,
        result: Result<(), SessionError>,
        next: SessionState,
    ) -> Result<(), SessionError> {
        match result {
            Ok(()) => {
                self.set_state(next);
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Faulted);
                Err(e)
            }
        }
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        debug_assert!(from.can_transition(to), "{from} -> {to}");
        self.state = to;
        self.observer
            .on_event(&LoaderEvent::StateChanged { from, to });
    }
}
