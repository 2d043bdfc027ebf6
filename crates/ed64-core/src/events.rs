//! Event system for UI decoupling.
//!
//! Lets the CLI render progress without the session knowing about stdout.

use crate::protocol::Command;
use crate::state::SessionState;

/// Events emitted by the upload session.
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// Device link is up.
    DeviceOpened { vid: u16, pid: u16 },
    /// Session state changed.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Command frame written.
    CommandSent {
        command: Command,
        frame_len: usize,
        sent: usize,
    },
    /// Response read from the device.
    ResponseReceived { len: usize, ack: u8 },
    /// Data streaming is about to start.
    TransferStarted { padded_len: u64, total_chunks: u64 },
    /// One chunk written.
    ChunkSent {
        index: u64,
        total: u64,
        bytes_read: usize,
    },
    /// All chunks written.
    TransferComplete,
}

/// Observer trait for receiving loader events.
pub trait LoaderObserver {
    /// Called when an event occurs.
    fn on_event(&self, event: &LoaderEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl LoaderObserver for NullObserver {
    fn on_event(&self, _event: &LoaderEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl LoaderObserver for TracingObserver {
    fn on_event(&self, event: &LoaderEvent) {
        match event {
            LoaderEvent::DeviceOpened { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device opened");
            }
            LoaderEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State changed");
            }
            LoaderEvent::CommandSent {
                command,
                frame_len,
                sent,
            } => {
                tracing::debug!(command = %command, frame_len, sent, "Command sent");
            }
            LoaderEvent::ResponseReceived { len, ack } => {
                tracing::debug!(len, ack = %format!("0x{:02X}", ack), "Response received");
            }
            LoaderEvent::TransferStarted {
                padded_len,
                total_chunks,
            } => {
                tracing::debug!(padded_len = %format!("0x{:X}", padded_len), total_chunks, "Sending image");
            }
            LoaderEvent::ChunkSent {
                index,
                total,
                bytes_read,
            } => {
                let pct = ((index + 1) * 100) / (*total).max(1);
                tracing::trace!(index, bytes_read, progress = %format!("{}%", pct), "Chunk sent");
            }
            LoaderEvent::TransferComplete => {
                tracing::debug!("Transfer complete");
            }
        }
    }
}
