//! The TNC backend abstraction (§4.4): a uniform send/receive/PTT interface implemented over a
//! KISS-over-TCP socket, a KISS-over-serial port, or a VARA modem. Higher layers never see which
//! one they're talking to — only the capability surface below.

mod kiss_serial;
mod kiss_tcp;
pub mod vara;

use std::time::Duration;

pub use kiss_serial::KissSerial;
pub use kiss_tcp::KissTcp;
pub use vara::VaraBackend;

#[derive(Debug, thiserror::Error)]
pub enum TncError {
	#[error("transport closed")]
	TransportClosed,
	#[error("timed out waiting for a frame")]
	Timeout,
	#[error("backend returned a malformed frame: {0}")]
	BadFrame(String),
	#[error("backend refused the write: {0}")]
	WriteRefused(String),
}

/// A backend that moves already-framed AX.25 frames across a KISS transport. VARA bypasses this
/// trait entirely, using [`VaraBackend`]'s block-oriented interface instead (§4.4, §4.7).
pub trait TncBackend: Send {
	fn connect(&mut self) -> Result<(), TncError>;
	fn disconnect(&mut self) -> Result<(), TncError>;

	/// Push one AX.25 frame through the link, KISS-encoding it transparently. Returns only once
	/// the backend reports the bytes have left the software queue, not once they've gone over
	/// the air.
	fn send_frame(&mut self, ax25_frame: &[u8]) -> Result<(), TncError>;

	/// Block for up to `timeout` for the next validated AX.25 frame.
	fn receive_frame(&mut self, timeout: Duration) -> Result<Vec<u8>, TncError>;

	/// KISS backends only; VARA handles PTT internally and never receives this call.
	fn set_ptt(&mut self, on: bool) -> Result<(), TncError>;
}
