//! The VARA mode adapter (§4.7). VARA already gives a reliable in-order stream, so this replaces
//! the §4.5 segmentation protocol with a thin length-prefixed framing layer: one block per logical
//! message, then a one-byte DONE/DONE_ACK handshake before requesting disconnect. PTT belongs to
//! VARA; nothing in this module ever touches it. Progress reporting is phase-based rather than
//! packet-based — there is no seq/total to report against.

use std::time::{Duration, Instant};

use crate::tnc::vara::VaraBackend;
use crate::tnc::TncError;

const DONE_MARKER: u8 = 0xFF;
const DONE_ACK_MARKER: u8 = 0xFE;
const READ_CHUNK: usize = 4096;

/// What the adapter needs from the modem: push one opaque block, and read whatever bytes are
/// available up to `max_len` within `timeout`. Block boundaries are not assumed to line up with
/// `send_block` calls — the adapter buffers and re-slices on top.
pub trait BlockChannel {
	fn send_block(&mut self, block: &[u8]) -> Result<(), TncError>;
	fn recv_block(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TncError>;
}

impl BlockChannel for VaraBackend {
	fn send_block(&mut self, block: &[u8]) -> Result<(), TncError> {
		VaraBackend::send_block(self, block)
	}

	fn recv_block(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TncError> {
		VaraBackend::recv_block(self, max_len, timeout)
	}
}

pub struct VaraAdapter<C> {
	channel: C,
	buf: Vec<u8>,
}

impl<C: BlockChannel> VaraAdapter<C> {
	pub fn new(channel: C) -> Self {
		Self { channel, buf: Vec::new() }
	}

	fn fill_at_least(&mut self, n: usize, deadline: Instant) -> Result<(), TncError> {
		while self.buf.len() < n {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(TncError::Timeout);
			}

			let chunk = self.channel.recv_block(READ_CHUNK, remaining)?;
			if chunk.is_empty() {
				return Err(TncError::TransportClosed);
			}
			self.buf.extend_from_slice(&chunk);
		}

		Ok(())
	}

	fn take(&mut self, n: usize) -> Vec<u8> {
		self.buf.drain(..n).collect()
	}

	/// Send one length-prefixed application block (§4.7 step 1/2).
	pub fn send_block(&mut self, body: &[u8]) -> Result<(), TncError> {
		let mut framed = Vec::with_capacity(4 + body.len());
		framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
		framed.extend_from_slice(body);
		self.channel.send_block(&framed)
	}

	/// Read one length-prefixed application block.
	pub fn recv_block(&mut self, timeout: Duration) -> Result<Vec<u8>, TncError> {
		let deadline = Instant::now() + timeout;

		self.fill_at_least(4, deadline)?;
		let header = self.take(4);
		let len = u32::from_be_bytes(header.try_into().expect("exactly 4 bytes")) as usize;

		self.fill_at_least(len, deadline)?;
		Ok(self.take(len))
	}

	/// Initiator side of §4.7 step 3: send the DONE marker, wait for DONE_ACK.
	pub fn send_done_and_await_ack(&mut self, timeout: Duration) -> Result<(), TncError> {
		self.channel.send_block(&[DONE_MARKER])?;

		let deadline = Instant::now() + timeout;
		self.fill_at_least(1, deadline)?;
		let marker = self.take(1)[0];

		if marker != DONE_ACK_MARKER {
			return Err(TncError::BadFrame(format!("expected DONE_ACK marker, got {marker:#x}")));
		}

		Ok(())
	}

	/// Peer side of §4.7 step 3: wait for the DONE marker, send DONE_ACK back.
	pub fn await_done_then_ack(&mut self, timeout: Duration) -> Result<(), TncError> {
		let deadline = Instant::now() + timeout;
		self.fill_at_least(1, deadline)?;
		let marker = self.take(1)[0];

		if marker != DONE_MARKER {
			return Err(TncError::BadFrame(format!("expected DONE marker, got {marker:#x}")));
		}

		self.channel.send_block(&[DONE_ACK_MARKER])
	}

	/// Initiator: the full §4.7 exchange for a pull — send the request block, read the response
	/// block, then the DONE handshake. Disconnecting the modem itself is the caller's job, same as
	/// in the KISS path, since it also owns CONNECT/session bookkeeping above this layer.
	pub fn request(&mut self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, TncError> {
		self.send_block(request)?;
		let response = self.recv_block(timeout)?;
		self.send_done_and_await_ack(timeout)?;
		Ok(response)
	}

	/// Responder: read one request block, hand it to `handle`, send the response, then complete
	/// the DONE handshake from the peer side.
	pub fn serve_once(&mut self, timeout: Duration, handle: impl FnOnce(&[u8]) -> Vec<u8>) -> Result<(), TncError> {
		let request = self.recv_block(timeout)?;
		let response = handle(&request);
		self.send_block(&response)?;
		self.await_done_then_ack(timeout)
	}

	/// Initiator: the push-shaped half of §4.7 — one block out, then the DONE handshake, with no
	/// response block expected back.
	pub fn push(&mut self, payload: &[u8], timeout: Duration) -> Result<(), TncError> {
		self.send_block(payload)?;
		self.send_done_and_await_ack(timeout)
	}

	/// Responder: the mirror of `push` — read the pushed block, then complete the DONE handshake.
	pub fn serve_push(&mut self, timeout: Duration) -> Result<Vec<u8>, TncError> {
		let payload = self.recv_block(timeout)?;
		self.await_done_then_ack(timeout)?;
		Ok(payload)
	}

	pub fn inner_mut(&mut self) -> &mut C {
		&mut self.channel
	}
}
