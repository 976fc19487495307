//! The scheduler & PTT gate (§4.8): the single thread that owns the TNC backend exclusively while
//! a session is active. A background reader thread feeds a bounded queue so `recv` never blocks
//! the backend's own lock for long; every other operation — PTT gating, inter-frame spacing,
//! session-id filtering (§8 property 7) — happens right here. §9 explicitly permits this
//! blocking-thread rendering of the cooperative-task model described in the design notes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver as MpscReceiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, warn};
use utils::error::Ext;

use crate::ax25;
use crate::config::Config;
use crate::events::{Category, Event, EventTap};
use crate::packet::{MessageType, Packet, SessionId};
use crate::segmentation::PacketChannel;
use crate::tnc::TncBackend;

/// Bound on the inbound frame queue between the reader thread and the scheduler loop (§5).
const QUEUE_DEPTH: usize = 64;

/// Owns a [`TncBackend`] and turns it into a [`PacketChannel`]: encodes outgoing packets to
/// AX.25, enforces the PTT/TX-tail/RX-delay sequence and inter-frame spacing from §4.8, decodes
/// and CRC-validates incoming frames, and discards (with a `Warning` event) any packet whose
/// session_id doesn't match the session currently in flight.
pub struct Scheduler<B> {
	backend: Arc<Mutex<B>>,
	config: Config,
	events: Arc<EventTap>,
	active_session: Option<SessionId>,
	inbound: MpscReceiver<Vec<u8>>,
	shutdown: Arc<AtomicBool>,
	/// Set by the reader thread once the backend reports something other than an ordinary
	/// timeout, so `recv`'s caller can tell a dead transport apart from a quiet one.
	closed: Arc<AtomicBool>,
	reader: Option<JoinHandle<()>>,
	last_tx: Option<Instant>,
}

impl<B: TncBackend + 'static> Scheduler<B> {
	pub fn new(mut backend: B, config: Config, events: Arc<EventTap>) -> Result<Self, crate::tnc::TncError> {
		backend.connect()?;

		let backend = Arc::new(Mutex::new(backend));
		let (tx, rx) = mpsc::sync_channel(QUEUE_DEPTH);
		let shutdown = Arc::new(AtomicBool::new(false));
		let closed = Arc::new(AtomicBool::new(false));

		let reader_backend = backend.clone();
		let reader_shutdown = shutdown.clone();
		let reader_closed = closed.clone();
		let reader = std::thread::spawn(move || reader_loop(reader_backend, tx, reader_shutdown, reader_closed));

		Ok(Self { backend, config, events, active_session: None, inbound: rx, shutdown, closed, reader: Some(reader), last_tx: None })
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Stop the reader thread and release the backend. Idempotent.
	pub fn shutdown(&mut self) {
		self.shutdown.store(true, Ordering::Relaxed);

		if let Some(handle) = self.reader.take() {
			let _ = handle.join();
		}

		if let Ok(mut backend) = self.backend.lock() {
			if let Err(e) = backend.disconnect() {
				warn!("error disconnecting TNC backend during shutdown: {e}");
			}
		}
	}

	fn enforce_inter_frame_spacing(&self) {
		if let Some(last) = self.last_tx {
			let min_gap = self.config.pacing.packet_send_delay();
			let elapsed = last.elapsed();
			if elapsed < min_gap {
				std::thread::sleep(min_gap - elapsed);
			}
		}
	}
}

impl<B> Drop for Scheduler<B> {
	fn drop(&mut self) {
		self.shutdown.store(true, Ordering::Relaxed);
		if let Some(handle) = self.reader.take() {
			let _ = handle.join();
		}
	}
}

fn reader_loop<B: TncBackend>(backend: Arc<Mutex<B>>, tx: SyncSender<Vec<u8>>, shutdown: Arc<AtomicBool>, closed: Arc<AtomicBool>) {
	while !shutdown.load(Ordering::Relaxed) {
		let frame = match backend.lock() {
			Ok(mut backend) => backend.receive_frame(Duration::from_millis(200)),
			Err(_) => {
				closed.store(true, Ordering::Relaxed);
				return;
			}
		};

		match frame {
			Ok(bytes) => {
				if tx.send(bytes).is_err() {
					return;
				}
			}
			Err(crate::tnc::TncError::Timeout) => continue,
			Err(e) => {
				warn!("TNC reader thread stopping: {e}");
				closed.store(true, Ordering::Relaxed);
				return;
			}
		}
	}
}

fn describe_body(kind: MessageType, body: &[u8]) -> String {
	match kind {
		MessageType::Ack | MessageType::PktMissing => String::from_utf8_lossy(body).into_owned(),
		_ => format!("{} bytes", body.len()),
	}
}

/// Estimate on-air transmission time from `baud_rate`, informational only (§6).
fn estimate_tx_seconds(config: &Config, frame_len: usize) -> f64 {
	let bits = frame_len * 8;
	bits as f64 / config.baud_rate.max(1) as f64
}

impl<B: TncBackend + 'static> PacketChannel for Scheduler<B> {
	fn send(&mut self, packet: &Packet) -> utils::error::Result {
		let Some(encoded) = packet.encode(self.config.max_packet_size).ok_or(|e| warn!("failed to encode outgoing packet: {e}")) else {
			return Err(());
		};
		let frame = ax25::encode(&self.config.remote_callsign, &self.config.local_callsign, &encoded);

		self.enforce_inter_frame_spacing();

		let sent = {
			let mut backend = self.backend.lock().expect("TNC backend mutex poisoned");

			if let Err(e) = backend.set_ptt(true) {
				warn!("failed to assert PTT: {e}");
			}
			std::thread::sleep(self.config.ptt.ptt_tx_delay());

			let sent = backend.send_frame(&frame);

			std::thread::sleep(self.config.ptt.ptt_tail());
			if let Err(e) = backend.set_ptt(false) {
				warn!("failed to drop PTT: {e}");
			}
			std::thread::sleep(self.config.ptt.ptt_rx_delay());

			sent
		};

		self.last_tx = Some(Instant::now());

		let Some(()) = sent.ok_or(|e| warn!("send_frame failed: {e}")) else {
			return Err(());
		};

		self.events.emit(Event::SendingPacket {
			kind: packet.kind,
			seq: packet.seq,
			total: packet.total,
			estimated_secs: estimate_tx_seconds(&self.config, frame.len()),
		});

		Ok(())
	}

	fn recv(&mut self, timeout: Duration) -> Option<Packet> {
		let deadline = Instant::now() + timeout;

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return None;
			}

			let frame = match self.inbound.recv_timeout(remaining) {
				Ok(frame) => frame,
				Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
			};

			let ui = match ax25::decode(&frame) {
				Ok(ui) => ui,
				Err(e) => {
					debug!("discarding frame with bad AX.25 framing: {e}");
					continue;
				}
			};

			let pkt = match Packet::decode(&ui.payload) {
				Ok(pkt) => pkt,
				Err(e) => {
					debug!("discarding packet with bad CRC/format: {e}");
					continue;
				}
			};

			if let Some(active) = self.active_session {
				if pkt.session_id != active {
					warn!("discarding packet for foreign session_id {} (active is {active})", pkt.session_id);
					self.events.emit(Event::Text(
						Category::Warning,
						format!("ProtocolViolation: session_id {} does not match active session {active}", pkt.session_id),
					));
					continue;
				}
			}

			self.events.emit(Event::ReceivedControl { kind: pkt.kind, content: describe_body(pkt.kind, &pkt.body) });

			return Some(pkt);
		}
	}

	fn set_active_session(&mut self, session_id: Option<SessionId>) {
		self.active_session = session_id;
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Relaxed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::callsign::Callsign;
	use crate::packet::ack_body;

	struct LoopbackBackend {
		queued: Vec<Vec<u8>>,
		ptt_calls: Vec<bool>,
	}

	impl TncBackend for LoopbackBackend {
		fn connect(&mut self) -> Result<(), crate::tnc::TncError> {
			Ok(())
		}

		fn disconnect(&mut self) -> Result<(), crate::tnc::TncError> {
			Ok(())
		}

		fn send_frame(&mut self, ax25_frame: &[u8]) -> Result<(), crate::tnc::TncError> {
			self.queued.push(ax25_frame.to_vec());
			Ok(())
		}

		fn receive_frame(&mut self, _timeout: Duration) -> Result<Vec<u8>, crate::tnc::TncError> {
			self.queued.pop().ok_or(crate::tnc::TncError::Timeout)
		}

		fn set_ptt(&mut self, on: bool) -> Result<(), crate::tnc::TncError> {
			self.ptt_calls.push(on);
			Ok(())
		}
	}

	#[test]
	fn send_then_recv_round_trips_through_the_real_codecs() {
		let local = Callsign::new("CALL1", 1).unwrap();
		let remote = Callsign::new("CALL2", 2).unwrap();
		let config = Config::new(local, remote);
		let events = Arc::new(EventTap::new());

		let backend = LoopbackBackend { queued: Vec::new(), ptt_calls: Vec::new() };
		let mut scheduler = Scheduler::new(backend, config, events).unwrap();

		let sid = SessionId::from_u32(1);
		scheduler.set_active_session(Some(sid));

		let pkt = Packet::control(sid, MessageType::Ack, ack_body(7));
		scheduler.send(&pkt).unwrap();

		let received = scheduler.recv(Duration::from_millis(500)).expect("loopback frame should decode");
		assert_eq!(received.kind, MessageType::Ack);
		assert_eq!(received.session_id, sid);

		scheduler.shutdown();
	}

	#[test]
	fn foreign_session_id_is_discarded() {
		let local = Callsign::new("CALL1", 1).unwrap();
		let remote = Callsign::new("CALL2", 2).unwrap();
		let config = Config::new(local, remote);
		let events = Arc::new(EventTap::new());

		let backend = LoopbackBackend { queued: Vec::new(), ptt_calls: Vec::new() };
		let mut scheduler = Scheduler::new(backend, config, events).unwrap();

		scheduler.set_active_session(Some(SessionId::from_u32(99)));

		let foreign = Packet::control(SessionId::from_u32(1), MessageType::Ack, ack_body(1));
		scheduler.send(&foreign).unwrap();

		assert!(scheduler.recv(Duration::from_millis(200)).is_none());
		scheduler.shutdown();
	}

	struct DyingBackend;

	impl TncBackend for DyingBackend {
		fn connect(&mut self) -> Result<(), crate::tnc::TncError> {
			Ok(())
		}

		fn disconnect(&mut self) -> Result<(), crate::tnc::TncError> {
			Ok(())
		}

		fn send_frame(&mut self, _ax25_frame: &[u8]) -> Result<(), crate::tnc::TncError> {
			Ok(())
		}

		fn receive_frame(&mut self, _timeout: Duration) -> Result<Vec<u8>, crate::tnc::TncError> {
			Err(crate::tnc::TncError::TransportClosed)
		}

		fn set_ptt(&mut self, _on: bool) -> Result<(), crate::tnc::TncError> {
			Ok(())
		}
	}

	#[test]
	fn transport_closed_is_distinguished_from_an_ordinary_timeout() {
		let local = Callsign::new("CALL1", 1).unwrap();
		let remote = Callsign::new("CALL2", 2).unwrap();
		let config = Config::new(local, remote);
		let events = Arc::new(EventTap::new());

		let mut scheduler = Scheduler::new(DyingBackend, config, events).unwrap();

		assert!(scheduler.recv(Duration::from_millis(500)).is_none());
		assert!(scheduler.is_closed());

		scheduler.shutdown();
	}
}
