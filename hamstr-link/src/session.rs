//! The session state machine (§4.6): CONNECT / DATA_REQUEST / READY / transfer / DONE / DISCONNECT,
//! role-aware (initiator vs. responder). All mutation happens on the single thread that owns the
//! `Session`; there is no locking here because §5 already guarantees only one session loop ever
//! touches this state.

use std::time::Duration;

use log::{debug, warn};

use crate::callsign::Callsign;
use crate::config::Config;
use crate::error::{LinkError, Phase};
use crate::events::{Category, Event, EventTap};
use crate::packet::{MessageType, Packet, SessionId};
use crate::segmentation::{chunk, PacketChannel, Receiver, ReceiveResult, SendResult, Sender};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
	Initiator,
	Responder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
	Idle,
	Connecting,
	Connected,
	Requesting,
	ReadyTx,
	Receiving,
	Sending,
	Delivered,
	Disconnecting,
	Closed,
	Failed,
}

/// Whether a DATA_REQUEST announces that the initiator wants something back (a pull, handled by
/// `request_payload`) or has something to push (a send, handled by `send_payload`). Encoded as a
/// one-byte prefix on the DATA_REQUEST body so the responder knows which direction to take after
/// the READY handshake — the table in §4.6 names the shared `want_request` transition but doesn't
/// spell out how the two directions are told apart on the wire, so this is this crate's choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
	Pull,
	Push,
}

fn encode_request(direction: Direction, kind: &str, params: &[u8]) -> Vec<u8> {
	let tag = match direction {
		Direction::Pull => b'P',
		Direction::Push => b'S',
	};
	let mut out = vec![tag, b'|'];
	out.extend_from_slice(kind.as_bytes());
	out.push(b'|');
	out.extend_from_slice(params);
	out
}

fn decode_request(body: &[u8]) -> Option<(Direction, String, Vec<u8>)> {
	let mut parts = body.splitn(3, |&b| b == b'|');
	let tag = parts.next()?;
	let kind = parts.next()?;
	let params = parts.next().unwrap_or(&[]);

	let direction = match tag {
		b"P" => Direction::Pull,
		b"S" => Direction::Push,
		_ => return None,
	};

	Some((direction, String::from_utf8_lossy(kind).into_owned(), params.to_vec()))
}

/// Produces RESPONSE bodies and consumes pushed payloads on the responder side. The payload
/// itself (NOSTR relay access, Lightning invoice issuance) is an external collaborator (§1).
pub trait Responder {
	fn handle_data_request(&mut self, request_kind: &str, params: &[u8]) -> Vec<u8>;
	fn handle_pushed_payload(&mut self, kind: MessageType, payload: &[u8]);
}

pub struct Session<'a, C> {
	channel: &'a mut C,
	config: &'a Config,
	events: &'a EventTap,
	role: Role,
	state: State,
	session_id: Option<SessionId>,
}

impl<'a, C: PacketChannel> Session<'a, C> {
	pub fn new(channel: &'a mut C, config: &'a Config, events: &'a EventTap, role: Role) -> Self {
		Self { channel, config, events, role, state: State::Idle, session_id: None }
	}

	/// Rebuild a `Session` handle around a `state`/`session_id` pair saved from a previous call.
	/// `Session` itself never outlives a single operation — the channel it borrows is owned by the
	/// long-lived link above it — so callers that need to span multiple `request_payload`/
	/// `send_payload` calls on one CONNECTed session (§4.6: `ensure_connected` accepts CONNECTED or
	/// DELIVERED) persist just this pair between calls and resume here instead.
	pub fn resume(channel: &'a mut C, config: &'a Config, events: &'a EventTap, role: Role, state: State, session_id: Option<SessionId>) -> Self {
		Self { channel, config, events, role, state, session_id }
	}

	pub fn state(&self) -> State {
		self.state
	}

	pub fn session_id(&self) -> Option<SessionId> {
		self.session_id
	}

	fn emit(&self, event: Event) {
		self.events.emit(event);
	}

	fn sid(&self) -> SessionId {
		self.session_id.expect("session_id is set before any packet-bearing state is entered")
	}

	fn fail(&mut self, reason: impl Into<String>) -> LinkError {
		self.state = State::Failed;
		let reason = reason.into();
		warn!("session failed: {reason}");
		self.emit(Event::Text(Category::Error, reason.clone()));
		LinkError::ProtocolViolation(reason)
	}

	/// Tell a genuinely dead transport apart from an ordinary timeout (§7): the former means no
	/// further operation on this handle can ever succeed, the latter just means this attempt
	/// didn't get a reply in time.
	fn timeout_or_closed(&mut self, phase: Phase) -> LinkError {
		if self.channel.is_closed() {
			self.state = State::Failed;
			self.emit(Event::Text(Category::Error, "transport closed".to_owned()));
			return LinkError::LinkClosed;
		}
		LinkError::Timeout(phase)
	}

	/// Retry `send` up to `retries` times, waiting `timeout` after each attempt for a reply of
	/// `expect`. Anything else received in the window is logged and ignored, not treated as fatal.
	fn handshake(
		&mut self,
		mut send: impl FnMut(&mut C) -> utils::error::Result,
		expect: MessageType,
		timeout: Duration,
		retries: u32,
		phase: Phase,
	) -> Result<Packet, LinkError> {
		for attempt in 0..=retries {
			if attempt > 0 {
				debug!("retrying {phase} handshake (attempt {attempt} of {retries})");
			}

			if send(self.channel).is_err() {
				warn!("failed to transmit during {phase} handshake");
			}

			if let Some(pkt) = self.channel.recv(timeout) {
				if pkt.kind == expect {
					return Ok(pkt);
				}
				debug!("ignoring unexpected {:?} during {phase} handshake", pkt.kind);
			}
		}

		Err(self.timeout_or_closed(phase))
	}

	/// Initiator: IDLE → CONNECTING → CONNECTED (§4.6). `seed` sources the session id; the caller
	/// is responsible for session-id collision-freedom across overlapping sessions (§3).
	pub fn connect(&mut self, remote: &Callsign, seed: u32) -> Result<(), LinkError> {
		assert_eq!(self.role, Role::Initiator, "connect() is only valid for the initiator");

		self.state = State::Connecting;
		let sid = SessionId::from_u32(seed);
		let body = remote.to_string().into_bytes();
		self.channel.set_active_session(Some(sid));

		let reply = self.handshake(
			|ch| ch.send(&Packet::control(sid, MessageType::Connect, body.clone())),
			MessageType::ConnectAck,
			self.config.timers.connect_ack_timeout(),
			self.config.retries.disconnect_retry,
			Phase::Connect,
		);

		match reply {
			Ok(pkt) => {
				self.session_id = Some(pkt.session_id);
				self.state = State::Connected;
				std::thread::sleep(self.config.pacing.connection_stabilization_delay());
				self.emit(Event::Connected { remote: *remote });
				Ok(())
			}
			Err(e) => Err(self.fail(format!("CONNECT failed: {e}"))),
		}
	}

	/// Initiator: pull one payload from the remote (`request_payload` in §6). Drives REQUESTING →
	/// READY_TX → RECEIVING → DELIVERED.
	pub fn request_payload(&mut self, request_kind: &str, params: &[u8]) -> Result<Vec<u8>, LinkError> {
		assert_eq!(self.role, Role::Initiator);
		self.ensure_connected()?;

		let first = self.request_and_await_ready(Direction::Pull, request_kind, params)?;

		self.state = State::Receiving;
		let timers = &self.config.timers;
		let retries = &self.config.retries;
		let pacing = &self.config.pacing;
		let ptt = &self.config.ptt;
		let mut receiver = Receiver::new(self.channel, self.sid(), timers, retries, pacing, ptt);

		match receiver.receive_message(first) {
			ReceiveResult::Delivered(bytes) => {
				self.state = State::Delivered;
				self.emit(Event::Progress { pct: 100.0 });
				Ok(bytes)
			}
			ReceiveResult::Incomplete(missing) => Err(self.fail_receive_incomplete(missing)),
		}
	}

	/// Initiator: push one payload to the remote (`send_payload` in §6). `kind` must be one of
	/// NOTE, ZAP_KIND9734_REQUEST, NWC_PAYMENT_REQUEST, ZAP_SUCCESS_CONFIRM.
	pub fn send_payload(&mut self, kind: MessageType, request_kind: &str, payload: &[u8]) -> Result<(), LinkError> {
		assert_eq!(self.role, Role::Initiator);
		self.ensure_connected()?;

		self.request_and_await_ready(Direction::Push, request_kind, &[])?;

		self.state = State::Sending;
		let chunks = chunk(payload, self.config.max_packet_size / 4);
		let timers = &self.config.timers;
		let retries = &self.config.retries;
		let pacing = &self.config.pacing;
		let mut sender = Sender::new(self.channel, self.sid(), kind, timers, retries, pacing);

		match sender.send_message(&chunks) {
			SendResult::Delivered => {
				self.state = State::Delivered;
				Ok(())
			}
			SendResult::Incomplete(missing) => Err(self.fail_send_incomplete(missing)),
		}
	}

	fn ensure_connected(&mut self) -> Result<(), LinkError> {
		if self.state != State::Connected && self.state != State::Delivered {
			return Err(self.fail(format!("request issued while session is in {:?}, expected CONNECTED", self.state)));
		}
		self.state = State::Connected;
		Ok(())
	}

	/// REQUESTING → READY_TX, shared by both pull and push flows: send DATA_REQUEST, wait READY,
	/// echo READY back. Returns the first inbound data packet, already read off the wire, for the
	/// caller to hand to whichever of `Sender`/`Receiver` applies.
	fn request_and_await_ready(&mut self, direction: Direction, request_kind: &str, params: &[u8]) -> Result<Packet, LinkError> {
		self.state = State::Requesting;
		let sid = self.sid();
		let body = encode_request(direction, request_kind, params);

		self.handshake(
			|ch| ch.send(&Packet::control(sid, MessageType::DataRequest, body.clone())),
			MessageType::Ready,
			self.config.timers.ready_timeout(),
			self.config.retries.send_retries,
			Phase::Ready,
		)?;

		self.state = State::ReadyTx;

		if self.channel.send(&Packet::control(sid, MessageType::Ready, Vec::new())).is_err() {
			warn!("failed to echo READY");
		}

		match self.channel.recv(self.config.timers.no_packet_timeout()) {
			Some(pkt) if pkt.kind.is_data() => Ok(pkt),
			Some(pkt) => Err(self.fail(format!("expected first data packet after READY, got {:?}", pkt.kind))),
			None => Err(self.timeout_or_closed(Phase::Data)),
		}
	}

	fn fail_send_incomplete(&mut self, missing: Vec<u16>) -> LinkError {
		self.state = State::Failed;
		self.emit(Event::Text(Category::Warning, format!("transfer incomplete; missing {missing:?}")));
		LinkError::IncompleteTransmission(missing)
	}

	fn fail_receive_incomplete(&mut self, missing: Vec<u16>) -> LinkError {
		self.state = State::Failed;
		self.emit(Event::Text(Category::Warning, format!("reception incomplete; missing {missing:?}")));
		LinkError::ReceiveIncomplete(missing)
	}

	/// Responder/initiator keep-alive ping (§6): send RETRY and wait for ACK, with two widening
	/// wait tiers before declaring the link gone. Used by `api::Link` when a session has sat idle
	/// past `keep_alive_interval` between calls, so a stale connection is caught before the next
	/// real exchange times out instead.
	pub fn keep_alive(&mut self) -> Result<(), LinkError> {
		let sid = self.sid();

		if self.channel.send(&Packet::control(sid, MessageType::Retry, Vec::new())).is_err() {
			warn!("failed to transmit keep-alive RETRY");
		}

		for timeout in [self.config.timers.keep_alive_retry_interval(), self.config.timers.keep_alive_final_interval()] {
			if let Some(pkt) = self.channel.recv(timeout) {
				if pkt.kind == MessageType::Ack {
					return Ok(());
				}
				debug!("ignoring {:?} while awaiting keep-alive ACK", pkt.kind);
			}
		}

		self.state = State::Failed;
		self.emit(Event::Text(Category::Error, "keep-alive unanswered; treating link as closed".to_owned()));
		Err(LinkError::LinkClosed)
	}

	/// DELIVERED → DISCONNECTING → CLOSED. Idempotent: calling this again once CLOSED is a no-op
	/// (§8 property 6).
	pub fn close(&mut self) -> Result<(), LinkError> {
		if self.state == State::Closed {
			return Ok(());
		}

		self.state = State::Disconnecting;
		let sid = self.session_id.unwrap_or(SessionId::from_u32(0));

		let result = self.handshake(
			|ch| ch.send(&Packet::control(sid, MessageType::Disconnect, Vec::new())),
			MessageType::DisconnectAck,
			self.config.timers.disconnect_timeout(),
			self.config.retries.disconnect_retry,
			Phase::Disconnect,
		);

		self.state = State::Closed;
		self.channel.set_active_session(None);
		self.emit(Event::DisconnectComplete);

		match result {
			Ok(_) => Ok(()),
			Err(_) => {
				// §4.6: DISCONNECT_ACK *or* timeout both land in CLOSED — the disconnect attempt
				// itself is best-effort once the caller has already decided to leave.
				debug!("closing without DISCONNECT_ACK after exhausting retries");
				Ok(())
			}
		}
	}

	/// Cooperative abort (§4.8, §5): transitions straight to FAILED and attempts one best-effort
	/// DISCONNECT, never blocking on its reply.
	pub fn cancel(&mut self) -> LinkError {
		let sid = self.session_id.unwrap_or(SessionId::from_u32(0));
		if self.channel.send(&Packet::control(sid, MessageType::Disconnect, Vec::new())).is_err() {
			debug!("best-effort DISCONNECT on cancel failed to transmit");
		}
		self.state = State::Failed;
		self.channel.set_active_session(None);
		LinkError::Cancelled
	}

	/// Responder: serve CONNECT, then every DATA_REQUEST the initiator sends over that same
	/// connection, until DISCONNECT (§4.6, responder mirror). A real link outlives a single
	/// request/response pair — `request_payload`/`send_payload` on the initiator side can be
	/// called repeatedly against one CONNECTed session, and this loop is what lets the responder
	/// keep up with however many of those the initiator issues before it disconnects.
	pub fn serve(&mut self, responder: &mut impl Responder) -> Result<(), LinkError> {
		assert_eq!(self.role, Role::Responder);

		let connect = loop {
			match self.channel.recv(self.config.timers.connection_attempt_timeout()) {
				Some(pkt) if pkt.kind == MessageType::Connect => break pkt,
				Some(pkt) => debug!("ignoring {:?} while idle", pkt.kind),
				None => return Err(self.timeout_or_closed(Phase::Connect)),
			}
		};

		self.session_id = Some(connect.session_id);
		let sid = connect.session_id;
		self.channel.set_active_session(Some(sid));

		if self.channel.send(&Packet::control(sid, MessageType::ConnectAck, Vec::new())).is_err() {
			warn!("failed to transmit CONNECT_ACK");
		}
		self.state = State::Connected;
		std::thread::sleep(self.config.pacing.connection_stabilization_delay());

		loop {
			match self.channel.recv(self.config.timers.connection_timeout()) {
				Some(pkt) if pkt.kind == MessageType::DataRequest => {
					self.serve_one_exchange(sid, responder, &pkt.body)?;
					self.state = State::Connected;
				}
				Some(pkt) if pkt.kind == MessageType::Retry => {
					if self.channel.send(&Packet::control(sid, MessageType::Ack, ack_body_zero())).is_err() {
						warn!("failed to transmit keep-alive ACK");
					}
				}
				Some(pkt) if pkt.kind == MessageType::Disconnect => {
					if self.channel.send(&Packet::control(sid, MessageType::DisconnectAck, Vec::new())).is_err() {
						warn!("failed to transmit DISCONNECT_ACK");
					}
					break;
				}
				Some(pkt) => debug!("ignoring {:?} while CONNECTED", pkt.kind),
				None => {
					debug!("no traffic before CONNECTION_TIMEOUT; closing anyway");
					break;
				}
			}
		}

		self.state = State::Closed;
		self.channel.set_active_session(None);
		self.emit(Event::DisconnectComplete);
		Ok(())
	}

	/// One DATA_REQUEST..READY..transfer exchange within an already-CONNECTed `serve` loop.
	fn serve_one_exchange(&mut self, sid: SessionId, responder: &mut impl Responder, request_body: &[u8]) -> Result<(), LinkError> {
		let Some((direction, kind, params)) = decode_request(request_body) else {
			return Err(self.fail("malformed DATA_REQUEST body"));
		};

		self.state = State::Requesting;

		if self.channel.send(&Packet::control(sid, MessageType::Ready, Vec::new())).is_err() {
			warn!("failed to transmit READY");
		}

		match self.channel.recv(self.config.timers.ready_timeout()) {
			Some(pkt) if pkt.kind == MessageType::Ready => {}
			Some(pkt) => return Err(self.fail(format!("expected READY echo, got {:?}", pkt.kind))),
			None => return Err(self.timeout_or_closed(Phase::Ready)),
		}

		self.state = State::ReadyTx;

		match direction {
			Direction::Pull => {
				let body = responder.handle_data_request(&kind, &params);
				self.state = State::Sending;
				let chunks = chunk(&body, self.config.max_packet_size / 4);
				let timers = &self.config.timers;
				let retries = &self.config.retries;
				let pacing = &self.config.pacing;
				let mut sender = Sender::new(self.channel, sid, MessageType::Response, timers, retries, pacing);

				match sender.send_message(&chunks) {
					SendResult::Delivered => self.state = State::Delivered,
					SendResult::Incomplete(missing) => return Err(self.fail_send_incomplete(missing)),
				}
			}
			Direction::Push => {
				self.state = State::Receiving;
				let first = match self.channel.recv(self.config.timers.no_packet_timeout()) {
					Some(pkt) if pkt.kind.is_data() => pkt,
					Some(pkt) => return Err(self.fail(format!("expected first pushed packet, got {:?}", pkt.kind))),
					None => return Err(self.timeout_or_closed(Phase::Data)),
				};

				let pushed_kind = first.kind;
				let timers = &self.config.timers;
				let retries = &self.config.retries;
				let pacing = &self.config.pacing;
				let ptt = &self.config.ptt;
				let mut receiver = Receiver::new(self.channel, sid, timers, retries, pacing, ptt);

				match receiver.receive_message(first) {
					ReceiveResult::Delivered(bytes) => {
						responder.handle_pushed_payload(pushed_kind, &bytes);
						self.state = State::Delivered;
					}
					ReceiveResult::Incomplete(missing) => return Err(self.fail_receive_incomplete(missing)),
				}
			}
		}

		Ok(())
	}
}

/// `ACK|0`: the keep-alive reply body. Not tied to any real sequence number — RETRY carries no
/// payload to acknowledge, so this just satisfies ACK's wire shape.
fn ack_body_zero() -> Vec<u8> {
	crate::packet::ack_body(0)
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;

	use super::*;
	use crate::packet::{ack_body, parse_ack};

	struct ScriptedChannel {
		sent: Vec<Packet>,
		inbox: VecDeque<Option<Packet>>,
	}

	impl ScriptedChannel {
		fn new(inbox: Vec<Option<Packet>>) -> Self {
			Self { sent: Vec::new(), inbox: inbox.into() }
		}
	}

	impl PacketChannel for ScriptedChannel {
		fn send(&mut self, packet: &Packet) -> utils::error::Result {
			self.sent.push(packet.clone());
			Ok(())
		}

		fn recv(&mut self, _timeout: Duration) -> Option<Packet> {
			self.inbox.pop_front().flatten()
		}
	}

	fn local() -> Callsign {
		Callsign::new("CALL1", 1).unwrap()
	}

	fn remote() -> Callsign {
		Callsign::new("CALL2", 2).unwrap()
	}

	#[test]
	fn initiator_request_payload_round_trip() {
		let config = Config::new(local(), remote());
		let events = EventTap::new();

		let connect_ack = Packet::control(SessionId::from_u32(42), MessageType::ConnectAck, Vec::new());
		let mut channel = ScriptedChannel::new(vec![
			Some(connect_ack),
			Some(Packet::control(SessionId::from_u32(42), MessageType::Ready, Vec::new())),
			Some(Packet { session_id: SessionId::from_u32(42), kind: MessageType::Response, seq: 1, total: 1, body: b"hi".to_vec() }),
			Some(Packet::control(SessionId::from_u32(42), MessageType::Done, Vec::new())),
		]);

		let mut session = Session::new(&mut channel, &config, &events, Role::Initiator);
		session.connect(&remote(), 7).unwrap();
		assert_eq!(session.state(), State::Connected);

		let payload = session.request_payload("FOLLOWING", b"1").unwrap();
		assert_eq!(payload, b"hi");
		assert_eq!(session.state(), State::Delivered);
		assert_eq!(channel.sent.last().unwrap().kind, MessageType::DoneAck);
	}

	#[test]
	fn close_is_idempotent() {
		let config = Config::new(local(), remote());
		let events = EventTap::new();
		let mut channel = ScriptedChannel::new(vec![Some(Packet::control(SessionId::from_u32(1), MessageType::DisconnectAck, Vec::new()))]);

		let mut session = Session::new(&mut channel, &config, &events, Role::Initiator);
		session.session_id = Some(SessionId::from_u32(1));
		session.state = State::Delivered;

		session.close().unwrap();
		assert_eq!(session.state(), State::Closed);
		let sent_after_first_close = channel.sent.len();

		session.close().unwrap();
		assert_eq!(channel.sent.len(), sent_after_first_close, "second close() must not transmit");
	}

	#[test]
	fn request_encoding_roundtrips() {
		let body = encode_request(Direction::Pull, "FOLLOWING", b"params");
		let (dir, kind, params) = decode_request(&body).unwrap();
		assert_eq!(dir, Direction::Pull);
		assert_eq!(kind, "FOLLOWING");
		assert_eq!(params, b"params");
	}

	#[test]
	fn request_payload_reports_incomplete_when_no_packet_timeout_elapses() {
		let config = Config::new(local(), remote());
		let events = EventTap::new();

		let mut channel = ScriptedChannel::new(vec![
			Some(Packet::control(SessionId::from_u32(9), MessageType::ConnectAck, Vec::new())),
			Some(Packet::control(SessionId::from_u32(9), MessageType::Ready, Vec::new())),
			Some(Packet { session_id: SessionId::from_u32(9), kind: MessageType::Response, seq: 1, total: 2, body: b"a".to_vec() }),
			None,
		]);

		let mut session = Session::new(&mut channel, &config, &events, Role::Initiator);
		session.connect(&remote(), 9).unwrap();

		let err = session.request_payload("FOLLOWING", b"1").unwrap_err();
		assert!(matches!(err, LinkError::IncompleteTransmission(missing) if missing == vec![2]));
	}

	#[test]
	#[allow(unused)]
	fn ack_body_helper_is_reexported_for_tests() {
		let _ = ack_body(1);
	}

	/// S5: cancelling mid-transfer sends at most one DISCONNECT and surfaces `Cancelled`.
	#[test]
	fn cancel_mid_transfer_sends_one_disconnect_and_reports_cancelled() {
		let config = Config::new(local(), remote());
		let events = EventTap::new();
		let mut channel = ScriptedChannel::new(Vec::new());

		let mut session = Session::new(&mut channel, &config, &events, Role::Initiator);
		session.session_id = Some(SessionId::from_u32(11));
		session.state = State::Receiving;

		let err = session.cancel();
		assert!(matches!(err, LinkError::Cancelled));
		assert_eq!(session.state(), State::Failed);
		assert_eq!(channel.sent.len(), 1);
		assert_eq!(channel.sent[0].kind, MessageType::Disconnect);

		// A second cancel (e.g. a caller that calls it defensively) still sends only one more
		// best-effort DISCONNECT, never accumulating retries of its own.
		let _ = session.cancel();
		assert_eq!(channel.sent.len(), 2);
	}

	struct EchoResponder {
		replies: VecDeque<Vec<u8>>,
		requests_seen: Vec<String>,
	}

	impl Responder for EchoResponder {
		fn handle_data_request(&mut self, request_kind: &str, _params: &[u8]) -> Vec<u8> {
			self.requests_seen.push(request_kind.to_owned());
			self.replies.pop_front().unwrap_or_default()
		}

		fn handle_pushed_payload(&mut self, _kind: MessageType, _payload: &[u8]) {}
	}

	/// `serve` must survive more than one DATA_REQUEST over the same CONNECT, since a real
	/// initiator can call `request_payload`/`send_payload` repeatedly before disconnecting.
	#[test]
	fn serve_handles_repeated_data_requests_over_one_connect() {
		let config = Config::new(local(), remote());
		let events = EventTap::new();
		let sid = SessionId::from_u32(77);

		let request1 = encode_request(Direction::Pull, "FOLLOWING", b"1");
		let request2 = encode_request(Direction::Pull, "FOLLOWING", b"2");

		let mut channel = ScriptedChannel::new(vec![
			Some(Packet::control(sid, MessageType::Connect, Vec::new())),
			Some(Packet::control(sid, MessageType::DataRequest, request1)),
			Some(Packet::control(sid, MessageType::Ready, Vec::new())),
			Some(Packet::control(sid, MessageType::Ack, ack_body(1))),
			Some(Packet::control(sid, MessageType::DoneAck, Vec::new())),
			Some(Packet::control(sid, MessageType::DataRequest, request2)),
			Some(Packet::control(sid, MessageType::Ready, Vec::new())),
			Some(Packet::control(sid, MessageType::Ack, ack_body(1))),
			Some(Packet::control(sid, MessageType::DoneAck, Vec::new())),
			Some(Packet::control(sid, MessageType::Disconnect, Vec::new())),
		]);

		let mut session = Session::new(&mut channel, &config, &events, Role::Responder);
		let mut responder = EchoResponder { replies: VecDeque::from(vec![b"one".to_vec(), b"two".to_vec()]), requests_seen: Vec::new() };

		session.serve(&mut responder).unwrap();

		assert_eq!(session.state(), State::Closed);
		assert_eq!(responder.requests_seen, vec!["FOLLOWING".to_owned(), "FOLLOWING".to_owned()]);
		assert_eq!(channel.sent.iter().filter(|p| p.kind == MessageType::Response).count(), 2);
		assert_eq!(channel.sent.iter().filter(|p| p.kind == MessageType::DisconnectAck).count(), 1);
	}

	/// A RETRY keep-alive ping mid-connection gets an ACK reply and doesn't disturb the session
	/// state, so a second exchange can still follow it.
	#[test]
	fn serve_answers_keep_alive_ping_between_exchanges() {
		let config = Config::new(local(), remote());
		let events = EventTap::new();
		let sid = SessionId::from_u32(88);

		let request = encode_request(Direction::Pull, "FOLLOWING", b"1");

		let mut channel = ScriptedChannel::new(vec![
			Some(Packet::control(sid, MessageType::Connect, Vec::new())),
			Some(Packet::control(sid, MessageType::Retry, Vec::new())),
			Some(Packet::control(sid, MessageType::DataRequest, request)),
			Some(Packet::control(sid, MessageType::Ready, Vec::new())),
			Some(Packet::control(sid, MessageType::Ack, ack_body(1))),
			Some(Packet::control(sid, MessageType::DoneAck, Vec::new())),
			Some(Packet::control(sid, MessageType::Disconnect, Vec::new())),
		]);

		let mut session = Session::new(&mut channel, &config, &events, Role::Responder);
		let mut responder = EchoResponder { replies: VecDeque::from(vec![b"one".to_vec()]), requests_seen: Vec::new() };

		session.serve(&mut responder).unwrap();

		assert_eq!(session.state(), State::Closed);
		assert!(channel.sent.iter().any(|p| p.kind == MessageType::Ack && parse_ack(&p.body) == Some(0)));
	}

	/// A keep-alive that never gets an ACK surfaces `LinkClosed`, not an ordinary timeout.
	#[test]
	fn keep_alive_without_ack_reports_link_closed() {
		let config = Config::new(local(), remote());
		let events = EventTap::new();
		let mut channel = ScriptedChannel::new(vec![None, None]);

		let mut session = Session::new(&mut channel, &config, &events, Role::Initiator);
		session.session_id = Some(SessionId::from_u32(99));
		session.state = State::Connected;

		let err = session.keep_alive().unwrap_err();
		assert!(matches!(err, LinkError::LinkClosed));
		assert_eq!(session.state(), State::Failed);
	}
}
