//! The reliable segmentation protocol (§4.5): a stop-and-wait sender and a gap-tracking receiver,
//! each driven against a [`PacketChannel`] rather than a concrete transport. The scheduler (§4.8)
//! supplies the channel and owns all PTT/timing concerns; this module only knows about sequence
//! numbers, ACKs, and the DONE/PKT_MISSING recovery cycle.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::{Pacing, Ptt, Retries, Timers};
use crate::packet::{ack_body, missing_body, parse_ack, parse_missing, MessageType, Packet, SessionId};

/// What the segmentation layer needs from whatever sits below it: push one packet, and block for
/// the next inbound packet of this session (already AX.25/KISS/CRC-validated and session-id
/// filtered by the caller — see `crate::session`).
pub trait PacketChannel {
	fn send(&mut self, packet: &Packet) -> utils::error::Result;
	fn recv(&mut self, timeout: Duration) -> Option<Packet>;

	/// Tell the channel which session_id to filter inbound traffic against (§8 property 7).
	/// `None` disables filtering, for the window before a responder has learned the id from an
	/// inbound CONNECT. A no-op for channels that don't do their own filtering (e.g. test mocks).
	fn set_active_session(&mut self, _session_id: Option<SessionId>) {}

	/// Whether the underlying transport is known to have gone away, as opposed to merely being
	/// quiet. Lets callers tell a dead link apart from an ordinary timeout. Defaults to `false` for
	/// channels with no such signal (e.g. test mocks).
	fn is_closed(&self) -> bool {
		false
	}
}

/// Split `body` into packets of at most `chunk_len` bytes, numbered from 1. An empty body still
/// produces one (empty) packet, since every message has at least seq 1.
pub fn chunk(body: &[u8], chunk_len: usize) -> Vec<Vec<u8>> {
	if body.is_empty() {
		return vec![Vec::new()];
	}

	body.chunks(chunk_len.max(1)).map(<[u8]>::to_vec).collect()
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendResult {
	Delivered,
	/// MISSING_CYCLES exhausted with packets still outstanding (§4.5 step 5).
	Incomplete(Vec<u16>),
}

pub struct Sender<'a, C> {
	channel: &'a mut C,
	session_id: SessionId,
	kind: MessageType,
	timers: &'a Timers,
	retries: &'a Retries,
	pacing: &'a Pacing,
	/// Overall ceiling across every attempt of the whole message (NO_ACK_TIMEOUT), distinct from
	/// `ack_timeout`'s per-attempt wait. Set once `send_message` starts.
	deadline: Option<Instant>,
}

impl<'a, C: PacketChannel> Sender<'a, C> {
	pub fn new(channel: &'a mut C, session_id: SessionId, kind: MessageType, timers: &'a Timers, retries: &'a Retries, pacing: &'a Pacing) -> Self {
		Self { channel, session_id, kind, timers, retries, pacing, deadline: None }
	}

	/// Send `chunks` as one logical message, then drive the DONE / PKT_MISSING recovery cycle to
	/// completion (§4.5).
	pub fn send_message(&mut self, chunks: &[Vec<u8>]) -> SendResult {
		let total = chunks.len() as u16;
		self.deadline = Some(Instant::now() + self.timers.no_ack_timeout());

		for (i, body) in chunks.iter().enumerate() {
			let seq = i as u16 + 1;
			if self.past_deadline() {
				warn!("NO_ACK_TIMEOUT elapsed before seq {seq}/{total} could be sent; abandoning");
				break;
			}
			if self.send_one(seq, total, body.clone()).is_none() {
				debug!("seq {seq}/{total} deferred after exhausting the retry budget; continuing (§4.5 step 3)");
			}
		}

		self.drive_done_cycle(chunks, total)
	}

	fn past_deadline(&self) -> bool {
		self.deadline.is_some_and(|d| Instant::now() >= d)
	}

	/// Transmit `seq` and wait for its ACK, retrying up to `send_retries` times. `None` once the
	/// budget is exhausted; the caller marks the seq deferred and moves on rather than blocking
	/// the whole message on one bad packet.
	fn send_one(&mut self, seq: u16, total: u16, body: Vec<u8>) -> Option<()> {
		let pkt = Packet { session_id: self.session_id, kind: self.kind, seq, total, body };

		for attempt in 0..=self.retries.send_retries {
			if self.past_deadline() {
				return None;
			}

			if attempt > 0 {
				debug!("retransmitting seq {seq}/{total} (attempt {attempt} of {})", self.retries.send_retries);
				std::thread::sleep(self.pacing.packet_resend_delay());
			}

			if self.channel.send(&pkt).is_err() {
				warn!("backend refused seq {seq}; counting as a failed attempt");
				continue;
			}

			if self.await_ack(seq, self.timers.ack_timeout()) {
				return Some(());
			}
		}

		None
	}

	/// Wait for `ACK|seq`. A late ACK for a lower seq is accepted idempotently and does not reset
	/// the deadline (§4.5 "Late ACKs ... accepted idempotently").
	fn await_ack(&mut self, seq: u16, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return false;
			}

			let Some(pkt) = self.channel.recv(remaining) else { return false };

			if pkt.kind != MessageType::Ack {
				debug!("ignoring unexpected {:?} while awaiting ACK|{seq}", pkt.kind);
				continue;
			}

			match parse_ack(&pkt.body) {
				Some(n) if n == seq => return true,
				Some(n) if n < seq => {
					debug!("late ACK|{n} while awaiting ACK|{seq}; accepted idempotently");
					continue;
				}
				_ => continue,
			}
		}
	}

	fn drive_done_cycle(&mut self, chunks: &[Vec<u8>], total: u16) -> SendResult {
		let mut last_missing = Vec::new();

		for cycle in 0..self.retries.missing_cycles {
			if self.past_deadline() {
				warn!("NO_ACK_TIMEOUT elapsed during the DONE/PKT_MISSING cycle; abandoning");
				break;
			}

			if self.channel.send(&Packet::control(self.session_id, MessageType::Done, Vec::new())).is_err() {
				warn!("failed to transmit DONE (cycle {cycle})");
			}

			match self.await_done_reply(self.timers.missing_packets_timeout()) {
				Some(DoneReply::Acked) => return SendResult::Delivered,
				Some(DoneReply::Missing(missing)) => {
					for &seq in &missing {
						if let Some(body) = chunks.get(seq as usize - 1) {
							self.send_one(seq, total, body.clone());
						}
					}
					last_missing = missing;
				}
				None => warn!("no DONE_ACK or PKT_MISSING before MISSING_PACKETS_TIMEOUT (cycle {cycle})"),
			}
		}

		SendResult::Incomplete(last_missing)
	}

	/// Wait for whichever of DONE_ACK or PKT_MISSING the receiver sends back. Per §4.5's ordering
	/// note, a stray ACK arriving in this window (e.g. for a packet acked just before DONE went
	/// out) is honored silently rather than treated as unexpected.
	fn await_done_reply(&mut self, timeout: Duration) -> Option<DoneReply> {
		let deadline = Instant::now() + timeout;

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return None;
			}

			let pkt = self.channel.recv(remaining)?;

			match pkt.kind {
				MessageType::DoneAck => return Some(DoneReply::Acked),
				MessageType::PktMissing => match parse_missing(&pkt.body) {
					Some(list) => return Some(DoneReply::Missing(list)),
					None => warn!("malformed PKT_MISSING body"),
				},
				MessageType::Ack => {
					if let Some(n) = parse_ack(&pkt.body) {
						debug!("late ACK|{n} during DONE wait; accepted idempotently");
					}
				}
				other => debug!("ignoring unexpected {other:?} while awaiting DONE_ACK/PKT_MISSING"),
			}
		}
	}
}

enum DoneReply {
	Acked,
	Missing(Vec<u16>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveResult {
	Delivered(Vec<u8>),
	/// The receiver gave up reissuing PKT_MISSING with packets still outstanding.
	Incomplete(Vec<u16>),
}

pub struct Receiver<'a, C> {
	channel: &'a mut C,
	session_id: SessionId,
	timers: &'a Timers,
	retries: &'a Retries,
	pacing: &'a Pacing,
	ptt: &'a Ptt,
	received: BTreeMap<u16, Vec<u8>>,
}

impl<'a, C: PacketChannel> Receiver<'a, C> {
	pub fn new(channel: &'a mut C, session_id: SessionId, timers: &'a Timers, retries: &'a Retries, pacing: &'a Pacing, ptt: &'a Ptt) -> Self {
		Self { channel, session_id, timers, retries, pacing, ptt, received: BTreeMap::new() }
	}

	/// Drive the receive side of one logical message to completion. `first` is the first data
	/// packet of the message, already read and type-dispatched by the session loop; everything
	/// after that is pulled from `channel` directly.
	pub fn receive_message(&mut self, first: Packet) -> ReceiveResult {
		let total = first.total;
		self.accept_data(first);

		loop {
			match self.channel.recv(self.timers.no_packet_timeout()) {
				Some(pkt) if pkt.kind == MessageType::Done => return self.handle_done(total),
				Some(pkt) if pkt.kind.is_data() => self.accept_data(pkt),
				Some(pkt) => debug!("ignoring unexpected {:?} mid-transfer", pkt.kind),
				None => {
					warn!("NO_PACKET_TIMEOUT elapsed mid-transfer");
					return ReceiveResult::Incomplete(self.missing(total));
				}
			}
		}
	}

	/// Store a data packet (unless it's a duplicate) and always re-ACK — duplicates must still be
	/// acked to drive a sender that never saw the first ACK (§4.5 receiver step 1).
	fn accept_data(&mut self, pkt: Packet) {
		let seq = pkt.seq;

		if self.received.contains_key(&seq) {
			debug!("duplicate seq {seq}; re-acking without storing");
		} else {
			self.received.insert(seq, pkt.body);
		}

		if self.channel.send(&Packet::control(self.session_id, MessageType::Ack, ack_body(seq))).is_err() {
			warn!("failed to transmit ACK|{seq}");
		}
		std::thread::sleep(self.ptt.ack_spacing());
	}

	fn missing(&self, total: u16) -> Vec<u16> {
		(1..=total).filter(|s| !self.received.contains_key(s)).collect()
	}

	fn handle_done(&mut self, total: u16) -> ReceiveResult {
		let missing = self.missing(total);

		if missing.is_empty() {
			return self.deliver(total);
		}

		if missing.len() as u32 >= self.pacing.missing_packets_threshold {
			warn!("requesting retransmission of {} missing packet(s): {:?}", missing.len(), missing);
		} else {
			debug!("requesting retransmission of {} missing packet(s) (below threshold): {:?}", missing.len(), missing);
		}

		for _reissue in 0..self.retries.missing_reissue_limit {
			let missing = self.missing(total);
			if self.channel.send(&Packet::control(self.session_id, MessageType::PktMissing, missing_body(&missing))).is_err() {
				warn!("failed to transmit PKT_MISSING");
			}
			std::thread::sleep(self.ptt.ack_spacing());

			if self.await_recovery() && self.missing(total).is_empty() {
				return self.deliver(total);
			}
		}

		ReceiveResult::Incomplete(self.missing(total))
	}

	fn deliver(&mut self, total: u16) -> ReceiveResult {
		if self.channel.send(&Packet::control(self.session_id, MessageType::DoneAck, Vec::new())).is_err() {
			warn!("failed to transmit DONE_ACK");
		}
		std::thread::sleep(self.ptt.ack_spacing());

		ReceiveResult::Delivered(self.concat(total))
	}

	/// After requesting PKT_MISSING, pull inbound packets until the sender re-sends DONE or
	/// MISSING_PACKETS_TIMEOUT elapses. Returns whether DONE was seen again, so the caller knows
	/// it's worth re-checking `missing()`.
	fn await_recovery(&mut self) -> bool {
		let deadline = Instant::now() + self.timers.missing_packets_timeout();

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return false;
			}

			match self.channel.recv(remaining) {
				Some(pkt) if pkt.kind == MessageType::Done => return true,
				Some(pkt) if pkt.kind.is_data() => self.accept_data(pkt),
				Some(_) => continue,
				None => return false,
			}
		}
	}

	fn concat(&self, total: u16) -> Vec<u8> {
		let mut out = Vec::new();
		for seq in 1..=total {
			if let Some(body) = self.received.get(&seq) {
				out.extend_from_slice(body);
			}
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;

	use super::*;
	use crate::packet::SessionId;

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

	fn control(sid: SessionId, kind: MessageType, body: impl Into<Vec<u8>>) -> Packet {
		Packet::control(sid, kind, body)
	}

	#[test]
	fn receiver_reassembles_out_of_order_and_acks_duplicates() {
		let sid = SessionId::from_u32(1);
		let timers = Timers::default();
		let retries = Retries::default();
		let pacing = Pacing::default();
		let ptt = Ptt::default();

		let first = Packet { session_id: sid, kind: MessageType::Response, seq: 1, total: 3, body: b"aaa".to_vec() };
		let mut channel = ScriptedChannel::new(vec![
			Some(Packet { session_id: sid, kind: MessageType::Response, seq: 3, total: 3, body: b"ccc".to_vec() }),
			Some(Packet { session_id: sid, kind: MessageType::Response, seq: 2, total: 3, body: b"bbb".to_vec() }),
			Some(Packet { session_id: sid, kind: MessageType::Response, seq: 3, total: 3, body: b"ccc".to_vec() }),
			Some(control(sid, MessageType::Done, Vec::new())),
		]);

		let mut receiver = Receiver::new(&mut channel, sid, &timers, &retries, &pacing, &ptt);
		let result = receiver.receive_message(first);

		assert_eq!(result, ReceiveResult::Delivered(b"aaabbbccc".to_vec()));
		assert_eq!(channel.sent.iter().filter(|p| p.kind == MessageType::Ack).count(), 4);
		assert_eq!(channel.sent.last().unwrap().kind, MessageType::DoneAck);
	}

	#[test]
	fn receiver_requests_missing_and_delivers_after_reissue() {
		let sid = SessionId::from_u32(2);
		let timers = Timers::default();
		let retries = Retries::default();
		let pacing = Pacing::default();
		let ptt = Ptt::default();

		let first = Packet { session_id: sid, kind: MessageType::Response, seq: 1, total: 2, body: b"aaa".to_vec() };
		let mut channel = ScriptedChannel::new(vec![
			Some(control(sid, MessageType::Done, Vec::new())),
			Some(Packet { session_id: sid, kind: MessageType::Response, seq: 2, total: 2, body: b"bbb".to_vec() }),
			Some(control(sid, MessageType::Done, Vec::new())),
		]);

		let mut receiver = Receiver::new(&mut channel, sid, &timers, &retries, &pacing, &ptt);
		let result = receiver.receive_message(first);

		assert_eq!(result, ReceiveResult::Delivered(b"aaabbb".to_vec()));
		assert!(channel.sent.iter().any(|p| p.kind == MessageType::PktMissing && parse_missing(&p.body) == Some(vec![2])));
	}

	#[test]
	fn sender_retries_on_ack_timeout_then_succeeds() {
		let sid = SessionId::from_u32(3);
		let timers = Timers::default();
		let retries = Retries::default();
		let pacing = Pacing::default();

		let mut channel = ScriptedChannel::new(vec![
			None,
			Some(control(sid, MessageType::Ack, ack_body(1))),
			Some(control(sid, MessageType::DoneAck, Vec::new())),
		]);

		let mut sender = Sender::new(&mut channel, sid, MessageType::Response, &timers, &retries, &pacing);
		let result = sender.send_message(&[b"hello".to_vec()]);

		assert_eq!(result, SendResult::Delivered);

		let data_sends = channel.sent.iter().filter(|p| p.kind == MessageType::Response).count();
		assert_eq!(data_sends, 2, "expected one retransmission after the simulated timeout");
		assert_eq!(channel.sent.last().unwrap().kind, MessageType::Done);
	}

	#[test]
	fn sender_recovers_via_pkt_missing() {
		let sid = SessionId::from_u32(4);
		let timers = Timers::default();
		let retries = Retries::default();
		let pacing = Pacing::default();

		let mut channel = ScriptedChannel::new(vec![
			Some(control(sid, MessageType::Ack, ack_body(1))),
			Some(control(sid, MessageType::Ack, ack_body(2))),
			Some(control(sid, MessageType::Ack, ack_body(3))),
			Some(control(sid, MessageType::PktMissing, missing_body(&[2]))),
			Some(control(sid, MessageType::Ack, ack_body(2))),
			Some(control(sid, MessageType::DoneAck, Vec::new())),
		]);

		let mut sender = Sender::new(&mut channel, sid, MessageType::Response, &timers, &retries, &pacing);
		let chunks = vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()];
		let result = sender.send_message(&chunks);

		assert_eq!(result, SendResult::Delivered);
		assert_eq!(channel.sent.iter().filter(|p| p.kind == MessageType::Done).count(), 2);
	}

	#[test]
	fn sender_reports_incomplete_after_missing_cycles_exhausted() {
		let sid = SessionId::from_u32(5);
		let timers = Timers::default();
		let retries = Retries { missing_cycles: 1, send_retries: 0, ..Retries::default() };
		let pacing = Pacing::default();

		let mut channel = ScriptedChannel::new(vec![
			Some(control(sid, MessageType::Ack, ack_body(1))),
			Some(control(sid, MessageType::PktMissing, missing_body(&[1]))),
			None,
		]);

		let mut sender = Sender::new(&mut channel, sid, MessageType::Response, &timers, &retries, &pacing);
		let result = sender.send_message(&[b"only".to_vec()]);

		assert_eq!(result, SendResult::Incomplete(vec![1]));
	}

	#[test]
	fn chunk_splits_and_handles_empty_body() {
		assert_eq!(chunk(b"abcdefg", 3), vec![b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()]);
		assert_eq!(chunk(b"", 3), vec![Vec::<u8>::new()]);
	}
}
