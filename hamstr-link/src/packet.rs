//! The HAMSTR packet format (§4.3): the header embedded inside every AX.25 UI frame payload.
//!
//! `session_id(8B ASCII) | type(1B) | seq(2B BE) | total(2B BE) | body | crc16(2B BE over body)`

use std::fmt;

use utils::endian::{get_u16, put_u16};

use crate::crc::crc16;

/// Fixed width of the [`SessionId`] field on the wire.
pub const SESSION_ID_LEN: usize = 8;
const HEADER_LEN: usize = SESSION_ID_LEN + 1 + 2 + 2;
const CRC_LEN: usize = 2;

/// Short opaque token assigned by the initiator at CONNECT and echoed in every subsequent packet
/// of that session. Represented as 8 ASCII hex characters on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
	/// Generate a session id from a caller-supplied 32-bit value, formatted as 8 hex digits.
	/// Collision-freedom within an overlapping session pair is the caller's responsibility
	/// (e.g. by sourcing the seed from a counter or CSPRNG); this type only fixes the wire shape.
	pub fn from_u32(seed: u32) -> Self {
		let text = format!("{seed:08x}");
		let mut bytes = [0u8; SESSION_ID_LEN];
		bytes.copy_from_slice(text.as_bytes());
		Self(bytes)
	}

	pub fn as_str(&self) -> &str {
		std::str::from_utf8(&self.0).expect("session ids are constructed from ASCII hex")
	}

	fn to_bytes(self) -> [u8; SESSION_ID_LEN] {
		self.0
	}

	fn from_bytes(bytes: [u8; SESSION_ID_LEN]) -> Self {
		Self(bytes)
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl fmt::Debug for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SessionId({self})")
	}
}

/// HAMSTR control and data message types. `total` is fixed at 1 for every control type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum MessageType {
	Connect = 1,
	ConnectAck = 2,
	Ready = 3,
	DataRequest = 4,
	Note = 5,
	Response = 6,
	Ack = 7,
	Done = 8,
	DoneAck = 9,
	Disconnect = 10,
	DisconnectAck = 11,
	PktMissing = 12,
	Retry = 13,
	ZapKind9734Request = 14,
	NwcPaymentRequest = 15,
	ZapSuccessConfirm = 16,
	Error = 17,
}

impl MessageType {
	/// Whether this type carries an application-level payload split across possibly many
	/// packets, as opposed to a single-packet control message.
	pub fn is_data(self) -> bool {
		matches!(
			self,
			Self::DataRequest
				| Self::Note | Self::Response
				| Self::ZapKind9734Request
				| Self::NwcPaymentRequest
				| Self::ZapSuccessConfirm
		)
	}

	fn try_from_u8(b: u8) -> Option<Self> {
		use MessageType::*;
		Some(match b {
			1 => Connect,
			2 => ConnectAck,
			3 => Ready,
			4 => DataRequest,
			5 => Note,
			6 => Response,
			7 => Ack,
			8 => Done,
			9 => DoneAck,
			10 => Disconnect,
			11 => DisconnectAck,
			12 => PktMissing,
			13 => Retry,
			14 => ZapKind9734Request,
			15 => NwcPaymentRequest,
			16 => ZapSuccessConfirm,
			17 => Error,
			_ => return None,
		})
	}
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
	#[error("packet shorter than the header+CRC (got {0} bytes, need at least {1})")]
	Truncated(usize, usize),
	#[error("unrecognised message type byte {0:#x}")]
	BadType(u8),
	#[error("seq {seq} is out of range for total {total}")]
	BadSeq { seq: u16, total: u16 },
	#[error("body CRC mismatch")]
	BadCrc,
	#[error("encoded packet would exceed max_packet_size ({len} > {max})")]
	TooLarge { len: usize, max: usize },
}

/// A single on-air HAMSTR packet: one member of a logical [`Message`](crate::segmentation).
#[derive(Clone, Debug)]
pub struct Packet {
	pub session_id: SessionId,
	pub kind: MessageType,
	/// 1-based.
	pub seq: u16,
	/// Fixed at the first transmission of the message; 1 for every control message.
	pub total: u16,
	pub body: Vec<u8>,
}

impl Packet {
	pub fn control(session_id: SessionId, kind: MessageType, body: impl Into<Vec<u8>>) -> Self {
		Self { session_id, kind, seq: 1, total: 1, body: body.into() }
	}

	/// Encode the packet into the HAMSTR wire format, failing if the result would exceed
	/// `max_packet_size` (the packet header+body+CRC, i.e. what becomes the AX.25 payload).
	pub fn encode(&self, max_packet_size: usize) -> Result<Vec<u8>, PacketError> {
		let len = HEADER_LEN + self.body.len() + CRC_LEN;

		if len > max_packet_size {
			return Err(PacketError::TooLarge { len, max: max_packet_size });
		}

		let mut out = vec![0u8; len];

		out[0..SESSION_ID_LEN].copy_from_slice(&self.session_id.to_bytes());
		out[SESSION_ID_LEN] = self.kind as u8;
		put_u16(&mut out, SESSION_ID_LEN + 1, self.seq);
		put_u16(&mut out, SESSION_ID_LEN + 3, self.total);
		out[HEADER_LEN..HEADER_LEN + self.body.len()].copy_from_slice(&self.body);

		let crc = crc16(&self.body);
		put_u16(&mut out, HEADER_LEN + self.body.len(), crc);

		Ok(out)
	}

	/// Decode and CRC-validate a packet body taken from an AX.25 UI frame payload. CRC failures
	/// are indistinguishable from AX.25 FCS failures to upper layers: both come back as an `Err`
	/// meant to be silently dropped, never NACKed (§4.5).
	pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
		if buf.len() < HEADER_LEN + CRC_LEN {
			return Err(PacketError::Truncated(buf.len(), HEADER_LEN + CRC_LEN));
		}

		let mut session_id = [0u8; SESSION_ID_LEN];
		session_id.copy_from_slice(&buf[0..SESSION_ID_LEN]);

		let kind = MessageType::try_from_u8(buf[SESSION_ID_LEN]).ok_or(PacketError::BadType(buf[SESSION_ID_LEN]))?;
		let seq = get_u16(buf, SESSION_ID_LEN + 1);
		let total = get_u16(buf, SESSION_ID_LEN + 3);

		if seq == 0 || seq > total {
			return Err(PacketError::BadSeq { seq, total });
		}

		let body = &buf[HEADER_LEN..buf.len() - CRC_LEN];
		let received_crc = get_u16(buf, buf.len() - CRC_LEN);

		if crc16(body) != received_crc {
			return Err(PacketError::BadCrc);
		}

		Ok(Self { session_id: SessionId::from_bytes(session_id), kind, seq, total, body: body.to_vec() })
	}
}

/// Render an `ACK` control body: `ACK|<seq>`.
pub fn ack_body(seq: u16) -> Vec<u8> {
	format!("ACK|{seq}").into_bytes()
}

/// Parse an `ACK` control body.
pub fn parse_ack(body: &[u8]) -> Option<u16> {
	std::str::from_utf8(body).ok()?.strip_prefix("ACK|")?.parse().ok()
}

/// Render a `PKT_MISSING` control body: `PKT_MISSING|1,3,4` from a sorted sequence list.
pub fn missing_body(missing: &[u16]) -> Vec<u8> {
	let csv = missing.iter().map(u16::to_string).collect::<Vec<_>>().join(",");
	format!("PKT_MISSING|{csv}").into_bytes()
}

/// Parse a `PKT_MISSING` control body back into a sorted sequence list.
pub fn parse_missing(body: &[u8]) -> Option<Vec<u16>> {
	let csv = std::str::from_utf8(body).ok()?.strip_prefix("PKT_MISSING|")?;

	if csv.is_empty() {
		return Some(Vec::new());
	}

	csv.split(',').map(|s| s.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrip_data_packet() {
		let sid = SessionId::from_u32(0xdead_beef);
		let pkt = Packet { session_id: sid, kind: MessageType::Response, seq: 2, total: 3, body: b"some bytes".to_vec() };

		let encoded = pkt.encode(200).unwrap();
		let decoded = Packet::decode(&encoded).unwrap();

		assert_eq!(decoded.session_id, sid);
		assert_eq!(decoded.kind, MessageType::Response);
		assert_eq!(decoded.seq, 2);
		assert_eq!(decoded.total, 3);
		assert_eq!(decoded.body, b"some bytes");
	}

	#[test]
	fn bit_flip_is_rejected_by_crc() {
		let sid = SessionId::from_u32(1);
		let pkt = Packet::control(sid, MessageType::Ack, ack_body(4));
		let mut encoded = pkt.encode(200).unwrap();

		let last_body_byte = HEADER_LEN;
		encoded[last_body_byte] ^= 0x01;

		assert_eq!(Packet::decode(&encoded), Err(PacketError::BadCrc));
	}

	#[test]
	fn too_large_is_rejected() {
		let sid = SessionId::from_u32(1);
		let pkt = Packet::control(sid, MessageType::Ack, vec![0u8; 300]);
		assert!(matches!(pkt.encode(200), Err(PacketError::TooLarge { .. })));
	}

	#[test]
	fn control_body_formats() {
		assert_eq!(ack_body(42), b"ACK|42");
		assert_eq!(parse_ack(b"ACK|42"), Some(42));

		assert_eq!(missing_body(&[1, 3, 4]), b"PKT_MISSING|1,3,4");
		assert_eq!(parse_missing(b"PKT_MISSING|1,3,4"), Some(vec![1, 3, 4]));
		assert_eq!(parse_missing(b"PKT_MISSING|"), Some(vec![]));
	}
}
