//! AX.25 unnumbered-information (UI) frame codec (§4.2). No connected-mode AX.25: every frame is
//! a connectionless datagram carrying one HAMSTR packet (or, in VARA mode, nothing at all).

use crate::callsign::Callsign;
use crate::crc::fcs;

const CONTROL_UI: u8 = 0x03;
const PID_NO_LAYER3: u8 = 0xF0;

/// Reserved bits that AX.25 conventionally sets to 1 in every SSID octet.
const SSID_RESERVED: u8 = 0b0110_0000;
/// The low bit of the final address field in the address list is set to mark the end of
/// addressing; HAMSTR never uses repeaters, so this is always the source address.
const SSID_END_OF_ADDRESS: u8 = 0b0000_0001;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Ax25Error {
	#[error("frame shorter than the minimum AX.25 UI frame (got {0} bytes, need at least 17)")]
	Truncated(usize),
	#[error("FCS mismatch: frame was corrupted in transit")]
	BadFcs,
}

/// A decoded AX.25 UI frame: addressing plus the opaque payload (a KISS/AX.25 layer never looks
/// inside the payload; that's the HAMSTR packet codec's job).
pub struct UiFrame {
	pub dest: Callsign,
	pub src: Callsign,
	pub payload: Vec<u8>,
}

fn encode_address(call: &Callsign, end_of_address: bool) -> [u8; 7] {
	let mut out = [0u8; 7];

	for (i, &b) in call.padded_call().iter().enumerate() {
		// AX.25 addresses are ASCII shifted left by one bit.
		out[i] = b << 1;
	}

	out[6] = SSID_RESERVED | (call.ssid() << 1) | if end_of_address { SSID_END_OF_ADDRESS } else { 0 };
	out
}

fn decode_address(bytes: &[u8; 7]) -> Callsign {
	let mut call = [0u8; 6];

	for (i, &b) in bytes[..6].iter().enumerate() {
		call[i] = b >> 1;
	}

	let call = std::str::from_utf8(&call).unwrap_or("??????").trim_end();
	let ssid = (bytes[6] >> 1) & 0x0F;

	Callsign::new(call, ssid).unwrap_or_else(|_| Callsign::new("??????".trim_end(), 0).expect("fallback callsign is valid"))
}

/// Build a complete AX.25 UI frame, including the trailing FCS, ready to hand to a KISS encoder.
pub fn encode(dest: &Callsign, src: &Callsign, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(16 + payload.len());

	out.extend_from_slice(&encode_address(dest, false));
	out.extend_from_slice(&encode_address(src, true));
	out.push(CONTROL_UI);
	out.push(PID_NO_LAYER3);
	out.extend_from_slice(payload);

	let crc = fcs(&out);
	// AX.25 transmits the FCS least-significant byte first.
	out.extend_from_slice(&crc.to_le_bytes());

	out
}

/// Parse and validate an AX.25 UI frame, checking the FCS before returning anything.
pub fn decode(frame: &[u8]) -> Result<UiFrame, Ax25Error> {
	// 7 + 7 (addresses) + 1 (control) + 1 (PID) + 2 (FCS) = 18, but callers may legitimately have
	// a zero-length payload, and the spec's stated minimum is 17; honour that exactly.
	if frame.len() < 17 {
		return Err(Ax25Error::Truncated(frame.len()));
	}

	let (body, trailer) = frame.split_at(frame.len() - 2);
	let received = u16::from_le_bytes([trailer[0], trailer[1]]);

	if fcs(body) != received {
		return Err(Ax25Error::BadFcs);
	}

	let dest = decode_address(body[0..7].try_into().expect("7 bytes"));
	let src = decode_address(body[7..14].try_into().expect("7 bytes"));
	// body[14] is the control byte, body[15] the PID; HAMSTR only ever emits UI/no-layer-3
	// frames, and accepts whatever a TNC hands back without re-validating those fields.
	let payload = body[16..].to_vec();

	Ok(UiFrame { dest, src, payload })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrip() {
		let dest = Callsign::new("CALL2", 2).unwrap();
		let src = Callsign::new("CALL1", 1).unwrap();
		let payload = b"hamstr packet body";

		let frame = encode(&dest, &src, payload);
		let decoded = decode(&frame).unwrap();

		assert_eq!(decoded.dest.to_string(), "CALL2-2");
		assert_eq!(decoded.src.to_string(), "CALL1-1");
		assert_eq!(decoded.payload, payload);
	}

	#[test]
	fn truncated_frame_rejected() {
		assert_eq!(decode(&[0u8; 10]), Err(Ax25Error::Truncated(10)));
	}

	#[test]
	fn bad_fcs_rejected() {
		let dest = Callsign::new("CALL2", 2).unwrap();
		let src = Callsign::new("CALL1", 1).unwrap();
		let mut frame = encode(&dest, &src, b"payload");

		let last = frame.len() - 1;
		frame[last] ^= 0xFF;

		assert_eq!(decode(&frame), Err(Ax25Error::BadFcs));
	}

	#[test]
	fn end_of_address_bit_set_on_source_only() {
		let dest = Callsign::new("CALL2", 2).unwrap();
		let src = Callsign::new("CALL1", 1).unwrap();
		let frame = encode(&dest, &src, b"x");

		assert_eq!(frame[6] & SSID_END_OF_ADDRESS, 0);
		assert_eq!(frame[13] & SSID_END_OF_ADDRESS, SSID_END_OF_ADDRESS);
	}
}
