//! KISS framing (§4.1): byte-stuffed frames between host and TNC, delimited by `FEND`.

const FEND: u8 = 0xC0;
const FESC: u8 = 0xDB;
const TFEND: u8 = 0xDC;
const TFESC: u8 = 0xDD;

/// KISS command byte for a data frame on port 0. HAMSTR never uses the other KISS commands
/// (TXDELAY, SlotTime, ...); a backend wanting those configures the TNC out of band.
const DATA_FRAME: u8 = 0x00;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KissError {
	#[error("FESC followed by a byte other than TFEND/TFESC")]
	InvalidEscape,
}

/// Encode one AX.25 frame as a KISS data frame: `FEND DATA_FRAME <stuffed payload> FEND`.
pub fn encode(frame: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(frame.len() + 4);
	out.push(FEND);
	out.push(DATA_FRAME);

	for &byte in frame {
		match byte {
			FEND => {
				out.push(FESC);
				out.push(TFEND);
			}
			FESC => {
				out.push(FESC);
				out.push(TFESC);
			}
			b => out.push(b),
		}
	}

	out.push(FEND);
	out
}

/// A resumable KISS decoder: feed it bytes as they arrive from the transport, and it yields one
/// decoded AX.25 frame per non-empty `FEND`-delimited segment. Empty or malformed segments are
/// silently dropped, matching real-world KISS implementations that also emit stray `FEND`s.
#[derive(Default)]
pub struct Decoder {
	/// Bytes accumulated since the last `FEND`, post-unescaping.
	buf: Vec<u8>,
	/// Whether the previous byte was an `FESC`, awaiting its `TFEND`/`TFESC` companion.
	escaping: bool,
	/// Whether we are inside a frame (seen an opening `FEND` and data since).
	active: bool,
}

impl Decoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feed a chunk of bytes read from the transport, appending any fully-decoded AX.25 frames
	/// to `out`. Returns an error only for an invalid escape sequence; the decoder recovers by
	/// discarding the frame in progress and continuing to scan for the next `FEND`.
	pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<Vec<u8>>) -> Result<(), KissError> {
		let mut first_error = None;

		for &byte in bytes {
			if let Err(e) = self.feed_byte(byte, out) {
				first_error.get_or_insert(e);
			}
		}

		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	fn feed_byte(&mut self, byte: u8, out: &mut Vec<Vec<u8>>) -> Result<(), KissError> {
		if byte == FEND {
			if self.active && !self.buf.is_empty() {
				// The command byte (KISS port/command nibble) is the first decoded byte; HAMSTR
				// only speaks data frames on port 0, so anything else is silently dropped.
				if self.buf[0] == DATA_FRAME {
					out.push(self.buf[1..].to_vec());
				}
			}

			self.buf.clear();
			self.escaping = false;
			self.active = true;
			return Ok(());
		}

		if !self.active {
			// Stray bytes before the first FEND: ignore.
			return Ok(());
		}

		if self.escaping {
			self.escaping = false;

			match byte {
				TFEND => self.buf.push(FEND),
				TFESC => self.buf.push(FESC),
				_ => {
					// Resynchronise by discarding the in-progress frame; the next FEND starts
					// a clean one.
					self.buf.clear();
					self.active = false;
					return Err(KissError::InvalidEscape);
				}
			}

			return Ok(());
		}

		if byte == FESC {
			self.escaping = true;
		} else {
			self.buf.push(byte);
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn decode_all(bytes: &[u8]) -> Vec<Vec<u8>> {
		let mut dec = Decoder::new();
		let mut out = Vec::new();
		dec.feed(bytes, &mut out).unwrap();
		out
	}

	#[test]
	fn roundtrip_plain_frame() {
		let frame = b"hello world";
		let encoded = encode(frame);
		assert_eq!(decode_all(&encoded), vec![frame.to_vec()]);
	}

	#[test]
	fn stuffs_fend_and_fesc() {
		let frame = [FEND, FESC, 0x42];
		let encoded = encode(&frame);
		assert_eq!(decode_all(&encoded), vec![frame.to_vec()]);
	}

	#[test]
	fn drops_empty_segments() {
		let mut bytes = vec![FEND, FEND, FEND];
		bytes.push(DATA_FRAME);
		bytes.extend_from_slice(b"x");
		bytes.push(FEND);

		assert_eq!(decode_all(&bytes), vec![b"x".to_vec()]);
	}

	#[test]
	fn invalid_escape_errors_and_resyncs() {
		let mut dec = Decoder::new();
		let mut out = Vec::new();

		let mut bytes = vec![FEND, DATA_FRAME, FESC, 0x55];
		let err = dec.feed(&bytes, &mut out);
		assert_eq!(err, Err(KissError::InvalidEscape));
		assert!(out.is_empty());

		bytes.clear();
		bytes.push(FEND);
		bytes.push(DATA_FRAME);
		bytes.extend_from_slice(b"ok");
		bytes.push(FEND);

		dec.feed(&bytes, &mut out).unwrap();
		assert_eq!(out, vec![b"ok".to_vec()]);
	}

	#[test]
	fn feeds_incrementally_across_calls() {
		let frame = b"split across reads";
		let encoded = encode(frame);

		let mut dec = Decoder::new();
		let mut out = Vec::new();

		let (a, b) = encoded.split_at(encoded.len() / 2);
		dec.feed(a, &mut out).unwrap();
		assert!(out.is_empty());

		dec.feed(b, &mut out).unwrap();
		assert_eq!(out, vec![frame.to_vec()]);
	}
}
