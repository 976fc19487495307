use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An AX.25 addressing unit: a 1-6 character uppercase alphanumeric call sign plus an SSID
/// (secondary station identifier) in `0..=15`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Callsign {
	/// Left-justified, upper-case, 1-6 ASCII alphanumerics. Shorter calls are NUL-padded when
	/// stored, but `call()` trims the padding back off.
	bytes: [u8; 6],
	ssid: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
	#[error("callsign must be 1-6 alphanumeric characters, got {0:?}")]
	BadCall(String),
	#[error("SSID must be 0-15, got {0}")]
	BadSsid(u8),
	#[error("expected CALL or CALL-SSID, got {0:?}")]
	BadFormat(String),
}

impl Callsign {
	pub fn new(call: &str, ssid: u8) -> Result<Self, ParseError> {
		if call.is_empty() || call.len() > 6 || !call.bytes().all(|b| b.is_ascii_alphanumeric()) {
			return Err(ParseError::BadCall(call.to_owned()));
		}

		if ssid > 15 {
			return Err(ParseError::BadSsid(ssid));
		}

		let mut bytes = [0u8; 6];
		let call = call.to_ascii_uppercase();
		bytes[..call.len()].copy_from_slice(call.as_bytes());

		Ok(Self { bytes, ssid })
	}

	/// The call sign portion, without padding.
	pub fn call(&self) -> &str {
		let len = self.bytes.iter().position(|&b| b == 0).unwrap_or(self.bytes.len());
		std::str::from_utf8(&self.bytes[..len]).expect("callsign bytes are ASCII")
	}

	pub fn ssid(&self) -> u8 {
		self.ssid
	}

	/// Left-justified, space-padded 6-byte call plus the raw SSID, as AX.25 address fields expect
	/// before the bit-shift and control-bit packing done in [`crate::ax25`].
	pub(crate) fn padded_call(&self) -> [u8; 6] {
		let mut out = [b' '; 6];

		for (i, b) in self.bytes.iter().enumerate() {
			if *b != 0 {
				out[i] = *b;
			}
		}

		out
	}
}

impl fmt::Display for Callsign {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}-{}", self.call(), self.ssid)
	}
}

impl fmt::Debug for Callsign {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self}")
	}
}

impl FromStr for Callsign {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.split_once('-') {
			Some((call, ssid)) => {
				let ssid: u8 = ssid.parse().map_err(|_| ParseError::BadFormat(s.to_owned()))?;
				Self::new(call, ssid)
			}
			None => Self::new(s, 0),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_call_and_ssid() {
		let c: Callsign = "CALL1-1".parse().unwrap();
		assert_eq!(c.call(), "CALL1");
		assert_eq!(c.ssid(), 1);
		assert_eq!(c.to_string(), "CALL1-1");
	}

	#[test]
	fn defaults_ssid_to_zero() {
		let c: Callsign = "N0CALL".parse().unwrap();
		assert_eq!(c.ssid(), 0);
	}

	#[test]
	fn rejects_bad_ssid() {
		assert!("CALL1-16".parse::<Callsign>().is_err());
	}

	#[test]
	fn rejects_non_alphanumeric() {
		assert!(Callsign::new("CALL-1", 0).is_err());
		assert!(Callsign::new("TOOLONG1", 0).is_err());
		assert!(Callsign::new("", 0).is_err());
	}

	#[test]
	fn pads_call_for_wire() {
		let c = Callsign::new("W1AW", 2).unwrap();
		assert_eq!(&c.padded_call(), b"W1AW  ");
	}
}
