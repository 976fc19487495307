//! The VARA HF/FM modem backend (§4.4, §4.7). VARA bypasses KISS/AX.25/packet framing entirely:
//! the modem itself handles FEC, ARQ and PTT, and exposes a line-oriented control channel plus a
//! raw data channel over two TCP sockets. Higher layers talk to it through the block-oriented
//! interface below, not through [`super::TncBackend`].

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::callsign::Callsign;

use super::TncError;

/// VARA's control channel is a plain text protocol (`CONNECT <call> <call>`, `DISCONNECTED`,
/// `PTT ON`/`PTT OFF`, etc). The spec leaves unknown events unspecified; per its guidance this
/// backend logs and ignores anything it doesn't recognise rather than treating it as fatal.
pub struct VaraBackend {
	control_host: String,
	control_port: u16,
	data_port: u16,
	control: Option<BufReader<TcpStream>>,
	data: Option<TcpStream>,
}

impl VaraBackend {
	pub fn new(control_host: impl Into<String>, control_port: u16, data_port: u16) -> Self {
		Self { control_host: control_host.into(), control_port, data_port, control: None, data: None }
	}

	fn control_mut(&mut self) -> Result<&mut BufReader<TcpStream>, TncError> {
		self.control.as_mut().ok_or(TncError::TransportClosed)
	}

	fn data_mut(&mut self) -> Result<&mut TcpStream, TncError> {
		self.data.as_mut().ok_or(TncError::TransportClosed)
	}

	fn send_command(&mut self, cmd: &str) -> Result<(), TncError> {
		let stream = self.control_mut()?.get_mut();
		stream.write_all(cmd.as_bytes()).map_err(|e| TncError::WriteRefused(e.to_string()))?;
		stream.write_all(b"\r\n").map_err(|e| TncError::WriteRefused(e.to_string()))
	}

	/// Read one line from the control channel, blocking up to `timeout`. Lines this backend
	/// doesn't recognise are surfaced to the caller verbatim rather than swallowed, so the session
	/// layer can decide what matters (e.g. waiting specifically for `CONNECTED`).
	pub fn read_control_line(&mut self, timeout: Duration) -> Result<String, TncError> {
		let deadline = Instant::now() + timeout;

		loop {
			if Instant::now() >= deadline {
				return Err(TncError::Timeout);
			}

			let mut line = String::new();
			match self.control_mut()?.read_line(&mut line) {
				Ok(0) => return Err(TncError::TransportClosed),
				Ok(_) => {
					let line = line.trim().to_owned();
					if line.is_empty() {
						continue;
					}
					return Ok(line);
				}
				Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => return Err(TncError::Timeout),
				Err(e) => return Err(TncError::WriteRefused(e.to_string())),
			}
		}
	}

	pub fn open(&mut self) -> Result<(), TncError> {
		let control = TcpStream::connect((self.control_host.as_str(), self.control_port))
			.map_err(|e| TncError::WriteRefused(e.to_string()))?;
		let data = TcpStream::connect((self.control_host.as_str(), self.data_port))
			.map_err(|e| TncError::WriteRefused(e.to_string()))?;

		control.set_read_timeout(Some(Duration::from_millis(100))).ok();
		data.set_read_timeout(Some(Duration::from_millis(100))).ok();

		self.control = Some(BufReader::new(control));
		self.data = Some(data);

		debug!("Opened VARA control/data channels at {}:{}/{}", self.control_host, self.control_port, self.data_port);

		Ok(())
	}

	pub fn connect_remote(&mut self, local: &Callsign, remote: &Callsign, timeout: Duration) -> Result<(), TncError> {
		self.send_command(&format!("CONNECT {local} {remote}"))?;

		let deadline = Instant::now() + timeout;
		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(TncError::Timeout);
			}

			let line = self.read_control_line(remaining)?;
			if line.eq_ignore_ascii_case("CONNECTED") {
				return Ok(());
			}
			if line.eq_ignore_ascii_case("DISCONNECTED") || line.starts_with("CONNECT FAILED") {
				return Err(TncError::WriteRefused(line));
			}
			warn!("Ignoring unrecognised VARA control event while connecting: {line}");
		}
	}

	pub fn disconnect_remote(&mut self) -> Result<(), TncError> {
		self.send_command("DISCONNECT")?;
		self.control = None;
		self.data = None;
		Ok(())
	}

	/// Send one length-framed application block over the data channel. VARA's own ARQ layer
	/// guarantees in-order, error-free delivery, so no further framing is needed here.
	pub fn send_block(&mut self, block: &[u8]) -> Result<(), TncError> {
		self.data_mut()?.write_all(block).map_err(|e| TncError::WriteRefused(e.to_string()))
	}

	pub fn recv_block(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TncError> {
		let deadline = Instant::now() + timeout;
		let mut out = vec![0u8; max_len];

		loop {
			if Instant::now() >= deadline {
				return Err(TncError::Timeout);
			}

			match self.data_mut()?.read(&mut out) {
				Ok(0) => return Err(TncError::TransportClosed),
				Ok(n) => {
					out.truncate(n);
					return Ok(out);
				}
				Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => continue,
				Err(e) => return Err(TncError::WriteRefused(e.to_string())),
			}
		}
	}
}
