use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, warn};

use super::TncError;
use crate::kiss;

/// KISS framing carried over a TCP socket to a software TNC (e.g. Direwolf).
pub struct KissTcp {
	host: String,
	port: u16,
	stream: Option<TcpStream>,
	decoder: kiss::Decoder,
	/// Frames decoded but not yet handed back by `receive_frame`.
	pending: Vec<Vec<u8>>,
}

impl KissTcp {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self { host: host.into(), port, stream: None, decoder: kiss::Decoder::new(), pending: Vec::new() }
	}

	fn stream(&mut self) -> Result<&mut TcpStream, TncError> {
		self.stream.as_mut().ok_or(TncError::TransportClosed)
	}
}

impl super::TncBackend for KissTcp {
	fn connect(&mut self) -> Result<(), TncError> {
		let stream = TcpStream::connect((self.host.as_str(), self.port)).map_err(|e| TncError::WriteRefused(e.to_string()))?;

		stream.set_nodelay(true).ok();
		self.stream = Some(stream);
		debug!("Connected to KISS TNC at {}:{}", self.host, self.port);

		Ok(())
	}

	fn disconnect(&mut self) -> Result<(), TncError> {
		self.stream = None;
		Ok(())
	}

	fn send_frame(&mut self, ax25_frame: &[u8]) -> Result<(), TncError> {
		let encoded = kiss::encode(ax25_frame);
		self.stream()?.write_all(&encoded).map_err(|e| TncError::WriteRefused(e.to_string()))
	}

	fn receive_frame(&mut self, timeout: Duration) -> Result<Vec<u8>, TncError> {
		if let Some(frame) = self.pending.pop() {
			return Ok(frame);
		}

		let stream = self.stream()?;
		stream.set_read_timeout(Some(timeout)).map_err(|e| TncError::WriteRefused(e.to_string()))?;

		let mut buf = [0u8; 1500];

		loop {
			let n = match stream.read(&mut buf) {
				Ok(0) => return Err(TncError::TransportClosed),
				Ok(n) => n,
				Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => return Err(TncError::Timeout),
				Err(e) => return Err(TncError::WriteRefused(e.to_string())),
			};

			let mut frames = Vec::new();

			if let Err(e) = self.decoder.feed(&buf[..n], &mut frames) {
				warn!("Dropping malformed KISS frame: {e}");
			}

			if !frames.is_empty() {
				let first = frames.remove(0);
				self.pending.extend(frames.into_iter().rev());
				return Ok(first);
			}
		}
	}

	fn set_ptt(&mut self, _on: bool) -> Result<(), TncError> {
		// A software TNC reached over plain TCP keys PTT itself based on traffic; there is no
		// separate control line to assert here.
		Ok(())
	}
}
