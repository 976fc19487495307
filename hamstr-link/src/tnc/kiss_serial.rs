use std::io::ErrorKind;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serialport::SerialPort;

use super::TncError;
use crate::kiss;

/// KISS framing over a directly-attached serial TNC. Unlike [`super::KissTcp`], the host may need
/// to key PTT itself via the RTS line, so `set_ptt` is a real operation here.
pub struct KissSerial {
	path: String,
	baud: u32,
	port: Option<Box<dyn SerialPort>>,
	decoder: kiss::Decoder,
	pending: Vec<Vec<u8>>,
}

impl KissSerial {
	pub fn new(path: impl Into<String>, baud: u32) -> Self {
		Self { path: path.into(), baud, port: None, decoder: kiss::Decoder::new(), pending: Vec::new() }
	}

	fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TncError> {
		self.port.as_mut().ok_or(TncError::TransportClosed)
	}
}

impl super::TncBackend for KissSerial {
	fn connect(&mut self) -> Result<(), TncError> {
		let port = serialport::new(&self.path, self.baud)
			.timeout(Duration::from_millis(100))
			.open()
			.map_err(|e| TncError::WriteRefused(e.to_string()))?;

		self.port = Some(port);
		debug!("Opened serial TNC at {} ({} baud)", self.path, self.baud);

		Ok(())
	}

	fn disconnect(&mut self) -> Result<(), TncError> {
		self.port = None;
		Ok(())
	}

	fn send_frame(&mut self, ax25_frame: &[u8]) -> Result<(), TncError> {
		let encoded = kiss::encode(ax25_frame);
		self.port()?.write_all(&encoded).map_err(|e| TncError::WriteRefused(e.to_string()))
	}

	fn receive_frame(&mut self, timeout: Duration) -> Result<Vec<u8>, TncError> {
		if let Some(frame) = self.pending.pop() {
			return Ok(frame);
		}

		let deadline = Instant::now() + timeout;
		let mut buf = [0u8; 512];

		loop {
			if Instant::now() >= deadline {
				return Err(TncError::Timeout);
			}

			let n = match self.port()?.read(&mut buf) {
				Ok(0) => continue,
				Ok(n) => n,
				Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => continue,
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

	fn set_ptt(&mut self, on: bool) -> Result<(), TncError> {
		self.port()?.write_request_to_send(on).map_err(|e| TncError::WriteRefused(e.to_string()))
	}
}
