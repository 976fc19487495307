//! The link core's configuration surface (§6). This is deliberately just a data type: parsing it
//! out of a config file, environment, or CLI flags is external-collaborator plumbing. Once built,
//! a [`Config`] is treated as frozen and passed by reference through every constructor in this
//! crate (§9) — nothing here mutates it at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::callsign::Callsign;

/// Which backend `api::Link` should wire up (§4.4, §4.7). Open Question in the design notes: VARA
/// isn't a `TncBackend` at all, so this selects between the KISS path and the VARA adapter path
/// rather than just which socket flavor to open (see DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
	Tcp,
	Serial,
	Vara,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transport {
	pub connection_type: ConnectionType,
	pub tcp_host: String,
	pub tcp_port: u16,
	pub serial_port: String,
	pub serial_speed: u32,
	/// VARA control-channel TCP port (the data channel is always one above it, per VARA's own
	/// convention).
	pub vara_control_port: u16,
	pub vara_data_port: u16,
}

impl Default for Transport {
	fn default() -> Self {
		Self {
			connection_type: ConnectionType::Tcp,
			tcp_host: "127.0.0.1".to_owned(),
			tcp_port: 8001,
			serial_port: "/dev/ttyUSB0".to_owned(),
			serial_speed: 9600,
			vara_control_port: 8300,
			vara_data_port: 8301,
		}
	}
}

/// All timers named in §6, stored as millisecond counts so the type stays a plain, serde-friendly
/// data struct; each has a `Duration`-returning accessor below.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Timers {
	pub ack_timeout_ms: u64,
	pub connect_ack_timeout_ms: u64,
	pub no_ack_timeout_ms: u64,
	pub no_packet_timeout_ms: u64,
	pub ready_timeout_ms: u64,
	pub missing_packets_timeout_ms: u64,
	pub connection_attempt_timeout_ms: u64,
	pub connection_timeout_ms: u64,
	pub disconnect_timeout_ms: u64,
	pub shutdown_timeout_ms: u64,
	pub keep_alive_interval_ms: u64,
	pub keep_alive_retry_interval_ms: u64,
	pub keep_alive_final_interval_ms: u64,
}

impl Default for Timers {
	fn default() -> Self {
		Self {
			ack_timeout_ms: 30_000,
			connect_ack_timeout_ms: 30_000,
			no_ack_timeout_ms: 60_000,
			no_packet_timeout_ms: 60_000,
			ready_timeout_ms: 30_000,
			missing_packets_timeout_ms: 45_000,
			connection_attempt_timeout_ms: 60_000,
			connection_timeout_ms: 300_000,
			disconnect_timeout_ms: 20_000,
			shutdown_timeout_ms: 10_000,
			keep_alive_interval_ms: 120_000,
			keep_alive_retry_interval_ms: 30_000,
			keep_alive_final_interval_ms: 15_000,
		}
	}
}

macro_rules! duration_accessor {
	($field:ident -> $method:ident) => {
		pub fn $method(&self) -> Duration {
			Duration::from_millis(self.$field)
		}
	};
}

impl Timers {
	duration_accessor!(ack_timeout_ms -> ack_timeout);
	duration_accessor!(connect_ack_timeout_ms -> connect_ack_timeout);
	duration_accessor!(no_ack_timeout_ms -> no_ack_timeout);
	duration_accessor!(no_packet_timeout_ms -> no_packet_timeout);
	duration_accessor!(ready_timeout_ms -> ready_timeout);
	duration_accessor!(missing_packets_timeout_ms -> missing_packets_timeout);
	duration_accessor!(connection_attempt_timeout_ms -> connection_attempt_timeout);
	duration_accessor!(connection_timeout_ms -> connection_timeout);
	duration_accessor!(disconnect_timeout_ms -> disconnect_timeout);
	duration_accessor!(shutdown_timeout_ms -> shutdown_timeout);
	duration_accessor!(keep_alive_interval_ms -> keep_alive_interval);
	duration_accessor!(keep_alive_retry_interval_ms -> keep_alive_retry_interval);
	duration_accessor!(keep_alive_final_interval_ms -> keep_alive_final_interval);
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Retries {
	pub send_retries: u32,
	pub disconnect_retry: u32,
	/// Bound on PKT_MISSING/DONE recovery cycles (§4.5 step 5). Not separately named in the
	/// enumerated config list; the spec only says "up to MISSING_CYCLES", so it is exposed here
	/// alongside the other retry counters rather than hard-coded (see DESIGN.md).
	pub missing_cycles: u32,
	/// Bound on the receiver's PKT_MISSING reissue count before aborting with `ReceiveIncomplete`.
	pub missing_reissue_limit: u32,
}

impl Default for Retries {
	fn default() -> Self {
		Self { send_retries: 3, disconnect_retry: 3, missing_cycles: 3, missing_reissue_limit: 3 }
	}
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Ptt {
	pub ptt_tx_delay_ms: u64,
	pub ptt_rx_delay_ms: u64,
	pub ptt_tail_ms: u64,
	pub ack_spacing_ms: u64,
}

impl Ptt {
	duration_accessor!(ptt_tx_delay_ms -> ptt_tx_delay);
	duration_accessor!(ptt_rx_delay_ms -> ptt_rx_delay);
	duration_accessor!(ptt_tail_ms -> ptt_tail);
	duration_accessor!(ack_spacing_ms -> ack_spacing);
}

impl Default for Ptt {
	fn default() -> Self {
		Self { ptt_tx_delay_ms: 250, ptt_rx_delay_ms: 250, ptt_tail_ms: 200, ack_spacing_ms: 100 }
	}
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Pacing {
	pub packet_send_delay_ms: u64,
	pub packet_resend_delay_ms: u64,
	pub connection_stabilization_delay_ms: u64,
	pub missing_packets_threshold: u32,
}

impl Pacing {
	duration_accessor!(packet_send_delay_ms -> packet_send_delay);
	duration_accessor!(packet_resend_delay_ms -> packet_resend_delay);
	duration_accessor!(connection_stabilization_delay_ms -> connection_stabilization_delay);
}

impl Default for Pacing {
	fn default() -> Self {
		Self {
			packet_send_delay_ms: 200,
			packet_resend_delay_ms: 500,
			connection_stabilization_delay_ms: 1_000,
			missing_packets_threshold: 1,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	pub transport: Transport,
	pub local_callsign: Callsign,
	pub remote_callsign: Callsign,
	pub max_packet_size: usize,
	pub timers: Timers,
	pub retries: Retries,
	pub ptt: Ptt,
	pub pacing: Pacing,
	/// Informational only; the TNC owns the modem's actual transmit rate.
	pub baud_rate: u32,
}

impl Config {
	pub fn new(local_callsign: Callsign, remote_callsign: Callsign) -> Self {
		Self {
			transport: Transport::default(),
			local_callsign,
			remote_callsign,
			max_packet_size: 200,
			timers: Timers::default(),
			retries: Retries::default(),
			ptt: Ptt::default(),
			pacing: Pacing::default(),
			baud_rate: 1200,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_timers_are_nonzero() {
		let t = Timers::default();
		assert!(t.ack_timeout() > Duration::ZERO);
		assert!(t.shutdown_timeout() > Duration::ZERO);
	}

	#[test]
	fn config_new_fills_in_defaults() {
		let a = Callsign::new("CALL1", 1).unwrap();
		let b = Callsign::new("CALL2", 2).unwrap();
		let cfg = Config::new(a, b);
		assert_eq!(cfg.max_packet_size, 200);
		assert_eq!(cfg.retries.send_retries, 3);
	}
}
