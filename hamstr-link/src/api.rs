//! The external interface (§6): `Link` owns one transport connection and dials either the KISS/
//! AX.25 path (through `Scheduler`, driving `Session`) or the VARA path (through `VaraAdapter`
//! directly, since VARA bypasses segmentation and session framing entirely). Everything above this
//! module — including the zap sub-exchange — is composed out of `request_payload`/`send_payload`,
//! never special-cased against the wire format.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::callsign::Callsign;
use crate::config::{Config, ConnectionType};
use crate::error::LinkError;
use crate::events::{EventTap, Observer, ObserverId};
use crate::packet::{MessageType, SessionId};
use crate::scheduler::Scheduler;
use crate::segmentation::PacketChannel;
use crate::session::{Responder, Role, Session, State};
use crate::tnc::{KissSerial, KissTcp, TncError, VaraBackend};
use crate::vara_adapter::VaraAdapter;

/// An open session against one remote station. Just the `state`/`session_id` pair `Session`
/// needs to resume — `Link` reconstructs a `Session` borrowing its long-lived channel fresh on
/// every call rather than holding one alive across them (see `Session::resume`). `last_activity`
/// tracks how long the session has sat idle between calls, so `Link` knows when a keep-alive is
/// due before the next real exchange times out instead.
#[derive(Clone, Copy, Debug)]
pub struct SessionHandle {
	session_id: SessionId,
	state: State,
	last_activity: Instant,
}

enum Backend {
	Packet(Box<dyn PacketChannel>),
	Vara(VaraAdapter<VaraBackend>),
}

/// The bridge's radio-facing handle. One `Link` per configured transport; callers on the NOSTR
/// side drive it through `open_session`/`request_payload`/`send_payload`/`close_session`.
pub struct Link {
	config: Config,
	events: Arc<EventTap>,
	backend: Backend,
	next_seed: AtomicU32,
}

fn encode_kind_params(kind: &str, params: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(kind.len() + 1 + params.len());
	out.extend_from_slice(kind.as_bytes());
	out.push(b'|');
	out.extend_from_slice(params);
	out
}

fn encode_kinded(kind: MessageType, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(1 + payload.len());
	out.push(kind as u8);
	out.extend_from_slice(payload);
	out
}

impl Link {
	/// Dial the transport named by `config.transport.connection_type` (§4.4) and wrap it for use
	/// as an initiator. KISS-TCP and KISS-serial both go through `Scheduler`; VARA bypasses it.
	pub fn connect(config: Config) -> Result<Self, LinkError> {
		let events = Arc::new(EventTap::new());

		let backend = match config.transport.connection_type {
			ConnectionType::Tcp => {
				let kiss = KissTcp::new(config.transport.tcp_host.clone(), config.transport.tcp_port);
				let scheduler = Scheduler::new(kiss, config.clone(), events.clone()).map_err(backend_err)?;
				Backend::Packet(Box::new(scheduler))
			}
			ConnectionType::Serial => {
				let kiss = KissSerial::new(config.transport.serial_port.clone(), config.transport.serial_speed);
				let scheduler = Scheduler::new(kiss, config.clone(), events.clone()).map_err(backend_err)?;
				Backend::Packet(Box::new(scheduler))
			}
			ConnectionType::Vara => {
				let mut vara = VaraBackend::new(config.transport.tcp_host.clone(), config.transport.vara_control_port, config.transport.vara_data_port);
				vara.open().map_err(backend_err)?;
				Backend::Vara(VaraAdapter::new(vara))
			}
		};

		Ok(Self { config, events, backend, next_seed: AtomicU32::new(1) })
	}

	/// Subscribe to the telemetry stream (§2.9, §9). Returns a token for `unsubscribe_logs`.
	pub fn subscribe_logs(&self, observer: impl Observer + 'static) -> ObserverId {
		self.events.subscribe(observer)
	}

	pub fn unsubscribe_logs(&self, id: ObserverId) {
		self.events.unsubscribe(id)
	}

	/// Open a session against `remote` (§4.6 CONNECT for KISS; VARA's own CONNECT for the modem
	/// path — HAMSTR's CONNECT/CONNECT_ACK has no counterpart once VARA already owns the link).
	pub fn open_session(&mut self, remote: &Callsign) -> Result<SessionHandle, LinkError> {
		let seed = self.next_seed.fetch_add(1, Ordering::Relaxed);

		match &mut self.backend {
			Backend::Packet(channel) => {
				let mut session = Session::new(channel.as_mut(), &self.config, &self.events, Role::Initiator);
				session.connect(remote, seed)?;
				let session_id = session.session_id().expect("connect() sets session_id on success");
				Ok(SessionHandle { session_id, state: session.state(), last_activity: Instant::now() })
			}
			Backend::Vara(adapter) => {
				let timeout = self.config.timers.connect_ack_timeout();
				adapter.inner_mut().connect_remote(&self.config.local_callsign, remote, timeout).map_err(backend_err)?;
				Ok(SessionHandle { session_id: SessionId::from_u32(seed), state: State::Connected, last_activity: Instant::now() })
			}
		}
	}

	/// Pull one payload (`request_payload` in §6).
	pub fn request_payload(&mut self, handle: &mut SessionHandle, request_kind: &str, params: &[u8]) -> Result<Vec<u8>, LinkError> {
		match &mut self.backend {
			Backend::Packet(channel) => {
				let mut session = Session::resume(channel.as_mut(), &self.config, &self.events, Role::Initiator, handle.state, Some(handle.session_id));
				keep_alive_if_stale(&mut session, &self.config, handle)?;
				let result = session.request_payload(request_kind, params);
				handle.state = session.state();
				handle.last_activity = Instant::now();
				result
			}
			Backend::Vara(adapter) => {
				let timeout = self.config.timers.no_packet_timeout();
				let body = encode_kind_params(request_kind, params);
				adapter.request(&body, timeout).map_err(backend_err)
			}
		}
	}

	/// Push one payload (`send_payload` in §6). `kind` must be one of NOTE, ZAP_KIND9734_REQUEST,
	/// NWC_PAYMENT_REQUEST, ZAP_SUCCESS_CONFIRM.
	pub fn send_payload(&mut self, handle: &mut SessionHandle, kind: MessageType, request_kind: &str, payload: &[u8]) -> Result<(), LinkError> {
		match &mut self.backend {
			Backend::Packet(channel) => {
				let mut session = Session::resume(channel.as_mut(), &self.config, &self.events, Role::Initiator, handle.state, Some(handle.session_id));
				keep_alive_if_stale(&mut session, &self.config, handle)?;
				let result = session.send_payload(kind, request_kind, payload);
				handle.state = session.state();
				handle.last_activity = Instant::now();
				result
			}
			Backend::Vara(adapter) => {
				let timeout = self.config.timers.no_packet_timeout();
				adapter.push(&encode_kinded(kind, payload), timeout).map_err(backend_err)
			}
		}
	}

	/// Serve one responder-side connection over the packet backend (§4.6 responder mirror):
	/// CONNECT, then every DATA_REQUEST the initiator issues, until DISCONNECT. VARA's own
	/// accept/listen semantics aren't modeled here — this is the KISS/AX.25 path only.
	pub fn serve(&mut self, responder: &mut impl Responder) -> Result<(), LinkError> {
		match &mut self.backend {
			Backend::Packet(channel) => {
				let mut session = Session::new(channel.as_mut(), &self.config, &self.events, Role::Responder);
				session.serve(responder)
			}
			Backend::Vara(_) => Err(LinkError::BackendError("VARA responder mode is not supported".to_owned())),
		}
	}

	/// Compose the zap sub-exchange (§1) out of the same primitives any other exchange uses: push
	/// the kind-9734 zap request, pull the invoice, push the NWC payment request, pull the payment
	/// result, push the success confirmation. Nothing below `Link` knows "zap" is special.
	pub fn run_zap_flow(&mut self, handle: &mut SessionHandle, zap_request: &[u8], payment_request: &[u8]) -> Result<Vec<u8>, LinkError> {
		self.send_payload(handle, MessageType::ZapKind9734Request, "ZAP_REQUEST", zap_request)?;
		let invoice = self.request_payload(handle, "INVOICE", &[])?;
		self.send_payload(handle, MessageType::NwcPaymentRequest, "NWC_PAYMENT", payment_request)?;
		let payment_result = self.request_payload(handle, "PAYMENT_RESULT", &[])?;
		self.send_payload(handle, MessageType::ZapSuccessConfirm, "ZAP_CONFIRM", &payment_result)?;
		Ok(invoice)
	}

	/// Close a session (§8 property 6: idempotent regardless of transport).
	pub fn close_session(&mut self, handle: SessionHandle) -> Result<(), LinkError> {
		match &mut self.backend {
			Backend::Packet(channel) => {
				let mut session = Session::resume(channel.as_mut(), &self.config, &self.events, Role::Initiator, handle.state, Some(handle.session_id));
				session.close()
			}
			Backend::Vara(adapter) => adapter.inner_mut().disconnect_remote().map_err(backend_err),
		}
	}
}

/// If `handle` has sat idle longer than `keep_alive_interval`, probe the link with a RETRY/ACK
/// round before the caller's real exchange, so a connection that's gone stale (or stone dead)
/// surfaces as `LinkClosed` here rather than as a confusing mid-transfer timeout.
fn keep_alive_if_stale<C: PacketChannel>(session: &mut Session<'_, C>, config: &Config, handle: &mut SessionHandle) -> Result<(), LinkError> {
	if handle.last_activity.elapsed() < config.timers.keep_alive_interval() {
		return Ok(());
	}
	session.keep_alive()?;
	handle.last_activity = Instant::now();
	Ok(())
}

fn backend_err(e: TncError) -> LinkError {
	match e {
		TncError::TransportClosed => LinkError::LinkClosed,
		other => LinkError::BackendError(other.to_string()),
	}
}
