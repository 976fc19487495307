//! The logging tap (§2.9, §9): a typed event stream, rendered to the stable ASCII line format
//! (§6) only at the observer boundary. Downstream consumers (the UI translator) parse that ASCII
//! form; internally, everything that produces an event constructs a typed [`Event`], never a
//! string.

use std::fmt;
use std::sync::Mutex;

use crate::callsign::Callsign;
use crate::packet::MessageType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
	System,
	Client,
	Session,
	Packet,
	Control,
	Progress,
	Warning,
	Error,
}

impl fmt::Display for Category {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Category::System => "SYSTEM",
			Category::Client => "CLIENT",
			Category::Session => "SESSION",
			Category::Packet => "PACKET",
			Category::Control => "CONTROL",
			Category::Progress => "PROGRESS",
			Category::Warning => "WARNING",
			Category::Error => "ERROR",
		};
		f.write_str(s)
	}
}

fn type_name(kind: MessageType) -> &'static str {
	use MessageType::*;
	match kind {
		Connect => "CONNECT",
		ConnectAck => "CONNECT_ACK",
		Ready => "READY",
		DataRequest => "DATA_REQUEST",
		Note => "NOTE",
		Response => "RESPONSE",
		Ack => "ACK",
		Done => "DONE",
		DoneAck => "DONE_ACK",
		Disconnect => "DISCONNECT",
		DisconnectAck => "DISCONNECT_ACK",
		PktMissing => "PKT_MISSING",
		Retry => "RETRY",
		ZapKind9734Request => "ZAP_KIND9734_REQUEST",
		NwcPaymentRequest => "NWC_PAYMENT_REQUEST",
		ZapSuccessConfirm => "ZAP_SUCCESS_CONFIRM",
		Error => "ERROR",
	}
}

/// A single tagged telemetry event. Every producer in this crate emits one of these; only the
/// `ascii()` rendering below turns it into the line format external tooling expects.
#[derive(Clone, Debug)]
pub enum Event {
	/// Free-text line under a given category, for conditions not covered by a structured variant
	/// below (startup/shutdown notices, backend errors, etc).
	Text(Category, String),
	SendingPacket { kind: MessageType, seq: u16, total: u16, estimated_secs: f64 },
	ReceivedControl { kind: MessageType, content: String },
	Connected { remote: Callsign },
	DisconnectComplete,
	Progress { pct: f64 },
}

impl Event {
	pub fn category(&self) -> Category {
		match self {
			Event::Text(cat, _) => *cat,
			Event::SendingPacket { .. } | Event::ReceivedControl { .. } => Category::Control,
			Event::Connected { .. } | Event::DisconnectComplete => Category::Session,
			Event::Progress { .. } => Category::Progress,
		}
	}

	/// Render the stable, newline-free ASCII line format (§6).
	pub fn ascii(&self) -> String {
		match self {
			Event::Text(cat, text) => format!("[{cat}] {text}"),
			Event::SendingPacket { kind, seq, total, estimated_secs } => {
				format!(
					"[CONTROL] Sending packet: Type={}, Seq={}/{}, Estimated transmission time: {:.2} seconds",
					type_name(*kind),
					seq,
					total,
					estimated_secs
				)
			}
			Event::ReceivedControl { kind, content } => {
				format!("[CONTROL] Received control: Type={}, Content={}", type_name(*kind), content)
			}
			Event::Connected { remote } => format!("[SESSION] CONNECTED to {remote}"),
			Event::DisconnectComplete => "[SESSION] Client disconnect complete".to_owned(),
			Event::Progress { pct } => format!("[PROGRESS] {pct:.2}% complete"),
		}
	}
}

/// An observer of the event stream, as installed via [`crate::api::Link::subscribe_logs`].
pub trait Observer: Send {
	fn on_event(&self, event: &Event);
}

impl<F: Fn(&Event) + Send> Observer for F {
	fn on_event(&self, event: &Event) {
		self(event)
	}
}

/// Fan-out observer list. Subscribe/unsubscribe are the one piece of cross-thread shared state
/// in the core that genuinely needs a lock (§5): the session loop emits events from its own
/// thread while a caller may subscribe or unsubscribe from another.
#[derive(Default)]
pub struct EventTap {
	observers: Mutex<Vec<(u64, Box<dyn Observer>)>>,
	next_id: Mutex<u64>,
}

/// A token returned by [`EventTap::subscribe`], used to unsubscribe later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserverId(u64);

impl EventTap {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe(&self, observer: impl Observer + 'static) -> ObserverId {
		let mut next_id = self.next_id.lock().expect("event tap id counter poisoned");
		let id = *next_id;
		*next_id += 1;

		self.observers.lock().expect("event tap observer list poisoned").push((id, Box::new(observer)));

		ObserverId(id)
	}

	pub fn unsubscribe(&self, id: ObserverId) {
		self.observers.lock().expect("event tap observer list poisoned").retain(|(this_id, _)| *this_id != id.0);
	}

	pub fn emit(&self, event: Event) {
		for (_, observer) in self.observers.lock().expect("event tap observer list poisoned").iter() {
			observer.on_event(&event);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex as StdMutex};

	use super::*;

	#[test]
	fn renders_sending_packet_line() {
		let e = Event::SendingPacket { kind: MessageType::Response, seq: 1, total: 3, estimated_secs: 1.5 };
		assert_eq!(e.ascii(), "[CONTROL] Sending packet: Type=RESPONSE, Seq=1/3, Estimated transmission time: 1.50 seconds");
	}

	#[test]
	fn renders_progress_line() {
		let e = Event::Progress { pct: 100.0 };
		assert_eq!(e.ascii(), "[PROGRESS] 100.00% complete");
	}

	#[test]
	fn subscribe_and_unsubscribe_stop_delivery() {
		let tap = EventTap::new();
		let seen = Arc::new(StdMutex::new(Vec::new()));

		let seen_clone = seen.clone();
		let id = tap.subscribe(move |e: &Event| seen_clone.lock().unwrap().push(e.ascii()));

		tap.emit(Event::DisconnectComplete);
		assert_eq!(seen.lock().unwrap().len(), 1);

		tap.unsubscribe(id);
		tap.emit(Event::DisconnectComplete);
		assert_eq!(seen.lock().unwrap().len(), 1);
	}
}
