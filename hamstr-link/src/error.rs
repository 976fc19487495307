//! Errors surfaced across the §6 external interface (§7).
//!
//! Internally, the segmentation and session state machines follow the teacher-style convention
//! of `utils::error::Result<T>` (a unit error with the detail already logged at the failure
//! site) for conditions that are *recovered locally*: a CRC failure, a duplicate packet, an ACK
//! timeout still within its retry budget. Those never need to carry a payload past the point
//! where they're handled. [`LinkError`] exists only for what actually crosses the API boundary:
//! a terminal timeout, a protocol violation, a closed link, or a cancellation.

/// Which phase of the session exchange a [`LinkError::Timeout`] occurred during.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
	Connect,
	Ack,
	Data,
	Ready,
	Done,
	Disconnect,
}

impl std::fmt::Display for Phase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Phase::Connect => "CONNECT",
			Phase::Ack => "ACK",
			Phase::Data => "DATA",
			Phase::Ready => "READY",
			Phase::Done => "DONE",
			Phase::Disconnect => "DISCONNECT",
		};
		f.write_str(s)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
	/// The transport vanished; no further operations are possible on this handle.
	#[error("link closed")]
	LinkClosed,

	/// A retry budget for `phase` was exhausted without the expected reply.
	#[error("timed out waiting for {0}")]
	Timeout(Phase),

	/// Wrong message type for the current state, a session id mismatch, an oversized packet, or
	/// a malformed body.
	#[error("protocol violation: {0}")]
	ProtocolViolation(String),

	/// The sender exhausted its `MISSING_CYCLES` recovery budget with packets still missing.
	#[error("transmission incomplete; missing sequences: {0:?}")]
	IncompleteTransmission(Vec<u16>),

	/// The receiver gave up reissuing `PKT_MISSING` with packets still missing.
	#[error("reception incomplete; missing sequences: {0:?}")]
	ReceiveIncomplete(Vec<u16>),

	/// A cooperative abort was requested via the session's cancellation primitive.
	#[error("cancelled")]
	Cancelled,

	/// An opaque failure from the TNC or VARA backend.
	#[error("backend error: {0}")]
	BackendError(String),
}
