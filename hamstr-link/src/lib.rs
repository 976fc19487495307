//! The reliable radio transport and session layer ("the link core") for HAMSTR: framing over
//! KISS, an AX.25 UI-frame codec, a stop-and-wait segmentation protocol, a half-duplex session
//! state machine, a VARA tunnel mode, and the single-threaded scheduler that serializes all of it
//! onto one TNC.
//!
//! Everything above this crate (NOSTR event signing, relay I/O, the HTTP/WebSocket frontend,
//! note storage, wallet-connect payload construction, config-file parsing) is conventional
//! plumbing that talks to the core only through [`api`].

pub mod api;
pub mod ax25;
pub mod callsign;
pub mod config;
pub mod crc;
pub mod error;
pub mod events;
pub mod kiss;
pub mod packet;
pub mod scheduler;
pub mod segmentation;
pub mod session;
pub mod tnc;
pub mod vara_adapter;

pub use api::{Link, SessionHandle};
pub use callsign::Callsign;
pub use config::Config;
pub use error::{LinkError, Phase};
pub use events::{Category, Event};
pub use packet::MessageType;
pub use session::Responder;
