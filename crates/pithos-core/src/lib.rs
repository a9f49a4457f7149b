//! pithos-core: shared types, wire format, and content addressing.
//! All other Pithos crates depend on this one.

pub mod address;
pub mod config;
pub mod key;
pub mod object;
pub mod rpc;
pub mod unit;
pub mod wire;

pub use address::TransportAddress;
pub use key::{derive_key, OverlayKey};
pub use object::StoredObject;
pub use rpc::{CallId, CallOrigin, CallPayload, CallTarget, CallType, Component, InboundCall, ResponsePayload};
pub use unit::{Intent, PayloadType, Unit};
