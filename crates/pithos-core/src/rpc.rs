//! Remote-call frame types shared by the correlation layer and the codec.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::TransportAddress;
use crate::object::StoredObject;

/// Identifier of one outstanding call. Unique among pending calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u32);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sub-components of a node that calls can be addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Communicator,
    Application,
    PeerLogic,
    GroupStorage,
    SuperPeer,
    DhtStorage,
}

/// Call-type tag used to look up an inbound call's handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Ping,
    ObjectPut,
    ObjectGet,
}

/// Typed call payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CallPayload {
    Ping,
    /// Store an object through the peer logic.
    ObjectPut { object: StoredObject },
    /// Retrieve an object by name through the peer logic.
    ObjectGet { name: String },
}

impl CallPayload {
    pub fn call_type(&self) -> CallType {
        match self {
            CallPayload::Ping => CallType::Ping,
            CallPayload::ObjectPut { .. } => CallType::ObjectPut,
            CallPayload::ObjectGet { .. } => CallType::ObjectGet,
        }
    }
}

/// Typed response payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResponsePayload {
    Pong,
    ObjectStored { name: String },
    ObjectFound { object: Option<StoredObject> },
    Failed { reason: String },
}

/// Where a call is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallTarget {
    /// Another component of this node.
    Internal(Component),
    /// Another node.
    External(TransportAddress),
}

/// Where an inbound call came from, and therefore where its response goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOrigin {
    Internal,
    External(TransportAddress),
}

/// A call as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub call_id: CallId,
    pub payload: CallPayload,
}

/// A response as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub call_id: CallId,
    pub payload: ResponsePayload,
}

/// A call delivered to its handler. The handler owns it from then on.
#[derive(Debug, PartialEq, Eq)]
pub struct InboundCall {
    pub call_id: CallId,
    pub origin: CallOrigin,
    pub payload: CallPayload,
}

impl InboundCall {
    pub fn call_type(&self) -> CallType {
        self.payload.call_type()
    }
}
