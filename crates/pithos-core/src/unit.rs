//! Units: the packets that move between tiers, peers and the overlay.
//!
//! A unit is deliberately not `Clone`. Every hop takes it by value, so a
//! unit that has been handed off cannot be forwarded a second time.

use serde::{Deserialize, Serialize};

use crate::address::TransportAddress;
use crate::object::StoredObject;
use crate::wire::WireError;

/// Wire-level discriminator carried by every unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PayloadType {
    Write = 1,
    Response = 2,
    Inform = 3,
    JoinReq = 4,
    JoinAccept = 5,
    RetrieveReq = 6,
    PeerLeft = 7,
    PeerJoin = 8,
    ReplicationReq = 9,
    Replicate = 10,
    ObjectAdd = 11,
    SpObjectAdd = 12,
    SpPeerLeft = 13,
    SpPeerMigrated = 14,
    OverlayWriteReq = 15,
}

impl PayloadType {
    pub const ALL: [PayloadType; 15] = [
        PayloadType::Write,
        PayloadType::Response,
        PayloadType::Inform,
        PayloadType::JoinReq,
        PayloadType::JoinAccept,
        PayloadType::RetrieveReq,
        PayloadType::PeerLeft,
        PayloadType::PeerJoin,
        PayloadType::ReplicationReq,
        PayloadType::Replicate,
        PayloadType::ObjectAdd,
        PayloadType::SpObjectAdd,
        PayloadType::SpPeerLeft,
        PayloadType::SpPeerMigrated,
        PayloadType::OverlayWriteReq,
    ];

    /// Types handled by the group-storage sub-component.
    pub fn is_group_storage(self) -> bool {
        matches!(
            self,
            PayloadType::Write
                | PayloadType::Response
                | PayloadType::JoinAccept
                | PayloadType::Inform
                | PayloadType::RetrieveReq
                | PayloadType::PeerLeft
                | PayloadType::PeerJoin
                | PayloadType::ReplicationReq
                | PayloadType::Replicate
                | PayloadType::ObjectAdd
        )
    }

    /// Types only a super peer may handle.
    pub fn is_super_peer(self) -> bool {
        matches!(
            self,
            PayloadType::JoinReq
                | PayloadType::SpObjectAdd
                | PayloadType::SpPeerLeft
                | PayloadType::SpPeerMigrated
                | PayloadType::OverlayWriteReq
        )
    }
}

impl TryFrom<u8> for PayloadType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PayloadType::ALL
            .iter()
            .copied()
            .find(|t| *t as u8 == value)
            .ok_or(WireError::UnknownPayloadType(value))
    }
}

impl From<PayloadType> for u8 {
    fn from(t: PayloadType) -> u8 {
        t as u8
    }
}

/// What the sender wants done with a unit leaving the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Send straight to `destination` over the transport.
    #[default]
    Direct,
    /// Store the attached object via the overlay, keyed by its name.
    OverlayStore,
}

/// A packet travelling through the node.
#[derive(Debug, PartialEq, Eq)]
pub struct Unit {
    pub payload_type: PayloadType,
    pub destination: TransportAddress,
    /// Set by the receiving transport; unspecified for locally created units.
    pub source: TransportAddress,
    /// Declared length in bytes, used for traffic accounting.
    pub byte_length: u32,
    pub object: Option<StoredObject>,
    pub intent: Intent,
}

impl Unit {
    pub fn new(payload_type: PayloadType, destination: TransportAddress, byte_length: u32) -> Self {
        Self {
            payload_type,
            destination,
            source: TransportAddress::UNSPECIFIED,
            byte_length,
            object: None,
            intent: Intent::Direct,
        }
    }

    pub fn with_object(mut self, object: StoredObject) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_source(mut self, source: TransportAddress) -> Self {
        self.source = source;
        self
    }

    /// A store-via-overlay request for `object`.
    pub fn overlay_store(object: StoredObject) -> Self {
        let byte_length = u32::try_from(object.size()).unwrap_or(u32::MAX);
        Unit::new(PayloadType::OverlayWriteReq, TransportAddress::UNSPECIFIED, byte_length)
            .with_object(object)
            .with_intent(Intent::OverlayStore)
    }

    pub fn is_overlay_store(&self) -> bool {
        self.intent == Intent::OverlayStore
    }
}
