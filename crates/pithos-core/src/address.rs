//! Transport addresses: where a unit is sent on the underlay.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// A node's transport address. May be unspecified, in which case nothing
/// can be sent to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportAddress(Option<SocketAddr>);

impl TransportAddress {
    /// The unspecified address. Units carrying it cannot be transmitted.
    pub const UNSPECIFIED: TransportAddress = TransportAddress(None);

    pub fn new(addr: SocketAddr) -> Self {
        Self(Some(addr))
    }

    pub fn is_unspecified(&self) -> bool {
        self.0.is_none()
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.0
    }
}

impl From<SocketAddr> for TransportAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{addr}"),
            None => f.write_str("<unspecified>"),
        }
    }
}
