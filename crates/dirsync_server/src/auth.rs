//! Authentication seam.
//!
//! The protocol carries no credentials; an [`Authenticator`] decides from
//! the peer address alone. With `require_auth` set and no authenticator
//! installed, every peer is unauthenticated.

use std::net::{IpAddr, SocketAddr};

/// Decides whether a freshly accepted peer may mutate or subscribe.
pub trait Authenticator: Send + Sync {
    /// Returns true if the peer is authenticated.
    fn authenticate(&self, peer: Option<SocketAddr>) -> bool;
}

/// Accepts peers connecting from a fixed set of addresses.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    addrs: Vec<IpAddr>,
}

impl AllowList {
    /// Creates an allow list.
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }
}

impl Authenticator for AllowList {
    fn authenticate(&self, peer: Option<SocketAddr>) -> bool {
        peer.is_some_and(|p| self.addrs.contains(&p.ip()))
    }
}
