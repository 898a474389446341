//! Static cluster-membership directory.  Built once at startup from configuration; membership
//! never changes at runtime (consensus over membership itself is out of scope).

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use scooter_wire::{Error, NodeId};

///////////////////////////////////////////// PeerAddr //////////////////////////////////////////

/// One configured peer: `node_id=host:port`, mirroring the `id=connect` shape the teacher's own
/// `rpc_pb::Host` parses, but keyed by a plain integer id rather than a generated host id type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerAddr {
    pub node_id: NodeId,
    pub connect: String,
}

impl FromStr for PeerAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, connect) = s
            .split_once('=')
            .ok_or_else(|| Error::recovery_failure(format!("malformed peer address: {s}")))?;
        let node_id: NodeId = id
            .parse()
            .map_err(|_| Error::recovery_failure(format!("malformed node id in {s}")))?;
        Ok(PeerAddr {
            node_id,
            connect: connect.to_string(),
        })
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.node_id, self.connect)
    }
}

///////////////////////////////////////////// PeerInfo ///////////////////////////////////////////

#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub node_id: NodeId,
    pub connect: String,
    pub is_self: bool,
}

////////////////////////////////////////////// Directory /////////////////////////////////////////

/// The ensemble's static membership.  `leader_hint` is advisory telemetry, observed from Paxos
/// rounds as they arrive, never a lease -- the opportunistic leader design this workspace chose
/// over a formal lease protocol.
pub struct Directory {
    self_id: NodeId,
    peers: Vec<PeerInfo>,
    leader_hint: AtomicU64,
}

impl Directory {
    pub fn new(self_id: NodeId, addrs: &[PeerAddr]) -> Self {
        let peers = addrs
            .iter()
            .map(|a| PeerInfo {
                node_id: a.node_id,
                connect: a.connect.clone(),
                is_self: a.node_id == self_id,
            })
            .collect();
        Directory {
            self_id,
            peers,
            leader_hint: AtomicU64::new(self_id),
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    /// All other configured nodes -- the acceptors/learners a proposer must contact.
    pub fn other_peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.iter().filter(|p| !p.is_self)
    }

    pub fn quorum_size(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    pub fn ensemble_size(&self) -> usize {
        self.peers.len()
    }

    pub fn connect_for(&self, node_id: NodeId) -> Option<&str> {
        self.peers
            .iter()
            .find(|p| p.node_id == node_id)
            .map(|p| p.connect.as_str())
    }

    pub fn leader_hint(&self) -> NodeId {
        self.leader_hint.load(Ordering::Relaxed)
    }

    pub fn set_leader_hint(&self, node_id: NodeId) {
        self.leader_hint.store(node_id, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_peer_addr() {
        let p: PeerAddr = "3=10.0.0.5:9000".parse().unwrap();
        assert_eq!(p.node_id, 3);
        assert_eq!(p.connect, "10.0.0.5:9000");
    }

    #[test]
    fn quorum_size_for_five_nodes() {
        let addrs: Vec<PeerAddr> = (0..5)
            .map(|i| PeerAddr {
                node_id: i,
                connect: format!("host{i}:9000"),
            })
            .collect();
        let dir = Directory::new(0, &addrs);
        assert_eq!(dir.quorum_size(), 3);
        assert_eq!(dir.other_peers().count(), 4);
    }
}
