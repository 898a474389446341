//! Maps each node id to the address its HTTP listener binds, separately from the `busyrpc` peer
//! channel `scooter_directory::Directory` already tracks -- the forwarding hop (4.9) is a second,
//! independent network, so it gets its own small address book instead of overloading the one
//! built for Paxos traffic.

use std::collections::HashMap;

use scooter_directory::PeerAddr;
use scooter_wire::NodeId;

pub struct HttpDirectory {
    addrs: HashMap<NodeId, String>,
}

impl HttpDirectory {
    pub fn new(entries: &[PeerAddr]) -> Self {
        let addrs = entries
            .iter()
            .map(|e| (e.node_id, e.connect.clone()))
            .collect();
        Self { addrs }
    }

    pub fn addr_for(&self, node_id: NodeId) -> Option<&str> {
        self.addrs.get(&node_id).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_configured_address() {
        let dir = HttpDirectory::new(&[PeerAddr { node_id: 2, connect: "10.0.0.2:8080".to_string() }]);
        assert_eq!(dir.addr_for(2), Some("10.0.0.2:8080"));
        assert_eq!(dir.addr_for(9), None);
    }
}
