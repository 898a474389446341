//! Client-side wiring: one long-lived channel pair per configured peer, reused across every call
//! the proposer/recovery coordinator makes to that peer -- matching how `busyrpc`'s own benchmark
//! client holds a single `Arc<dyn rpc_pb::Client>` for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use busyrpc::{new_client, ClientOptions, StringResolver};
use rpc_pb::Context;

use scooter_directory::Directory;
use scooter_wire::{Error, NodeId};

use crate::service::{AcceptorClient, ReplicationClient};

/// Everything needed to talk to one peer.
pub struct PeerChannel {
    pub node_id: NodeId,
    pub acceptor: AcceptorClient,
    pub replication: ReplicationClient,
}

/// All configured peers' channels, indexed by node id.  Built once at startup; channels are
/// internally synchronized by `busyrpc`, so this registry is safe to share across the proposer's
/// per-slot fan-out threads.
pub struct PeerChannels {
    channels: HashMap<NodeId, PeerChannel>,
}

impl PeerChannels {
    /// Build a registry directly from already-constructed channels. The production path is
    /// always [`PeerChannels::connect`]; this is the seam integration tests use to wire peers
    /// together over an in-process transport instead of real sockets.
    pub fn new(channels: HashMap<NodeId, PeerChannel>) -> Self {
        Self { channels }
    }

    pub fn connect(directory: &Directory, options: ClientOptions) -> Result<Self, Error> {
        let mut channels = HashMap::new();
        for peer in directory.other_peers() {
            let resolver = StringResolver::new(&peer.connect)
                .map_err(Error::from)?;
            let transport: Arc<dyn rpc_pb::Client + Send + Sync> =
                new_client(options.clone(), resolver);
            let channel = PeerChannel {
                node_id: peer.node_id,
                acceptor: AcceptorClient::new(Arc::clone(&transport)),
                replication: ReplicationClient::new(transport),
            };
            channels.insert(peer.node_id, channel);
        }
        Ok(Self { channels })
    }

    pub fn get(&self, node_id: NodeId) -> Option<&PeerChannel> {
        self.channels.get(&node_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &PeerChannel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// A fresh context for an outbound call.  No caller chain, no trace: internal Paxos traffic does
/// not need the client-request tracing `rpc_pb::Context` supports for external callers.
pub fn fresh_context() -> Context {
    Context::default()
}
