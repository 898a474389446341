//! Peer RPC layer: typed messages for Paxos phases and catch-up, hosted over `busyrpc`'s
//! thread-pooled, TLS-wrapped TCP transport exactly as this workspace's other RPC-based tools do.

pub mod host;
pub mod messages;
pub mod peer;
pub mod service;

pub use messages::*;
pub use peer::{fresh_context, PeerChannel, PeerChannels};
pub use service::{
    AcceptorClient, AcceptorServer, AcceptorService, ReplicationClient, ReplicationServer,
    ReplicationService,
};
