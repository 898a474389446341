//! Command-line configuration (3.1's `NodeConfig`), parsed with the same `arrrg_derive` derive
//! the rest of this workspace's binaries use. `peers`/`http_peers` are comma-separated
//! `id=host:port` lists rather than a repeated flag: `arrrg_derive` has no repeated-flag support,
//! so a single delimited string plays the same role `shvar`-split arguments play elsewhere in this
//! workspace's binaries.

use scooter_directory::PeerAddr;
use scooter_wire::{Error, NodeId};

#[derive(arrrg_derive::CommandLine, Debug)]
pub struct NodeConfig {
    #[arrrg(required, "This node's id within the ensemble.")]
    pub node_id: NodeId,
    #[arrrg(required, "Comma-separated id=host:port peer-channel addresses, self included.")]
    pub peers: String,
    #[arrrg(required, "Comma-separated id=host:port HTTP forwarding addresses, self included.")]
    pub http_peers: String,
    #[arrrg(required, "Address the client HTTP surface binds to.")]
    pub http_bind: String,
    #[arrrg(required, "Path to the CA certificate for the peer channel.")]
    pub ca_file: String,
    #[arrrg(required, "Path to the private key file for the peer channel.")]
    pub private_key_file: String,
    #[arrrg(required, "Path to the certificate file for the peer channel.")]
    pub certificate_file: String,
    #[arrrg(optional, "Applied entries above firstSlot that trigger an automatic snapshot.")]
    pub log_compaction_threshold: u64,
    #[arrrg(optional, "Per-phase proposer deadline, in milliseconds.")]
    pub round_timeout_ms: u64,
    #[arrrg(optional, "Maximum time to wait for a peer to answer during startup recovery, in milliseconds.")]
    pub recovery_timeout_ms: u64,
    #[arrrg(optional, "Number of threads the peer RPC server spawns.")]
    pub thread_pool_size: u16,
    #[arrrg(optional, "Userspace send-buffer size for the peer RPC server.")]
    pub user_send_buffer_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: 0,
            peers: String::new(),
            http_peers: String::new(),
            http_bind: String::new(),
            ca_file: String::new(),
            private_key_file: String::new(),
            certificate_file: String::new(),
            log_compaction_threshold: 10_000,
            round_timeout_ms: 250,
            recovery_timeout_ms: 5_000,
            thread_pool_size: 4,
            user_send_buffer_size: 65536,
        }
    }
}

/// Parse a comma-separated `id=host:port` list, rejecting anything malformed rather than
/// silently skipping it -- startup configuration errors belong at startup, not as a hobbled node.
pub fn parse_peer_list(raw: &str) -> Result<Vec<PeerAddr>, Error> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
