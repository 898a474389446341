mod config;

use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arrrg::CommandLine;
use biometrics::{Collector, PlainTextEmitter};
use busyrpc::{ClientOptions, ServerOptions};
use rpc_pb::{Host, HostID};

use scooter_core::{AcceptorHandle, Node, NodeOptions, ReplicationHandle};
use scooter_directory::Directory;
use scooter_http::{HttpDirectory, HttpServer};
use scooter_rpc::PeerChannels;

use config::NodeConfig;

fn main() {
    std::thread::spawn(|| {
        let mut collector = Collector::new();
        scooter_core::register_biometrics(&collector);
        scooter_http::register_biometrics(&collector);
        let fout = File::create("/dev/stdout").expect("stdout must be writable");
        let mut emit = PlainTextEmitter::new(fout);
        loop {
            let now_millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            if let Err(e) = collector.emit(&mut emit, now_millis) {
                eprintln!("collector error: {e}");
            }
            std::thread::sleep(Duration::from_millis(249));
        }
    });

    let (options, free) = NodeConfig::from_command_line_relaxed("USAGE: scooter-node [options]");
    if !free.is_empty() {
        eprintln!("command ignores positional arguments: {free:?}");
    }

    let peer_addrs = config::parse_peer_list(&options.peers).expect("malformed --peers");
    let http_peer_addrs = config::parse_peer_list(&options.http_peers).expect("malformed --http-peers");

    let directory = Arc::new(Directory::new(options.node_id, &peer_addrs));
    let http_directory = Arc::new(HttpDirectory::new(&http_peer_addrs));

    let peers = PeerChannels::connect(&directory, ClientOptions::default())
        .expect("failed to construct peer channels");

    let node = Arc::new(Node::new(
        directory.clone(),
        peers,
        NodeOptions {
            node_id: options.node_id,
            log_compaction_threshold: options.log_compaction_threshold,
            round_timeout: Duration::from_millis(options.round_timeout_ms),
            recovery_timeout: Duration::from_millis(options.recovery_timeout_ms),
        },
    ));

    // Recovery runs to completion on this startup thread, before either listener opens, per the
    // recovery coordinator's contract: no client or peer traffic is served until the node is
    // caught up.
    node.recover_and_start()
        .expect("recovery failed: refusing to serve from a node with unknown state");

    let rpc_bind_connect = directory
        .connect_for(options.node_id)
        .expect("this node's own id must be present in --peers")
        .to_string();
    let server_options = ServerOptions::default()
        .with_ca_file(&options.ca_file)
        .with_private_key_file(&options.private_key_file)
        .with_certificate_file(&options.certificate_file)
        .with_bind_to(&Host::new(HostID::generate().expect("entropy available"), rpc_bind_connect))
        .with_thread_pool_size(options.thread_pool_size)
        .with_user_send_buffer_size(options.user_send_buffer_size);

    let (rpc_server, _cancel_rpc) = scooter_rpc::host::serve(
        server_options,
        AcceptorHandle(node.clone()),
        ReplicationHandle(node.clone()),
    )
    .expect("failed to bind peer RPC listener");

    let http_bind = options.http_bind.clone();
    let http_server = HttpServer::new(node.clone(), http_directory);

    let rpc_thread = std::thread::spawn(move || {
        if let Err(e) = rpc_server.serve() {
            eprintln!("peer RPC server exited: {e}");
        }
    });

    if let Err(e) = http_server.serve(&http_bind) {
        eprintln!("HTTP server exited: {e}");
    }

    let _ = rpc_thread.join();
}
