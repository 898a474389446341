//! Server-side wiring: hosts the two peer services on one `busyrpc::Server`, exactly as
//! `busyrpc-benchmark-server` hosts its benchmark service -- one `ServiceRegistry`, one bound
//! TLS listener, one thread pool.

use busyrpc::{Server, ServerOptions, ServiceRegistry};

use scooter_wire::Error;

use crate::service::{AcceptorServer, AcceptorService, ReplicationServer, ReplicationService};

/// Bind and start the peer listener.  Returns the running server plus a shutdown thunk, same
/// shape `busyrpc::Server::new` returns so callers can cancel cleanly on node shutdown.
pub fn serve<A, R>(
    options: ServerOptions,
    acceptor: A,
    replication: R,
) -> Result<(Server, impl FnOnce()), Error>
where
    A: AcceptorService,
    R: ReplicationService,
{
    let mut registry = ServiceRegistry::new();
    registry.register("AcceptorService", AcceptorServer::bind(acceptor));
    registry.register("ReplicationService", ReplicationServer::bind(replication));
    let (server, shutdown) = Server::new(options, registry)?;
    Ok((server, shutdown))
}
