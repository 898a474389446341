//! The client-facing HTTP listener (4.12): a `tiny_http` synchronous server, one thread per
//! accepted connection, mirroring the `for stream in listener { thread::spawn(...) }` shape
//! `rivulet-benchmark-server` uses for its own accept loop, without pulling in `busyrpc`'s
//! TLS/epoll machinery -- this surface is explicitly a thin external collaborator, not the
//! replication transport.

use std::io::Read;
use std::sync::Arc;

use tiny_http::{Method, Response};

use scooter_core::Node;

use crate::directory::HttpDirectory;
use crate::router;

pub struct HttpServer {
    node: Arc<Node>,
    http_directory: Arc<HttpDirectory>,
}

impl HttpServer {
    pub fn new(node: Arc<Node>, http_directory: Arc<HttpDirectory>) -> Self {
        Self { node, http_directory }
    }

    /// Bind `addr` and serve forever, one thread per accepted request. Returns only on a bind
    /// failure; request-handling errors are mapped to HTTP status codes, never propagated here.
    pub fn serve(&self, addr: &str) -> Result<(), String> {
        let server = tiny_http::Server::http(addr).map_err(|e| format!("failed to bind {addr}: {e}"))?;
        let mut threads = Vec::new();
        for mut request in server.incoming_requests() {
            let node = Arc::clone(&self.node);
            let http_directory = Arc::clone(&self.http_directory);
            threads.push(std::thread::spawn(move || {
                let method = method_name(request.method());
                let path = request.url().to_string();
                let mut body = Vec::new();
                if let Err(e) = request.as_reader().read_to_end(&mut body) {
                    eprintln!("failed to read request body for {method} {path}: {e}");
                    let _ = request.respond(Response::from_string("bad request").with_status_code(400));
                    return;
                }
                let (status, response_body) = router::route(&node, &http_directory, method, &path, &body);
                let response = Response::from_data(response_body).with_status_code(status);
                if let Err(e) = request.respond(response) {
                    eprintln!("failed to write response for {method} {path}: {e}");
                }
            }));
        }
        for thread in threads {
            let _ = thread.join();
        }
        Ok(())
    }
}

fn method_name(method: &Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Put => "PUT",
        Method::Post => "POST",
        Method::Delete => "DELETE",
        Method::Head => "HEAD",
        Method::Patch => "PATCH",
        Method::Options => "OPTIONS",
        Method::Connect => "CONNECT",
        Method::Trace => "TRACE",
        Method::NonStandard(_) => "UNKNOWN",
    }
}
