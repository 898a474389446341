//! The leader-forwarding hop (4.9): a second, internal-only HTTP call from the node that received
//! a write to the current leader's HTTP listener, carrying the same method, path, and JSON body
//! the client sent. Kept off the `busyrpc` peer channel on purpose -- that channel is Paxos
//! traffic only.

use std::io::Read;

use scooter_wire::Error;

/// Re-issue `method path` with `body` against `leader_addr` and return the leader's status code
/// and response body verbatim, so the caller can hand it straight back to the original client.
pub fn forward(leader_addr: &str, method: &str, path: &str, body: &[u8]) -> Result<(u16, Vec<u8>), Error> {
    let url = format!("http://{leader_addr}{path}");
    let request = ureq::request(method, &url).set("content-type", "application/json");
    let result = if body.is_empty() {
        request.call()
    } else {
        request.send_bytes(body)
    };
    match result {
        Ok(resp) | Err(ureq::Error::Status(_, resp)) => {
            let status = resp.status();
            let mut out = Vec::new();
            resp.into_reader()
                .read_to_end(&mut out)
                .map_err(Error::from)?;
            Ok((status, out))
        }
        Err(ureq::Error::Transport(t)) => Err(Error::transport_failure(format!(
            "forwarding to leader at {leader_addr} failed: {t}"
        ))),
    }
}
