//! The scooter-fleet client HTTP surface: item CRUD, snapshot trigger, peer listing, and
//! transparent forwarding of writes to the current leader (4.9, 4.12, 6). A thin external
//! collaborator by design -- the interesting state lives in `scooter-core`.

pub mod directory;
pub mod forwarder;
pub mod router;
pub mod server;
pub mod wire;

pub use directory::HttpDirectory;
pub use server::HttpServer;

pub fn register_biometrics(collector: &biometrics::Collector) {
    router::register_biometrics(collector);
}
