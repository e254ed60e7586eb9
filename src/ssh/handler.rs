//! russh client handler
//!
//! Provisioning targets are freshly added hosts, so their host keys are
//! trusted on first use. The fingerprint is logged so it can be audited.

use russh::client;
use russh::keys::ssh_key::{HashAlg, PublicKey};
use tracing::info;

pub struct ClientHandler {
    addr: String,
}

impl ClientHandler {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        info!(
            "[ssh] Accepting host key for {}: {} {}",
            self.addr,
            server_public_key.algorithm(),
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}
