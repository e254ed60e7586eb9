//! Hostwarden agent contract.
//!
//! Message shapes produced by an installed agent and consumed by the panel.
//! The provisioner renders an agent that speaks exactly this protocol.

pub mod protocol;

pub use protocol::*;
