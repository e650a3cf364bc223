//! PaySys - account verification server for legacy game clients
//!
//! Speaks the PaySys wire protocol to Bishop relays and one-shot clients,
//! recovering per-client XOR keys on the fly.

/// Server configuration
pub mod config;
/// Error taxonomy
pub mod error;
/// Transport, cipher, ACL, and the resilience governor
pub mod network;
/// Cipher key resolution
pub mod resolver;
/// Server implementations
pub mod servers;
