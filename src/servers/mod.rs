//! Server implementations
//!
//! - paysys: account verification for Bishop relays and game clients

pub mod paysys;
