/**
 * STUN message codec and ICE local candidate gathering for an ORTC stack.
 *
 * `stun` encodes and decodes RFC 3489/5389 messages, including
 * MESSAGE-INTEGRITY and FINGERPRINT. `ice` gathers host and server
 * reflexive candidates and publishes them as events.
 */
pub mod auth;
pub mod config;
pub mod error;
pub mod ice;
pub mod logging;
pub mod net;
pub mod stun;
mod utils;

pub use error::{IceError, StunError};
