//! evbridge Protocol - Wire types for the event-bus bridge
//!
//! This crate contains everything that crosses the bridge connection:
//! - The `Envelope` record and its `EnvelopeType`
//! - Typed string `Headers`
//! - `ReplyFailure`, the payload of `err` envelopes
//! - The envelope codec (`encode` / `decode`)
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json and thiserror
//! 2. **No connection logic** - Pure data types, validation and serialization
//! 3. **Validate at the boundary** - A decoded envelope is always well-formed

pub mod codec;
pub mod envelope;
pub mod failure;

pub use codec::{decode, encode, CodecError};
pub use envelope::{Envelope, EnvelopeType, Headers};
pub use failure::ReplyFailure;
