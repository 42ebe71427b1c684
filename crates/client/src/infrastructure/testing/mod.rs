//! Test utilities for the bridge client
//!
//! Available in unit tests and, for downstream crates, behind the `testing`
//! feature:
//!
//! ```toml
//! [dev-dependencies]
//! evbridge-client = { workspace = true, features = ["testing"] }
//! ```

mod channel_transport;

pub use channel_transport::ChannelTransport;
