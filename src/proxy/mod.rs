// Upstream transport and request forwarding

pub mod client;
pub mod forwarder;
pub mod signature;

pub use client::HttpUpstreamClient;
pub use forwarder::{ForwardOutcome, RequestForwarder, MAX_SESSION_RENEWALS};
pub use signature::InvalidSessionSignature;
