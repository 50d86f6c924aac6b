// Library root for the session-bridging proxy

pub mod core;
pub mod state;
pub mod api;
pub mod proxy;
pub mod config;
