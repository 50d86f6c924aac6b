// Shared mutable state: the upstream session slot

pub mod session_manager;

pub use session_manager::SessionManager;
