// Core types are re-exported so callers only need this crate.
pub use peercall_core::types;

pub mod calls;
pub mod config;
pub mod store;

pub use calls::{CallEnvironment, CallError, CallHandle, CallManager, CallStatus, CallView};
pub use config::CallConfig;
