pub mod memory;

pub use memory::InMemorySignalingStore;
pub use peercall_core::store::*;
