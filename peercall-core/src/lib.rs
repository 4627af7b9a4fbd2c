//! Platform-independent building blocks for peer call signaling: the
//! documents exchanged through the signaling store and the store seam itself.

pub mod store;
pub mod types;
