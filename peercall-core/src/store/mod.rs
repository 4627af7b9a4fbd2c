pub mod codec;
pub mod error;
pub mod keys;
pub mod traits;

pub use error::{Result, StoreError};
pub use keys::SessionKeys;
pub use traits::{SignalingStore, WatchStream};
