//! Data access — typed wrappers over the hosted service's rows, auth and
//! storage.

pub mod memory;
pub mod rest;
pub mod traits;

pub use memory::MemoryBackend;
pub use rest::RestBackend;
pub use traits::Backend;
