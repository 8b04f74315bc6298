pub mod handle;
pub mod hash;
pub mod snapshot;
pub mod store;

pub use handle::RegistryHandle;
pub use store::Registry;
