pub mod identity;
pub mod protocol;
pub mod types;
