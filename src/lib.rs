#![deny(clippy::mod_module_files)]
//! Git packfile decoding and encoding over pluggable object stores.
//!
//! [`pack::decode`] turns a pack stream into a lazy sequence of resolved
//! objects; [`pack::Encoder`] writes a pack from ids held by an
//! [`storage::ObjectSource`].

pub mod config;
pub mod error;
pub mod object;
pub mod pack;
pub mod storage;

pub use config::PackStoreConfig;
pub use error::PackError;
pub use object::ObjectId;
