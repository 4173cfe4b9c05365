pub mod client;
pub mod codec;

pub use client::MemcachedBackend;
pub use codec::{Command, MemcachedCodec, Reply};
