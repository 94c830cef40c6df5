//! Durable-tier backend implementations.

pub mod file;
pub mod noop;
#[cfg(feature = "s3")]
pub mod s3;

pub use file::FileOutputStore;
pub use noop::NoopOutputStore;
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3OutputStore};
