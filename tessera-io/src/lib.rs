//! Core traits and implementations for asynchronous IO.
//!
//! The file format runs on top of any random-access byte source for reading and any
//! append-only sink for writing. This crate provides those two traits and, via feature flags,
//! implementations for in-memory buffers and tokio files.

pub use instrumented::*;
pub use read::*;
#[cfg(feature = "tokio")]
pub use tokio::*;
pub use write::*;

mod instrumented;
mod read;
#[cfg(feature = "tokio")]
mod tokio;
mod write;
