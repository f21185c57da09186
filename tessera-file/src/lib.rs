#![allow(clippy::cast_possible_truncation)]
//! Read and write Tessera files, a self-describing columnar format for Arrow record batches.
//!
//! A file stores one table. Rows are cut into page row groups of a fixed number of rows, and
//! within each group every column (and every nested child column) is written as its own page,
//! so any column can be decoded without touching the bytes of another.
//!
//! # Writing
//!
//! A [`FileWriter`] is created from an Arrow schema, [`WriteOptions`] and any
//! [`WriteSink`](tessera_io::WriteSink). Batches are buffered until `batch_size` rows are
//! available and then flushed as one page per column. [`FileWriter::finalize`] flushes the
//! remainder, the dictionaries, the manifest and the trailer.
//!
//! # Reading
//!
//! A [`FileReader`] wraps any [`ReadAt`](tessera_io::ReadAt) byte source. Opening performs no
//! IO; the manifest is loaded on first use with two small reads (the trailer, then the
//! manifest) and memoized for the lifetime of the reader. Scans are built with
//! [`ScanBuilder`], which pushes column projection and row filtering into the decode path and
//! yields batches in file order while decoding them concurrently on a [`TaskExecutor`].
//!
//! # File Format
//!
//! ```text
//! ┌────────────────────────────┐
//! │   4-byte magic ("TSRA")    │
//! ├────────────────────────────┤
//! │   Page row group 0         │
//! │  (one page per column,     │
//! │   nested children after    │
//! │   their parent)            │
//! ├────────────────────────────┤
//! │   Page row group 1 ...     │
//! ├────────────────────────────┤
//! │   Dictionaries             │
//! │  (one per dictionary       │
//! │   encoded column)          │
//! ├────────────────────────────┤
//! │   Manifest (protobuf)      │
//! │  (schema, page layout)     │
//! ├────────────────────────────┤
//! │   24-byte trailer          │
//! │  (manifest offset, length, │
//! │   crc32, version, magic)   │
//! └────────────────────────────┘
//! ```
//!
//! All integers and fixed-width values are little-endian.

#[cfg(not(target_endian = "little"))]
compile_error!("tessera-file only supports little-endian targets");

#[macro_use]
mod macros;

mod cache;
mod encoding;
mod format;
mod manifest;
mod reader;
pub mod scan;
mod schema;
mod source;
mod types;
mod writer;

pub use cache::*;
pub use encoding::Encoding;
pub use format::*;
pub use forever_constant::*;
pub use manifest::*;
pub use reader::*;
pub use scan::{ScanBuilder, ScanOptions, TaskExecutor, TaskExecutorExt};
pub use schema::*;
pub use source::*;
pub use types::*;
pub use writer::*;

/// The identifier this format registers under with a host scanning framework.
pub const FORMAT_TYPE_NAME: &str = "tessera";

/// The conventional file extension, without the leading dot.
pub const FILE_EXTENSION: &str = "tessera";

/// The Arrow field metadata key carrying a field's stable id.
pub const FIELD_ID_METADATA_KEY: &str = "tessera:field_id";

/// Constants that will never change (i.e., doing so would break backwards compatibility)
mod forever_constant {
    /// The extension for Tessera files.
    pub const MAGIC_BYTES: [u8; 4] = *b"TSRA";

    /// The size of the fixed trailer at the end of every file.
    pub const TRAILER_SIZE: usize = 24;

    /// The current version of the file format.
    pub const VERSION: u16 = 1;

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn never_change_these_constants() {
            assert_eq!(MAGIC_BYTES, *b"TSRA");
            assert_eq!(TRAILER_SIZE, 24);
            assert_eq!(VERSION, 1);
        }
    }
}
