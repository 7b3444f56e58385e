//! Byte access to stored source images.
//!
//! Everything above this layer reads sources through [`RangeReader`], so
//! the codecs are indifferent to whether bytes come from local disk, S3 or
//! memory. [`BlockCache`] sits in front of remote readers to coalesce the
//! many small reads that container parsing produces.

mod block_cache;
mod file_reader;
mod range_reader;
mod s3_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY};
pub use file_reader::FileRangeReader;
pub use range_reader::{MemoryReader, RangeReader};
pub use s3_reader::{create_s3_client, S3RangeReader};
