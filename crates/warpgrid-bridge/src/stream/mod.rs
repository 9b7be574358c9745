//! Byte-stream adapters between host streams and blocking I/O.
//!
//! - [`HostStreamReader`]: a host readable stream read through `std::io::Read`
//! - [`ReaderSource`]: a blocking `Read` exposed to the host as a readable stream
//! - [`pipe`]: an in-process reader/writer pair for producing bodies incrementally

mod pipe;
mod reader;
mod source;

pub use pipe::{pipe, PipeCloser, PipeReader, PipeWriter};
pub use reader::HostStreamReader;
pub use source::ReaderSource;
