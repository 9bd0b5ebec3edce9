//! Incremental archive extraction.
//!
//! The [`Decoder`] turns arbitrarily chunked bytes into [`Event`]s without doing any I/O.
//! [`decode_into`] feeds it from an [`AsyncRead`](tokio::io::AsyncRead) and forwards events to an
//! [`EntrySink`]: [`MemorySink`] collects entries into an
//! [`ArchiveBuilder`](crate::ArchiveBuilder), [`DestinationSink`] writes them through a
//! [`Filesystem`](crate::fs::Filesystem).
//!
//! # Example
//!
//! ```
//! use ustar::stream::{Decoder, Event};
//!
//! let mut decoder = Decoder::new();
//! decoder.push(&[0u8; 1024]).unwrap();
//! assert_eq!(decoder.next_event().unwrap(), Some(Event::End));
//! decoder.finish().unwrap();
//! ```

mod decoder;
mod extractor;

pub use decoder::{Decoder, Event};
pub use extractor::{
    decode_into, extract, extract_with, DestinationSink, EntrySink, ExtractOptions, MemorySink,
};
