//! Optional gzip wrapping of archive byte streams.

use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use tokio::io::{AsyncRead, BufReader};

/// A boxed byte stream.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Gzip-compress `reader`.
pub fn compress(reader: impl AsyncRead + Send + Unpin + 'static) -> ByteStream {
    Box::new(GzipEncoder::new(BufReader::new(reader)))
}

/// Decompress a gzip stream. Concatenated members are decoded as one stream.
pub fn decompress(reader: impl AsyncRead + Send + Unpin + 'static) -> ByteStream {
    let mut decoder = GzipDecoder::new(BufReader::new(reader));
    decoder.multiple_members(true);
    Box::new(decoder)
}

/// `reader` itself, or its decompressed form when `gzip` is set.
pub(crate) fn maybe_decompress(
    reader: impl AsyncRead + Send + Unpin + 'static,
    gzip: bool,
) -> ByteStream {
    if gzip {
        decompress(reader)
    } else {
        Box::new(reader)
    }
}
