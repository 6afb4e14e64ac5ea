//! Response compression.
//!
//! Files are compressed on the fly while they stream to the client. The
//! encoding is picked from the request's `Accept-Encoding`: gzip first,
//! then deflate (zlib framing, as HTTP defines it), otherwise identity.

use async_compression::tokio::bufread::{GzipEncoder, ZlibEncoder};
use axum::http::HeaderValue;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use stowage_storage::ByteStream;
use tokio_util::io::{ReaderStream, StreamReader};

/// Body stream handed to the HTTP layer.
pub type EncodedStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Content encoding of a response body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
    Identity,
}

impl Encoding {
    /// Pick an encoding from an `Accept-Encoding` header value.
    ///
    /// Tokens are matched as whole words; quality values are not weighed.
    pub fn negotiate(accept: Option<&HeaderValue>) -> Self {
        let Some(accept) = accept.and_then(|v| v.to_str().ok()) else {
            return Self::Identity;
        };
        let advertises = |name: &str| {
            accept
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                .any(|token| token.eq_ignore_ascii_case(name))
        };
        if advertises("gzip") {
            Self::Gzip
        } else if advertises("deflate") {
            Self::Deflate
        } else {
            Self::Identity
        }
    }

    /// Value for the `Content-Encoding` header, `None` for identity.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::Gzip => Some("gzip"),
            Self::Deflate => Some("deflate"),
            Self::Identity => None,
        }
    }
}

/// Wrap a file stream in the chosen encoder.
pub fn encode_stream(input: ByteStream, encoding: Encoding) -> EncodedStream {
    let input = input.map(|chunk| chunk.map_err(io::Error::other));
    match encoding {
        Encoding::Identity => Box::pin(input),
        Encoding::Gzip => Box::pin(ReaderStream::new(GzipEncoder::new(StreamReader::new(input)))),
        Encoding::Deflate => {
            Box::pin(ReaderStream::new(ZlibEncoder::new(StreamReader::new(input))))
        }
    }
}
