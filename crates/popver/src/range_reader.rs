use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::future::LocalBoxFuture;
use futures::io::{AsyncRead, AsyncSeek, BufReader};
use url::Url;

use crate::transport::{self, Transport};

/// Buffer size used when handing a [`RangeReader`] to an archive reader.
pub(crate) const RANGE_BUFFER_SIZE: usize = 64 * 1024;

/// A seekable view of a remote document that fetches only the bytes being read.
///
/// Every read turns into a single range request for exactly the bytes asked for, so it
/// should be wrapped in a [`BufReader`] (see [`RangeReader::buffered`]).
pub(crate) struct RangeReader<'a, T> {
    transport: &'a T,
    url: &'a Url,
    len: u64,
    pos: u64,
    pending: Option<LocalBoxFuture<'a, Result<Bytes, transport::Error>>>,
}

impl<'a, T: Transport> RangeReader<'a, T> {
    /// Find the length of `url` and return a reader positioned at its start.
    pub(crate) async fn new(transport: &'a T, url: &'a Url) -> Result<Self, transport::Error> {
        let len = transport.content_length(url).await?;
        Ok(Self {
            transport,
            url,
            len,
            pos: 0,
            pending: None,
        })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn buffered(self) -> BufReader<Self> {
        BufReader::with_capacity(RANGE_BUFFER_SIZE, self)
    }
}

impl<'a, T: Transport> AsyncRead for RangeReader<'a, T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() || this.pos >= this.len {
            return Poll::Ready(Ok(0));
        }

        let pending = this.pending.get_or_insert_with(|| {
            let end = this.len.min(this.pos + buf.len() as u64);
            Box::pin(this.transport.get_range(this.url, this.pos..end))
        });
        let result = ready!(pending.as_mut().poll(cx));
        this.pending = None;

        let bytes = result.map_err(io::Error::other)?;
        let n = bytes.len().min(buf.len());
        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("`{}` returned no bytes at offset {}", this.url, this.pos),
            )));
        }
        buf[..n].copy_from_slice(&bytes[..n]);
        this.pos += n as u64;

        Poll::Ready(Ok(n))
    }
}

impl<'a, T: Transport> AsyncSeek for RangeReader<'a, T> {
    fn poll_seek(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        pos: SeekFrom,
    ) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => this.len.checked_add_signed(offset),
            SeekFrom::Current(offset) => this.pos.checked_add_signed(offset),
        };
        let Some(target) = target else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )));
        };

        // An in-flight read was for the old position.
        this.pending = None;
        this.pos = target;

        Poll::Ready(Ok(target))
    }
}
