//! Line-prefixing writer for job output.

use std::io::{self, Write};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Writes everything through to `inner`, starting each line with `prefix`.
pub struct LinePrefixer<W: Write> {
    inner: W,
    prefix: Vec<u8>,
    at_line_start: bool,
}

impl<W: Write> LinePrefixer<W> {
    pub fn new(inner: W, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into().into_bytes(),
            at_line_start: true,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LinePrefixer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            if self.at_line_start {
                self.inner.write_all(&self.prefix)?;
                self.at_line_start = false;
            }
            match rest.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.inner.write_all(&rest[..=end])?;
                    self.at_line_start = true;
                    rest = &rest[end + 1..];
                }
                None => {
                    self.inner.write_all(rest)?;
                    rest = &[];
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy `reader` into `writer` until EOF. Returns the bytes copied.
pub async fn forward_prefixed<R, W>(mut reader: R, writer: &mut LinePrefixer<W>) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut buf = [0u8; 4096];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.flush()?;
            return Ok(total);
        }
        writer.write_all(&buf[..n])?;
        writer.flush()?;
        total += n as u64;
    }
}
