use std::io;

use positioned_io::ReadAt;

use crate::Error;
use crate::Result;

/// Stateless wrapper around the image: every read names its own offset,
/// and either fills the whole buffer or fails. There is no cursor to
/// share, so decoders can't trample each other's position.
#[derive(Debug)]
pub struct InnerReader<R: ReadAt> {
    inner: R,
}

impl<R: ReadAt> InnerReader<R> {
    pub fn new(inner: R) -> InnerReader<R> {
        InnerReader { inner }
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.fill_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from `offset`, or fail with `ShortRead`/`Io`.
    pub fn fill_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            match self.inner.read_at(offset + done as u64, &mut buf[done..]) {
                Ok(0) => {
                    return Err(Error::ShortRead {
                        offset,
                        wanted: buf.len(),
                        got: done,
                    })
                }
                Ok(n) => done += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(Error::Io { offset, source }),
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
