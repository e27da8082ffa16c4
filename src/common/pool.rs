//! Process-wide pool of buffered readers.
//!
//! Range readers are long-lived and all use the same buffer class, so the
//! backing buffers are recycled instead of reallocated per connection.
//! A released reader is reset over a no-op source, which drops (and so
//! closes) the response body it wrapped.

use std::io::{self, Read};

use parking_lot::Mutex;

/// Buffer class for pooled readers. Large enough that a contiguous parser
/// sweep stays on the discard fast path across small forward seeks.
pub const BUFFER_CAPACITY: usize = 32 * 1024;

const POOL_LIMIT: usize = 8;

static POOL: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

/// Read source that always reports EOF.
struct NoopSource;

impl Read for NoopSource {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

/// A buffered reader over a boxed source, with explicit access to the
/// buffered byte count and a discard operation for forward seeks.
pub struct BufferedReader {
    src: Box<dyn Read + Send>,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl BufferedReader {
    fn with_buffer(mut buf: Vec<u8>, src: Box<dyn Read + Send>) -> Self {
        buf.clear();
        buf.resize(BUFFER_CAPACITY, 0);
        Self {
            src,
            buf,
            pos: 0,
            filled: 0,
        }
    }

    /// Number of bytes sitting in the buffer ahead of the cursor.
    pub fn buffered(&self) -> usize {
        self.filled - self.pos
    }

    fn fill(&mut self) -> io::Result<usize> {
        self.pos = 0;
        self.filled = self.src.read(&mut self.buf)?;
        Ok(self.filled)
    }

    /// Skips `n` bytes, serving from the buffer first and reading the
    /// source for any remainder.
    pub fn discard(&mut self, mut n: usize) -> io::Result<()> {
        loop {
            let available = self.buffered();
            if n <= available {
                self.pos += n;
                return Ok(());
            }
            n -= available;
            self.pos = self.filled;
            if self.fill()? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "discard past end of stream",
                ));
            }
        }
    }

    fn reset(&mut self, src: Box<dyn Read + Send>) {
        self.src = src;
        self.pos = 0;
        self.filled = 0;
    }
}

impl Read for BufferedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffered() == 0 {
            // Large reads bypass the buffer entirely.
            if buf.len() >= self.buf.len() {
                return self.src.read(buf);
            }
            if self.fill()? == 0 {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.buffered());
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Takes a reader from the pool and resets it over `src`.
pub fn acquire(src: Box<dyn Read + Send>) -> BufferedReader {
    let buf = POOL.lock().pop().unwrap_or_default();
    BufferedReader::with_buffer(buf, src)
}

/// Resets a reader over a no-op source and returns its buffer to the pool.
/// The response body it wrapped is dropped here, closing the connection.
pub fn release(mut reader: BufferedReader) {
    reader.reset(Box::new(NoopSource));
    let mut pool = POOL.lock();
    if pool.len() < POOL_LIMIT {
        pool.push(reader.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_and_discard() {
        let data: Vec<u8> = (0..200u8).collect();
        let mut r = acquire(Box::new(Cursor::new(data.clone())));

        let mut head = [0u8; 4];
        r.read_exact(&mut head).unwrap();
        assert_eq!(&head, &data[..4]);
        assert!(r.buffered() > 0);

        r.discard(10).unwrap();
        let mut next = [0u8; 4];
        r.read_exact(&mut next).unwrap();
        assert_eq!(&next, &data[14..18]);
        release(r);
    }

    #[test]
    fn discard_past_buffer_reads_source() {
        let data = vec![7u8; BUFFER_CAPACITY * 2 + 64];
        let mut r = acquire(Box::new(Cursor::new(data)));
        let mut one = [0u8; 1];
        r.read_exact(&mut one).unwrap();
        r.discard(BUFFER_CAPACITY * 2).unwrap();
        r.read_exact(&mut one).unwrap();
        assert_eq!(one[0], 7);
        release(r);
    }
}
