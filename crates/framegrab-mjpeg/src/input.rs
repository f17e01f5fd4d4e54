//! Refillable stream buffer and separator search.

use std::io::{self, Read, Seek, SeekFrom};

/// A growable window over a byte stream.
///
/// Bytes before the cursor are dropped on the next refill; bytes after it
/// stay buffered until consumed, so a frame can be inspected in place while
/// more of it is read.
#[derive(Debug)]
pub struct InputBuffer<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    /// Absolute stream offset of `buf[0]`.
    base: u64,
    chunk: usize,
}

impl<R> InputBuffer<R> {
    pub fn new(reader: R, chunk: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(chunk.max(1)),
            pos: 0,
            base: 0,
            chunk: chunk.max(1),
        }
    }

    /// Absolute stream offset of the cursor.
    pub fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Buffered bytes from the cursor on.
    pub fn available(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Advance the cursor by up to `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    /// Drop everything buffered.
    pub fn discard(&mut self) {
        self.pos = self.buf.len();
    }

    fn reset(&mut self, base: u64) {
        self.buf.clear();
        self.pos = 0;
        self.base = base;
    }
}

impl<R: Read> InputBuffer<R> {
    /// Read one more chunk from the stream. Returns the number of bytes read,
    /// 0 at end of stream.
    pub fn refill(&mut self) -> io::Result<usize> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.base += self.pos as u64;
            self.pos = 0;
        }

        let old_len = self.buf.len();
        self.buf.resize(old_len + self.chunk, 0);
        let read = loop {
            match self.reader.read(&mut self.buf[old_len..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(old_len);
                    return Err(e);
                }
            }
        };
        self.buf.truncate(old_len + read);
        Ok(read)
    }

    /// Buffer at least `n` bytes past the cursor. Returns `false` if the
    /// stream ends first.
    pub fn fill_to(&mut self, n: usize) -> io::Result<bool> {
        while self.available().len() < n {
            if self.refill()? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Move the cursor onto the next occurrence of `separator`.
    ///
    /// Candidates are located by the separator's first byte and confirmed
    /// against the whole sequence, refilling as needed, so a separator split
    /// across two reads is still found. Returns `false` when the stream ends
    /// with fewer bytes than the separator, or after more than
    /// `refill_limit` consecutive refills without a single candidate byte.
    pub fn seek_marker(&mut self, separator: &[u8], refill_limit: u32) -> io::Result<bool> {
        let Some(&first) = separator.first() else {
            return Ok(true);
        };

        let mut fruitless = 0u32;
        loop {
            match self.available().iter().position(|&b| b == first) {
                Some(i) => {
                    fruitless = 0;
                    self.consume(i);
                    if !self.fill_to(separator.len())? {
                        tracing::debug!(
                            offset = self.position(),
                            "stream ends before a complete separator"
                        );
                        return Ok(false);
                    }
                    if self.available().starts_with(separator) {
                        return Ok(true);
                    }
                    self.consume(1);
                }
                None => {
                    self.discard();
                    fruitless += 1;
                    if fruitless > refill_limit {
                        tracing::warn!(
                            refills = fruitless,
                            offset = self.position(),
                            "no frame separator found; giving up"
                        );
                        return Ok(false);
                    }
                    if self.refill()? == 0 {
                        return Ok(false);
                    }
                }
            }
        }
    }
}

impl<R: Seek> InputBuffer<R> {
    /// Reposition the stream and drop all buffered input.
    pub fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reset(offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(out.len()).min(self.data.len());
            out[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_finds_separator_split_across_refills() {
        let data = [0x00, 0x11, 0x22, 0xFF, 0xD8, 0xFF, 0xE0];
        let mut input = InputBuffer::new(Trickle { data: &data, step: 4 }, 4);
        assert!(input.seek_marker(&[0xFF, 0xD8], 100).unwrap());
        assert_eq!(input.position(), 3);
        assert_eq!(&input.available()[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_skips_false_candidates() {
        let data = [0xFF, 0x00, 0xFF, 0xFF, 0xD8];
        let mut input = InputBuffer::new(Cursor::new(data), 2);
        assert!(input.seek_marker(&[0xFF, 0xD8], 100).unwrap());
        assert_eq!(input.position(), 3);
    }

    #[test]
    fn test_long_separator() {
        let data = b"junk--boundary\r\nrest";
        let mut input = InputBuffer::new(Trickle { data, step: 3 }, 3);
        assert!(input.seek_marker(b"--boundary", 100).unwrap());
        assert_eq!(input.position(), 4);
    }

    #[test]
    fn test_partial_separator_at_end() {
        let data = [0x01, 0x02, 0xFF];
        let mut input = InputBuffer::new(Cursor::new(data), 8);
        assert!(!input.seek_marker(&[0xFF, 0xD8], 100).unwrap());
    }

    #[test]
    fn test_gives_up_after_fruitless_refills() {
        let data = vec![0x55u8; 64];
        let mut input = InputBuffer::new(Trickle { data: &data, step: 4 }, 4);
        assert!(!input.seek_marker(&[0xFF, 0xD8], 3).unwrap());
        // 4 fruitless passes: the initial empty buffer plus 3 refills
        assert_eq!(input.position(), 12);
    }

    #[test]
    fn test_fill_to_keeps_unconsumed_bytes() {
        let data: Vec<u8> = (0..20).collect();
        let mut input = InputBuffer::new(Trickle { data: &data, step: 3 }, 3);
        assert!(input.fill_to(5).unwrap());
        input.consume(2);
        assert!(input.fill_to(10).unwrap());
        assert_eq!(input.available()[0], 2);
        assert_eq!(input.position(), 2);
        assert!(!input.fill_to(100).unwrap());
    }

    #[test]
    fn test_seek_drops_buffer() {
        let data: Vec<u8> = (0..32).collect();
        let mut input = InputBuffer::new(Cursor::new(data), 8);
        input.fill_to(8).unwrap();
        input.seek(20).unwrap();
        assert_eq!(input.position(), 20);
        assert!(input.available().is_empty());
        input.fill_to(1).unwrap();
        assert_eq!(input.available()[0], 20);
    }
}
