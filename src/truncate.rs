//! `core::fmt::Write` into a fixed buffer with `snprintf`-style truncation.

use core::fmt;

/// Writes formatted text into `buf`, keeping the last byte for a terminator.
///
/// Text that does not fit is silently dropped, so at most `buf.len() - 1` bytes
/// of text are stored. The cut can land inside a multi-byte character; the
/// result is bytes on a wire, not a `str`.
pub(crate) struct Truncating<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Truncating<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Truncating { buf, len: 0 }
    }

    /// Writes the terminator after the text and returns the text length.
    pub(crate) fn finish(self) -> usize {
        if let Some(b) = self.buf.get_mut(self.len) {
            *b = 0;
        }
        self.len
    }
}

impl fmt::Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len().saturating_sub(1) - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn fits() {
        let mut buf = [0xff; 16];
        let mut w = Truncating::new(&mut buf);
        write!(w, "Second {}\n", 7).unwrap();
        let len = w.finish();
        assert_eq!(len, 9);
        assert_eq!(&buf[..10], b"Second 7\n\0");
    }

    #[test]
    fn exactly_one_short_of_capacity() {
        let mut buf = [0xff; 8];
        let mut w = Truncating::new(&mut buf);
        w.write_str("1234567").unwrap();
        assert_eq!(w.finish(), 7);
        assert_eq!(&buf, b"1234567\0");
    }

    #[test]
    fn truncates_to_capacity_minus_one() {
        let mut buf = [0xff; 8];
        let mut w = Truncating::new(&mut buf);
        w.write_str("abcd").unwrap();
        w.write_str("efghijkl").unwrap();
        w.write_str("mn").unwrap();
        assert_eq!(w.finish(), 7);
        assert_eq!(&buf, b"abcdefg\0");
    }

    #[test]
    fn empty_buffer_holds_nothing() {
        let mut buf = [0u8; 0];
        let mut w = Truncating::new(&mut buf);
        w.write_str("abc").unwrap();
        assert_eq!(w.finish(), 0);
    }

    #[test]
    fn single_byte_buffer_only_terminates() {
        let mut buf = [0xff; 1];
        let mut w = Truncating::new(&mut buf);
        w.write_str("abc").unwrap();
        assert_eq!(w.finish(), 0);
        assert_eq!(buf, [0]);
    }
}
