use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// Column at which numeric output wraps with a backslash-newline. The wrap
/// happens at `LINE_LEN - 1` so the continuation backslash itself fits.
pub const LINE_LEN: usize = 70;

/// Buffered byte sink for everything the calculators print. Tracks the
/// current column so long numbers can wrap, dc-style, with `\` + newline.
pub struct Output {
    w: io::BufWriter<Box<dyn Write>>,
    nchars: usize,
    line_len: usize,
}

impl Output {
    pub fn new(w: Box<dyn Write>) -> Self {
        Output {
            w: io::BufWriter::new(w),
            nchars: 0,
            line_len: LINE_LEN,
        }
    }

    pub fn with_line_len(w: Box<dyn Write>, line_len: usize) -> Self {
        Output {
            w: io::BufWriter::new(w),
            nchars: 0,
            line_len,
        }
    }

    /// Emit one byte. Newlines reset the column counter.
    pub fn putchar(&mut self, c: u8) -> io::Result<()> {
        self.w.write_all(&[c])?;
        if c == b'\n' {
            self.nchars = 0;
        } else {
            self.nchars += 1;
        }
        Ok(())
    }

    /// Break the line with `\` + newline when the next character would not
    /// fit. Digit printers call this before every emission.
    pub fn wrap(&mut self) -> io::Result<()> {
        if self.nchars == self.line_len - 1 {
            self.w.write_all(b"\\\n")?;
            self.nchars = 0;
        }
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> io::Result<()> {
        for &b in s.as_bytes() {
            self.putchar(b)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}

/// A shared in-memory sink, for embedding and for the test suites.
#[derive(Clone, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    pub fn new() -> Self {
        Capture::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_at_line_len() {
        let cap = Capture::new();
        let mut out = Output::with_line_len(Box::new(cap.clone()), 4);
        for _ in 0..5 {
            out.wrap().unwrap();
            out.putchar(b'7').unwrap();
        }
        out.flush().unwrap();
        assert_eq!(cap.contents(), "777\\\n77");
    }

    #[test]
    fn test_newline_resets_column() {
        let cap = Capture::new();
        let mut out = Output::with_line_len(Box::new(cap.clone()), 4);
        out.write_str("ab\ncde").unwrap();
        out.wrap().unwrap();
        out.putchar(b'f').unwrap();
        out.flush().unwrap();
        assert_eq!(cap.contents(), "ab\ncde\\\nf");
    }
}
