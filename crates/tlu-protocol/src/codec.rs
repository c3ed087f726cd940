//! Streaming line codec
//!
//! Accumulates raw transport bytes and yields complete newline-terminated
//! lines, handling partial reads and multiple lines per read. A trailing
//! carriage return before the terminator is stripped.

/// Maximum line length (reasonable limit to prevent buffer overflow)
const MAX_LINE_LEN: usize = 256;

/// Streaming accumulator for newline-delimited ASCII lines
#[derive(Debug)]
pub struct LineCodec {
    buffer: Vec<u8>,
}

impl LineCodec {
    /// Create an empty codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
        }
    }

    /// Push raw bytes into the codec's buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent buffer overflow
        if self.buffer.len() > MAX_LINE_LEN * 4 {
            // Keep only the last portion
            let start = self.buffer.len() - MAX_LINE_LEN;
            self.buffer = self.buffer[start..].to_vec();
        }
    }

    /// Try to extract the next complete line, without its terminator
    pub fn next_line(&mut self) -> Option<String> {
        let term_pos = self.buffer.iter().position(|&b| b == b'\n')?;

        let mut line: Vec<u8> = self.buffer.drain(..=term_pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}
