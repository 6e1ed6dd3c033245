/// Incremental parser for `text/event-stream` bodies.
///
/// Yields the `data` payload of every complete event. Payloads are opaque here;
/// decoding them is the core's job.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    buffer: Vec<u8>,
}

impl SseFrameParser {
    /// Feed arbitrary bytes into the parser and drain complete frames.
    ///
    /// Bytes are only decoded once a whole event is buffered, so a multi-byte
    /// character split across network chunks survives intact.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.contains(&b'\r') {
            strip_crlf(&mut self.buffer);
        }

        let mut frames = Vec::new();
        while let Some(split) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..split + 2).collect();
            let block = String::from_utf8_lossy(&block[..split]);

            if let Some(payload) = extract_data_payload(&block) {
                frames.push(payload);
            }
        }

        frames
    }

    /// Parse a complete SSE body in one shot.
    pub fn parse_frames(input: &str) -> Vec<String> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

// A trailing '\r' is kept until the next chunk shows whether '\n' follows.
fn strip_crlf(buffer: &mut Vec<u8>) {
    let mut normalized = Vec::with_capacity(buffer.len());
    let mut bytes = buffer.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        if byte == b'\r' && bytes.peek() == Some(&b'\n') {
            continue;
        }
        normalized.push(byte);
    }
    *buffer = normalized;
}

fn extract_data_payload(block: &str) -> Option<String> {
    let data_lines: Vec<&str> = block
        .lines()
        .filter(|line| !line.starts_with(':'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    let payload = data_lines.join("\n");
    if payload.trim().is_empty() {
        None
    } else {
        Some(payload)
    }
}
