use serde_json::Value;
use tracing::debug;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Encode one message as a `Content-Length`-framed JSON payload, returned as
/// a single contiguous buffer so the caller can issue one write.
pub fn encode_frame(message: &Value) -> serde_json::Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Streaming parser for `Content-Length`-framed JSON.
///
/// Push arbitrary byte chunks; complete frames come back in write order.
/// A header block without a usable `Content-Length` is skipped; a body that
/// is not valid JSON is dropped; partial frames never emit.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            let Some(sep) = find_subslice(&self.buf, HEADER_TERMINATOR) else {
                break;
            };
            let body_start = sep + HEADER_TERMINATOR.len();

            let Some(len) = parse_content_length(&self.buf[..sep]) else {
                // Malformed header block: advance past the bad separator and
                // keep scanning.
                self.buf.drain(..body_start);
                continue;
            };

            if self.buf.len() < body_start + len {
                break;
            }

            match serde_json::from_slice::<Value>(&self.buf[body_start..body_start + len]) {
                Ok(message) => out.push(message),
                Err(err) => debug!(error = %err, "dropping frame with undecodable body"),
            }
            self.buf.drain(..body_start + len);
        }
        out
    }
}

fn parse_content_length(header: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(header).ok()?;
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            return value.trim().parse::<usize>().ok();
        }
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
