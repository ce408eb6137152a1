use serde_json::Value;

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if present.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

/// Encode one SSE frame: `event: <name>\ndata: <json>\n\n`.
pub fn encode_sse_event(name: &str, payload: &Value) -> String {
    format!("event: {name}\ndata: {payload}\n\n")
}

/// Small SSE decoder used by tests and diagnostics.
///
/// Each blank-line-delimited block becomes one event; comments and unknown
/// fields are ignored.
pub fn decode_sse_events(buf: &str) -> Vec<SseEvent> {
    let mut out = Vec::new();
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    let mut flush = |event: &mut Option<String>, data_lines: &mut Vec<&str>| {
        if !data_lines.is_empty() {
            out.push(SseEvent {
                event: event.take(),
                data: data_lines.join("\n"),
            });
            data_lines.clear();
        }
    };

    for line in buf.split('\n') {
        let l = line.trim_end_matches('\r');

        if l.is_empty() {
            flush(&mut event, &mut data_lines);
            continue;
        }
        if l.starts_with(':') {
            continue;
        }
        if let Some(rest) = l.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
            continue;
        }
        if let Some(rest) = l.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    flush(&mut event, &mut data_lines);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_decode_round_trip() {
        let wire = encode_sse_event("message", &json!({"jsonrpc":"2.0","id":1}));
        let events = decode_sse_events(&wire);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\",\"id\":1}");
    }

    #[test]
    fn decodes_typed_event_sequence() {
        let s = "event: status\ndata: {\"type\":\"connected\"}\n\nevent: ping\ndata: {}\n\n";
        let events = decode_sse_events(s);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("status"));
        assert_eq!(events[1].event.as_deref(), Some("ping"));
    }

    #[test]
    fn joins_multiline_data_and_skips_comments() {
        let s = ": keepalive\ndata: a\ndata: b\n\n";
        let events = decode_sse_events(s);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(events[0].event, None);
    }
}
