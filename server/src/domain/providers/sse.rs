//! SSE stream parsing helpers shared by all provider adapters
//!
//! Providers stream responses as server-sent events over a chunked body.
//! Chunk boundaries do not align with event boundaries, so bytes are
//! buffered and complete events drained as they appear.

/// Maximum bytes buffered between event boundaries (4 MiB).
/// Prevents memory exhaustion from a misbehaving upstream.
pub const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Maximum bytes read from an error response body (32 KiB)
pub const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

/// Drain the next complete SSE event from the buffer, if any
pub fn drain_next_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Extract the concatenated `data:` payload from a raw SSE event
pub fn extract_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }

            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    if found { Some(data) } else { None }
}

/// Read an HTTP error response body with a size cap
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{}...(truncated)", text);
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_single_event() {
        let mut buffer = b"data: hello\n\n".to_vec();
        let event = drain_next_event(&mut buffer).unwrap();
        assert_eq!(event, b"data: hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_partial_event_waits() {
        let mut buffer = b"data: hel".to_vec();
        assert!(drain_next_event(&mut buffer).is_none());
        assert_eq!(buffer, b"data: hel");
    }

    #[test]
    fn test_drain_multiple_events_in_order() {
        let mut buffer = b"data: one\n\ndata: two\n\n".to_vec();
        assert_eq!(drain_next_event(&mut buffer).unwrap(), b"data: one");
        assert_eq!(drain_next_event(&mut buffer).unwrap(), b"data: two");
        assert!(drain_next_event(&mut buffer).is_none());
    }

    #[test]
    fn test_drain_crlf_delimited() {
        let mut buffer = b"data: x\r\n\r\nrest".to_vec();
        assert_eq!(drain_next_event(&mut buffer).unwrap(), b"data: x");
        assert_eq!(buffer, b"rest");
    }

    #[test]
    fn test_extract_data_simple() {
        assert_eq!(extract_data("data: hello").as_deref(), Some("hello"));
        assert_eq!(extract_data("data:hello").as_deref(), Some("hello"));
    }

    #[test]
    fn test_extract_data_multiline() {
        assert_eq!(
            extract_data("data: line1\ndata: line2").as_deref(),
            Some("line1\nline2")
        );
    }

    #[test]
    fn test_extract_data_ignores_other_fields() {
        let event = "event: delta\nid: 3\ndata: payload";
        assert_eq!(extract_data(event).as_deref(), Some("payload"));
    }

    #[test]
    fn test_extract_data_none_without_data_field() {
        assert!(extract_data("event: ping").is_none());
        assert!(extract_data("").is_none());
    }
}
