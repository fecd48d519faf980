#![forbid(unsafe_code)]

//! Minimal HTTP/1.1 framing: one request per connection, `Connection: close`.

use serde_json::Value;
use std::io::{Read, Write};

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 16 * 1024;
const MAX_PATH_BYTES: usize = 256;
const MAX_QUERY_VALUE_BYTES: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    /// Raw request target, query string included.
    pub(crate) target: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl HttpRequest {
    pub(crate) fn path(&self) -> String {
        normalize_path(&self.target)
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// First non-empty value of `key`. A value that is present but does not
    /// decode is reported as `Some(None)`.
    pub(crate) fn query(&self, key: &str) -> Option<Option<String>> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                (name.trim() == key).then_some(value.trim())
            })
            .next()
            .filter(|value| !value.is_empty())
            .map(percent_decode)
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn head_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Reads until the blank line after the headers, EOF, a stalled socket or the
/// header cap. Bytes past the blank line are returned as well.
fn read_head<R: Read>(stream: &mut R) -> std::io::Result<Vec<u8>> {
    let mut chunk = [0u8; 4096];
    let mut data = Vec::new();
    while head_end(&data).is_none() && data.len() <= MAX_HEADER_BYTES {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => data.extend_from_slice(&chunk[..read]),
            Err(err) if is_transient(&err) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(data)
}

fn parse_head(head: &str) -> (String, String, Vec<(String, String)>) {
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or("/").to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    (method, target, headers)
}

pub(crate) fn read_request<R: Read>(stream: &mut R) -> std::io::Result<Option<HttpRequest>> {
    let data = read_head(stream)?;
    if data.is_empty() {
        return Ok(None);
    }
    let split = head_end(&data).unwrap_or(data.len());
    let (method, target, headers) = parse_head(&String::from_utf8_lossy(&data[..split]));
    let mut request = HttpRequest {
        method,
        target,
        headers,
        body: Vec::new(),
    };

    let declared = request
        .header("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0)
        .min(MAX_BODY_BYTES);
    let mut body = data[split..].to_vec();
    body.truncate(declared);
    let missing = declared - body.len();
    if missing > 0 {
        match stream.take(missing as u64).read_to_end(&mut body) {
            Ok(_) => {}
            Err(err) if is_transient(&err) => {}
            Err(err) => return Err(err),
        }
    }
    request.body = body;
    Ok(Some(request))
}

pub(crate) fn normalize_path(raw: &str) -> String {
    let path = raw.split('?').next().unwrap_or_default().trim();
    let unsafe_path = path.len() > MAX_PATH_BYTES || path.contains("..") || path.contains('\\');
    match path.trim_end_matches('/') {
        "" => "/".to_string(),
        _ if unsafe_path => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Form-style decoding: `+` is a space, `%XX` a byte. Malformed escapes,
/// oversized values and non-UTF-8 results yield `None`.
pub(crate) fn percent_decode(value: &str) -> Option<String> {
    if value.len() > MAX_QUERY_VALUE_BYTES {
        return None;
    }
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while let Some((&byte, tail)) = rest.split_first() {
        rest = tail;
        match byte {
            b'+' => out.push(b' '),
            b'%' => {
                let digits = rest
                    .get(..2)
                    .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit))?;
                let text = std::str::from_utf8(digits).ok()?;
                out.push(u8::from_str_radix(text, 16).ok()?);
                rest = &rest[2..];
            }
            other => out.push(other),
        }
    }
    String::from_utf8(out).ok()
}

pub(crate) fn write_response<W: Write>(
    stream: &mut W,
    status: &str,
    content_type: &str,
    body: &[u8],
    head_only: bool,
) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(256 + body.len());
    write!(
        out,
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Cache-Control: no-store\r\n\
         X-Content-Type-Options: nosniff\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    )?;
    if !head_only {
        out.extend_from_slice(body);
    }
    stream.write_all(&out)?;
    stream.flush()
}

pub(crate) fn write_json<W: Write>(
    stream: &mut W,
    status: &str,
    body: &Value,
    head_only: bool,
) -> std::io::Result<()> {
    write_response(
        stream,
        status,
        "application/json; charset=utf-8",
        body.to_string().as_bytes(),
        head_only,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_request_line_headers_and_body() {
        let raw = b"POST /tree/invalidate?x=1 HTTP/1.1\r\nHost: localhost\r\nX-Viewer-Id: 7\r\nContent-Length: 12\r\n\r\n{\"all\":true}trailing";
        let request = read_request(&mut Cursor::new(raw.to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path(), "/tree/invalidate");
        assert_eq!(request.header("x-viewer-id"), Some("7"));
        assert_eq!(request.body, b"{\"all\":true}");
    }

    #[test]
    fn empty_stream_yields_no_request() {
        assert!(read_request(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    fn get(target: &str) -> HttpRequest {
        HttpRequest {
            method: "GET".to_string(),
            target: target.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let request =
            get("/tree/search?q=canis+lu%70us&limit=5&friend_ids=1%2C2%2c3&mode=&bad=%zz");
        assert_eq!(request.query("q"), Some(Some("canis lupus".to_string())));
        assert_eq!(request.query("friend_ids"), Some(Some("1,2,3".to_string())));
        assert_eq!(request.query("limit"), Some(Some("5".to_string())));
        assert_eq!(request.query("mode"), None);
        assert_eq!(request.query("bad"), Some(None));
        assert_eq!(request.query("viewer"), None);
        assert_eq!(get("/tree").query("mode"), None);

        assert_eq!(percent_decode("%4"), None);
        assert_eq!(percent_decode("%+f"), None);
        assert_eq!(percent_decode("caf%C3%A9").as_deref(), Some("café"));
        assert_eq!(percent_decode("%FF"), None);
        assert_eq!(percent_decode(&"a".repeat(MAX_QUERY_VALUE_BYTES + 1)), None);
    }

    #[test]
    fn short_body_is_returned_as_far_as_it_arrived() {
        let raw = b"POST /tree/invalidate HTTP/1.1\r\nContent-Length: 40\r\n\r\n{\"all\":true}";
        let request = read_request(&mut Cursor::new(raw.to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(request.body, b"{\"all\":true}");
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("/tree/?mode=global"), "/tree");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/../etc"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("///"), "/");
        assert_eq!(normalize_path(&format!("/{}", "a".repeat(MAX_PATH_BYTES))), "/");
    }

    #[test]
    fn responses_carry_length_and_no_store() {
        let mut out = Vec::new();
        write_json(&mut out, "200 OK", &serde_json::json!({"ok": true}), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Cache-Control: no-store\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"ok\":true}"));

        let mut head = Vec::new();
        write_json(&mut head, "200 OK", &serde_json::json!({"ok": true}), true).unwrap();
        assert!(String::from_utf8(head).unwrap().ends_with("\r\n\r\n"));
    }
}
