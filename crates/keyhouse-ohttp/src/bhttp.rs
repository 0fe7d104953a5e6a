//! Binary HTTP Messages (RFC 9292)
//!
//! The compact HTTP envelope carried inside Oblivious HTTP: a request
//! must be a single sealed blob, so the usual text framing is replaced
//! with varint-prefixed fields.
//!
//! ## Request Layout
//!
//! ```text
//! framing indicator (varint = 0)
//! method, scheme, authority, path   (each varint-length-prefixed)
//! header section: varint total length, then (name, value) pairs
//! content: varint length, then bytes
//! trailer section (optional on decode; encoded as empty)
//! ```
//!
//! Responses use framing indicator 1 and a varint status code in place of
//! the control data.
//!
//! ## Known-Length Only
//!
//! The indeterminate-length forms exist for streaming producers; this
//! service always has the whole message in hand before framing it, so
//! indicators 2 and 3 are rejected on decode.
//!
//! ## Decode Tolerance
//!
//! Messages truncated after the content are accepted (the RFC allows
//! dropping empty trailing sections), as is trailing zero padding. Real
//! trailers are not supported.
//!
//! ## Usage
//!
//! ```ignore
//! let request = BinaryHttpRequest::post("/v2/getvalues", json_body);
//! let wire = request.encode();
//! let back = BinaryHttpRequest::decode(&wire)?;
//! assert_eq!(back.body, request.body);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use keyhouse_core::varint::{decode_varint, encode_varint};
use keyhouse_core::{KvError, Result};

const FRAMING_REQUEST_KNOWN_LENGTH: u64 = 0;
const FRAMING_RESPONSE_KNOWN_LENGTH: u64 = 1;

/// A Binary HTTP request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryHttpRequest {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl BinaryHttpRequest {
    /// A POST request carrying `body`, the shape clients of this service
    /// send.
    pub fn post(path: &str, body: impl Into<Bytes>) -> Self {
        Self {
            method: "POST".to_string(),
            scheme: "https".to_string(),
            authority: String::new(),
            path: path.to_string(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, FRAMING_REQUEST_KNOWN_LENGTH);
        put_string(&mut buf, &self.method);
        put_string(&mut buf, &self.scheme);
        put_string(&mut buf, &self.authority);
        put_string(&mut buf, &self.path);
        put_field_section(&mut buf, &self.headers);
        put_content(&mut buf, &self.body);
        // Empty trailer section.
        encode_varint(&mut buf, 0);
        buf.freeze()
    }

    pub fn decode(message: &[u8]) -> Result<Self> {
        let mut buf = message;
        let framing = decode_varint(&mut buf)?;
        if framing != FRAMING_REQUEST_KNOWN_LENGTH {
            return Err(KvError::invalid_argument(format!(
                "Unsupported binary HTTP request framing: {framing}"
            )));
        }
        let method = get_string(&mut buf)?;
        let scheme = get_string(&mut buf)?;
        let authority = get_string(&mut buf)?;
        let path = get_string(&mut buf)?;
        let headers = get_field_section(&mut buf)?;
        let body = get_content(&mut buf)?;
        check_trailer(&mut buf)?;
        Ok(Self {
            method,
            scheme,
            authority,
            path,
            headers,
            body,
        })
    }
}

/// A Binary HTTP response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryHttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl BinaryHttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, FRAMING_RESPONSE_KNOWN_LENGTH);
        encode_varint(&mut buf, u64::from(self.status));
        put_field_section(&mut buf, &self.headers);
        put_content(&mut buf, &self.body);
        encode_varint(&mut buf, 0);
        buf.freeze()
    }

    pub fn decode(message: &[u8]) -> Result<Self> {
        let mut buf = message;
        let framing = decode_varint(&mut buf)?;
        if framing != FRAMING_RESPONSE_KNOWN_LENGTH {
            return Err(KvError::invalid_argument(format!(
                "Unsupported binary HTTP response framing: {framing}"
            )));
        }
        let status = decode_varint(&mut buf)?;
        if !(100..=599).contains(&status) {
            return Err(KvError::invalid_argument(format!(
                "Invalid binary HTTP status: {status}"
            )));
        }
        let headers = get_field_section(&mut buf)?;
        let body = get_content(&mut buf)?;
        check_trailer(&mut buf)?;
        Ok(Self {
            status: status as u16,
            headers,
            body,
        })
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    encode_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

fn put_field_section(buf: &mut BytesMut, fields: &[(String, String)]) {
    let mut section = BytesMut::new();
    for (name, value) in fields {
        put_string(&mut section, name);
        put_string(&mut section, value);
    }
    encode_varint(buf, section.len() as u64);
    buf.put_slice(&section);
}

fn put_content(buf: &mut BytesMut, body: &[u8]) {
    encode_varint(buf, body.len() as u64);
    buf.put_slice(body);
}

fn get_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = decode_varint(buf)? as usize;
    if buf.len() < len {
        return Err(KvError::invalid_argument("Truncated binary HTTP field"));
    }
    let (value, rest) = buf.split_at(len);
    *buf = rest;
    Ok(value)
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    let value = get_bytes(buf)?;
    String::from_utf8(value.to_vec())
        .map_err(|_| KvError::invalid_argument("Binary HTTP field is not UTF-8"))
}

fn get_field_section(buf: &mut &[u8]) -> Result<Vec<(String, String)>> {
    // A message truncated before the header section has no headers.
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    let mut section = get_bytes(buf)?;
    let mut fields = Vec::new();
    while !section.is_empty() {
        let name = get_string(&mut section)?;
        let value = get_string(&mut section)?;
        fields.push((name, value));
    }
    Ok(fields)
}

fn get_content(buf: &mut &[u8]) -> Result<Bytes> {
    if buf.is_empty() {
        return Ok(Bytes::new());
    }
    Ok(Bytes::copy_from_slice(get_bytes(buf)?))
}

/// Consume an optional empty trailer section and any zero padding.
fn check_trailer(buf: &mut &[u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let trailer = get_bytes(buf)?;
    if !trailer.is_empty() {
        return Err(KvError::invalid_argument(
            "Binary HTTP trailers are not supported",
        ));
    }
    if buf.iter().any(|&b| b != 0) {
        return Err(KvError::invalid_argument(
            "Unexpected bytes after binary HTTP message",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = BinaryHttpRequest {
            method: "PUT".to_string(),
            scheme: "https".to_string(),
            authority: "example.com".to_string(),
            path: "/v2/getvalues".to_string(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from_static(b"{\"metadata\":{}}"),
        };
        let decoded = BinaryHttpRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_post_helper() {
        let request = BinaryHttpRequest::post("/v2/getvalues", "body");
        let decoded = BinaryHttpRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded.method, "POST");
        assert_eq!(decoded.path, "/v2/getvalues");
        assert_eq!(decoded.body.as_ref(), b"body");
    }

    #[test]
    fn test_response_roundtrip() {
        let response = BinaryHttpResponse::with_body(200, "hello");
        let decoded = BinaryHttpResponse::decode(&response.encode()).unwrap();
        assert_eq!(decoded.status, 200);
        assert_eq!(decoded.body.as_ref(), b"hello");
    }

    #[test]
    fn test_response_with_headers() {
        let mut response = BinaryHttpResponse::with_body(400, "bad");
        response
            .headers
            .push(("content-type".to_string(), "text/plain".to_string()));
        let decoded = BinaryHttpResponse::decode(&response.encode()).unwrap();
        assert_eq!(decoded.headers.len(), 1);
        assert_eq!(decoded.status, 400);
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut request = BinaryHttpRequest::post("/", "");
        request
            .headers
            .push(("Accept-Encoding".to_string(), "br".to_string()));
        assert_eq!(request.header("accept-encoding"), Some("br"));
        assert_eq!(request.header("missing"), None);
    }

    #[test]
    fn test_truncated_after_content_accepted() {
        let request = BinaryHttpRequest::post("/p", "data");
        let encoded = request.encode();
        // Drop the empty trailer section byte.
        let truncated = &encoded[..encoded.len() - 1];
        let decoded = BinaryHttpRequest::decode(truncated).unwrap();
        assert_eq!(decoded.body.as_ref(), b"data");
    }

    #[test]
    fn test_zero_padding_accepted() {
        let request = BinaryHttpRequest::post("/p", "data");
        let mut padded = request.encode().to_vec();
        padded.extend_from_slice(&[0u8; 7]);
        let decoded = BinaryHttpRequest::decode(&padded).unwrap();
        assert_eq!(decoded.body.as_ref(), b"data");
    }

    #[test]
    fn test_indeterminate_framing_rejected() {
        // Framing indicator 2 = indeterminate-length request.
        let err = BinaryHttpRequest::decode(&[0x02]).unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_request_decode_of_response_rejected() {
        let response = BinaryHttpResponse::with_body(200, "x");
        assert!(BinaryHttpRequest::decode(&response.encode()).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(BinaryHttpRequest::decode(b"\x00garbage-without-structure").is_err());
    }

    #[test]
    fn test_invalid_status_rejected() {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, FRAMING_RESPONSE_KNOWN_LENGTH);
        encode_varint(&mut buf, 42);
        assert!(BinaryHttpResponse::decode(&buf).is_err());
    }

    #[test]
    fn test_empty_body_roundtrip() {
        let response = BinaryHttpResponse::new(500);
        let decoded = BinaryHttpResponse::decode(&response.encode()).unwrap();
        assert_eq!(decoded.status, 500);
        assert!(decoded.body.is_empty());
    }
}
