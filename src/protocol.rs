// Copyright 2020 Joyent, Inc.

//! Wire form of an envelope and the framing used to carry envelopes over a
//! byte stream.

use std::io;
use std::io::{Error, ErrorKind};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::IgnoredAny;
use serde_derive::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::header::Header;

/// An inbound envelope. The body fields are captured as raw JSON because
/// their type is not known until the header has been examined.
#[derive(Debug, Default, Deserialize)]
pub struct InMsg {
    #[serde(rename = "RequestId", default)]
    pub request_id: u64,
    #[serde(rename = "Type", default)]
    pub facade: String,
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "Request", default)]
    pub request: String,
    #[serde(rename = "Params", default)]
    pub params: Option<Box<RawValue>>,
    #[serde(rename = "Error", default)]
    pub error: String,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: String,
    #[serde(rename = "Response", default)]
    pub response: Option<Box<RawValue>>,
}

impl InMsg {
    pub fn header(&self) -> Header {
        Header {
            request_id: self.request_id,
            facade: self.facade.clone(),
            id: self.id.clone(),
            request: self.request.clone(),
            error: self.error.clone(),
            error_code: self.error_code.clone(),
        }
    }
}

/// An outbound envelope. Empty fields are left off the wire entirely.
#[derive(Debug, Serialize)]
pub struct OutMsg<'a, B: ?Sized> {
    #[serde(rename = "RequestId")]
    pub request_id: u64,
    #[serde(rename = "Type", skip_serializing_if = "str::is_empty")]
    pub facade: &'a str,
    #[serde(rename = "Id", skip_serializing_if = "str::is_empty")]
    pub id: &'a str,
    #[serde(rename = "Request", skip_serializing_if = "str::is_empty")]
    pub request: &'a str,
    #[serde(rename = "Params", skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a B>,
    #[serde(rename = "Error", skip_serializing_if = "str::is_empty")]
    pub error: &'a str,
    #[serde(rename = "ErrorCode", skip_serializing_if = "str::is_empty")]
    pub error_code: &'a str,
    #[serde(rename = "Response", skip_serializing_if = "Option::is_none")]
    pub response: Option<&'a B>,
}

impl<'a, B: ?Sized> OutMsg<'a, B> {
    pub fn new(header: &'a Header, body: Option<&'a B>) -> OutMsg<'a, B> {
        let (params, response) = if header.is_request() {
            (body, None)
        } else {
            (None, body)
        };
        OutMsg {
            request_id: header.request_id,
            facade: &header.facade,
            id: &header.id,
            request: &header.request,
            params,
            error: &header.error,
            error_code: &header.error_code,
            response,
        }
    }
}

/// Frames a byte stream as a sequence of JSON values. Each decoded item is
/// the exact bytes of one value; encoded items are written followed by a
/// newline.
///
/// The decoder tracks nesting across calls, so bytes already buffered are
/// examined once however many reads a value spans. A complete value is then
/// validated as JSON before it is handed on.
#[derive(Debug, Clone)]
pub struct JsonStreamCodec {
    max_frame_len: usize,
    scan: Scan,
}

/// Progress through the value at the front of the read buffer.
#[derive(Debug, Clone, Default)]
struct Scan {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Scan {
    /// Examine `buf` from where the previous call stopped and return the
    /// length of the first value if it is complete. `buf` starts with the
    /// first byte of the value.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        // Numbers and literals have no closing delimiter.
        let scalar = !matches!(buf[0], b'{' | b'[' | b'"');
        for (i, &b) in buf.iter().enumerate().skip(self.pos) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                continue;
            }
            if scalar {
                if i > 0 && (b.is_ascii_whitespace() || b"{}[],:\"".contains(&b)) {
                    return Some(i);
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        self.pos = buf.len();
        None
    }
}

impl Default for JsonStreamCodec {
    fn default() -> Self {
        JsonStreamCodec::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl JsonStreamCodec {
    pub fn new(max_frame_len: usize) -> JsonStreamCodec {
        JsonStreamCodec {
            max_frame_len,
            scan: Scan::default(),
        }
    }
}

impl Decoder for JsonStreamCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if self.scan.pos == 0 {
            let leading = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            buf.advance(leading);
            if buf.is_empty() {
                return Ok(None);
            }
        }

        let end = match self.scan.advance(&buf[..]) {
            Some(end) => end,
            None if buf.len() > self.max_frame_len => {
                return Err(frame_too_large(buf.len(), self.max_frame_len));
            }
            None => return Ok(None),
        };
        self.scan = Scan::default();
        if end > self.max_frame_len {
            return Err(frame_too_large(end, self.max_frame_len));
        }

        let frame = buf.split_to(end).freeze();
        if let Err(e) = serde_json::from_slice::<IgnoredAny>(&frame) {
            let msg = format!("failed to parse JSON message: {}", e);
            return Err(Error::new(ErrorKind::InvalidData, msg));
        }
        Ok(Some(frame))
    }
}

impl Encoder<Bytes> for JsonStreamCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, buf: &mut BytesMut) -> Result<(), io::Error> {
        if item.len() > self.max_frame_len {
            return Err(frame_too_large(item.len(), self.max_frame_len));
        }
        buf.reserve(item.len() + 1);
        buf.put(item);
        buf.put_u8(b'\n');
        Ok(())
    }
}

fn frame_too_large(len: usize, max: usize) -> io::Error {
    let msg = format!("message of {} bytes exceeds limit of {} bytes", len, max);
    Error::new(ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn out_msg_suppresses_empty_fields() {
        let hdr = Header::reply(12);
        let body = json!({"Life": "alive"});
        let data = serde_json::to_string(&OutMsg::new(&hdr, Some(&body))).unwrap();
        assert_eq!(data, r#"{"RequestId":12,"Response":{"Life":"alive"}}"#);
    }

    #[test]
    fn out_msg_puts_request_body_in_params() {
        let hdr = Header::request(1, "Pinger", "", "Ping");
        let body = vec![1, 2, 3];
        let data = serde_json::to_string(&OutMsg::new(&hdr, Some(&body))).unwrap();
        assert_eq!(
            data,
            r#"{"RequestId":1,"Type":"Pinger","Request":"Ping","Params":[1,2,3]}"#
        );
    }

    #[test]
    fn out_msg_without_body() {
        let hdr = Header {
            request_id: 4,
            error: "boom".to_string(),
            error_code: "explosive".to_string(),
            ..Header::default()
        };
        let data = serde_json::to_string(&OutMsg::<Value>::new(&hdr, None)).unwrap();
        assert_eq!(data, r#"{"RequestId":4,"Error":"boom","ErrorCode":"explosive"}"#);
    }

    #[test]
    fn in_msg_captures_raw_body() {
        let raw = br#"{"RequestId":3,"Type":"Machiner","Id":"0","Request":"Life","Params":{"a": [1, 2]}}"#;
        let msg: InMsg = serde_json::from_slice(raw).unwrap();
        let hdr = msg.header();
        assert_eq!(hdr.request_id, 3);
        assert_eq!(hdr.facade, "Machiner");
        assert_eq!(hdr.id, "0");
        assert!(hdr.is_request());
        assert_eq!(msg.params.unwrap().get(), r#"{"a": [1, 2]}"#);
        assert!(msg.response.is_none());
    }

    #[test]
    fn decoder_splits_concatenated_values() {
        let mut codec = JsonStreamCodec::default();
        let mut buf = BytesMut::from(&b"{\"RequestId\":1}\n  {\"RequestId\":2,\"Params\":\"}{\"}{\"Req"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first[..], b"{\"RequestId\":1}");
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&second[..], b"{\"RequestId\":2,\"Params\":\"}{\"}");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"uest\":\"X\"}\n");
        let third = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&third[..], b"{\"Request\":\"X\"}");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_rejects_garbage() {
        let mut codec = JsonStreamCodec::default();
        let mut buf = BytesMut::from(&b"{\"RequestId\":]"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decoder_enforces_frame_limit() {
        let mut codec = JsonStreamCodec::new(8);
        let mut buf = BytesMut::from(&b"{\"RequestId\":"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decoder_handles_scalars_and_escapes() {
        let mut codec = JsonStreamCodec::default();
        let mut buf = BytesMut::from(&b"42 \"a\\\"}\" [\"\\\\\"] true\n"[..]);

        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 4);
        assert_eq!(&frames[0][..], b"42");
        assert_eq!(&frames[1][..], b"\"a\\\"}\"");
        assert_eq!(&frames[2][..], b"[\"\\\\\"]");
        assert_eq!(&frames[3][..], b"true");
    }

    #[test]
    fn decoder_resumes_a_large_frame_across_reads() {
        let mut codec = JsonStreamCodec::default();
        let body = "{\"k\":[1,2]}".repeat(4 * 1024 * 1024 / 11);
        let frame = format!("{{\"RequestId\":1,\"Params\":[{}]}}", body.replace("}{", "},{"));
        let wire = format!("{}\n", frame);

        let mut buf = BytesMut::new();
        let mut decoded = None;
        for chunk in wire.as_bytes().chunks(8 * 1024) {
            buf.extend_from_slice(chunk);
            if let Some(item) = codec.decode(&mut buf).unwrap() {
                decoded = Some(item);
                break;
            }
            // Nothing already seen is examined again.
            assert_eq!(codec.scan.pos, buf.len());
        }
        let decoded = decoded.expect("frame never completed");
        assert_eq!(decoded.len(), frame.len());
        assert_eq!(&decoded[..], frame.as_bytes());
        assert_eq!(&buf[..], b"\n");
    }

    #[test]
    fn decoder_rejects_mismatched_brackets() {
        let mut codec = JsonStreamCodec::default();
        let mut buf = BytesMut::from(&b"{\"a\":[1}]"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encoder_appends_newline() {
        let mut codec = JsonStreamCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"{}"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"[]"), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{}\n[]\n");
    }
}
