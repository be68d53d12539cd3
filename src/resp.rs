//! RESP framing.
//!
//! Encoders are pure functions returning the canonical wire bytes. Decoding is
//! incremental: [`Frame::parse`] looks at the front of a buffer and either
//! returns one complete frame together with the exact number of bytes it
//! spans, or `Ok(None)` when more bytes are needed.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Parses a single top-level frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied, CRLFs included.
    pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
        parse_at(buf, 0)
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.write_to(&mut out);
        out.freeze()
    }

    fn write_to(&self, out: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                out.put_u8(b'+');
                out.put_slice(s.as_bytes());
                out.put_slice(CRLF);
            }
            Frame::Error(s) => {
                out.put_u8(b'-');
                out.put_slice(s.as_bytes());
                out.put_slice(CRLF);
            }
            Frame::Integer(n) => {
                out.put_slice(format!(":{}\r\n", n).as_bytes());
            }
            Frame::Bulk(data) => {
                out.put_slice(format!("${}\r\n", data.len()).as_bytes());
                out.put_slice(data);
                out.put_slice(CRLF);
            }
            Frame::Null => out.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                out.put_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.write_to(out);
                }
            }
        }
    }

    /// Flattens the frame into a command: verb followed by arguments.
    ///
    /// Integers, errors and nulls at the top level carry no command and
    /// produce an empty vector.
    pub fn into_command(self) -> Vec<String> {
        match self {
            Frame::Array(items) => items.into_iter().map(element_text).collect(),
            Frame::Simple(line) => words(&line).map(str::to_string).collect(),
            Frame::Bulk(data) => vec![String::from_utf8_lossy(&data).into_owned()],
            Frame::Integer(_) | Frame::Error(_) | Frame::Null => Vec::new(),
        }
    }
}

fn element_text(frame: Frame) -> String {
    match frame {
        Frame::Simple(s) | Frame::Error(s) => s,
        Frame::Bulk(data) => String::from_utf8_lossy(&data).into_owned(),
        Frame::Integer(n) => n.to_string(),
        Frame::Null | Frame::Array(_) => String::new(),
    }
}

fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let Some(&kind) = buf.get(pos) else {
        return Ok(None);
    };

    match kind {
        b'+' => Ok(line(buf, pos + 1).map(|(text, next)| (Frame::Simple(lossy(text)), next - pos))),
        b'-' => Ok(line(buf, pos + 1).map(|(text, next)| (Frame::Error(lossy(text)), next - pos))),
        b':' => {
            let Some((text, next)) = line(buf, pos + 1) else {
                return Ok(None);
            };
            let text = lossy(text);
            let n = text
                .parse::<i64>()
                .map_err(|_| ProtocolError::InvalidInteger(text))?;
            Ok(Some((Frame::Integer(n), next - pos)))
        }
        b'$' => parse_bulk(buf, pos),
        b'*' => parse_array(buf, pos),
        b'/' => {
            // Plain-text convenience form for poking the server with netcat.
            let start = pos + 1;
            let Some(nl) = buf[start..].iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let text = lossy(&buf[start..start + nl]);
            let items = words(text.trim_end_matches('\r'))
                .map(|word| Frame::Bulk(Bytes::copy_from_slice(word.as_bytes())))
                .collect();
            Ok(Some((Frame::Array(items), nl + 2)))
        }
        other => Err(ProtocolError::UnsupportedType(other)),
    }
}

fn parse_bulk(buf: &[u8], pos: usize) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let Some((header, start)) = line(buf, pos + 1) else {
        return Ok(None);
    };
    let declared = parse_length(header)?;
    let Ok(declared) = usize::try_from(declared) else {
        return Ok(Some((Frame::Null, start - pos)));
    };

    match find_crlf(&buf[start..]) {
        Some(actual) if actual == declared => {
            let data = Bytes::copy_from_slice(&buf[start..start + actual]);
            Ok(Some((Frame::Bulk(data), start + actual + 2 - pos)))
        }
        Some(actual) => Err(ProtocolError::LengthMismatch { declared, actual }),
        None => {
            let available = buf.len() - start;
            if available >= declared + 2 {
                Err(ProtocolError::LengthMismatch {
                    declared,
                    actual: available,
                })
            } else {
                Ok(None)
            }
        }
    }
}

fn parse_array(buf: &[u8], pos: usize) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let Some((header, mut next)) = line(buf, pos + 1) else {
        return Ok(None);
    };
    let count = parse_length(header)?;
    if count < 0 {
        return Ok(Some((Frame::Null, next - pos)));
    }

    let mut items = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        match buf.get(next) {
            None => return Ok(None),
            Some(b'+' | b'$' | b':') => {}
            Some(&other) => return Err(ProtocolError::UnsupportedType(other)),
        }
        let Some((item, used)) = parse_at(buf, next)? else {
            return Ok(None);
        };
        items.push(item);
        next += used;
    }

    Ok(Some((Frame::Array(items), next - pos)))
}

/// Parses the `$<len>\r\n<bytes>` snapshot transfer, which has no trailing CRLF.
///
/// Returns the payload length and the total bytes consumed once the whole
/// payload is buffered.
pub fn parse_snapshot(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let Some(&kind) = buf.first() else {
        return Ok(None);
    };
    if kind != b'$' {
        return Err(ProtocolError::NotASnapshot(kind));
    }
    let Some((header, start)) = line(buf, 1) else {
        return Ok(None);
    };
    let declared = parse_length(header)?;
    let len = usize::try_from(declared).map_err(|_| ProtocolError::InvalidLength(declared.to_string()))?;

    if buf.len() - start < len {
        return Ok(None);
    }
    Ok(Some((len, start + len)))
}

fn parse_length(text: &[u8]) -> Result<i64, ProtocolError> {
    let text = lossy(text);
    text.parse::<i64>()
        .map_err(|_| ProtocolError::InvalidLength(text))
}

/// Returns the line starting at `from` (without its CRLF) and the index just past the CRLF.
fn line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(from..)?;
    find_crlf(rest).map(|end| (&rest[..end], from + end + 2))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Space-separated words. Only a single space separates; tabs stay inside a word.
fn words(line: &str) -> impl Iterator<Item = &str> {
    line.split(' ').filter(|word| !word.is_empty())
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn encode_simple_string(s: &str) -> Bytes {
    Frame::Simple(s.to_string()).encode()
}

/// Bulk-encodes `s`. An empty string is sent as the null bulk string.
pub fn encode_bulk_string(s: &str) -> Bytes {
    if s.is_empty() {
        return encode_null_bulk_string();
    }
    Frame::Bulk(Bytes::copy_from_slice(s.as_bytes())).encode()
}

pub fn encode_null_bulk_string() -> Bytes {
    Bytes::from_static(b"$-1\r\n")
}

pub fn encode_integer(n: i64) -> Bytes {
    Frame::Integer(n).encode()
}

pub fn encode_error(msg: &str) -> Bytes {
    Frame::Error(msg.to_string()).encode()
}

pub fn encode_array<S: AsRef<str>>(items: &[S]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_slice(format!("*{}\r\n", items.len()).as_bytes());
    for item in items {
        out.put_slice(&encode_bulk_string(item.as_ref()));
    }
    out.freeze()
}

/// Length-prefixed opaque payload. Deliberately omits the trailing CRLF.
pub fn encode_snapshot(blob: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(blob.len() + 16);
    out.put_slice(format!("${}\r\n", blob.len()).as_bytes());
    out.put_slice(blob);
    out.freeze()
}
