use bytes::Bytes;
use memchr::memchr;

/// Upper bound on elements pre-allocated for a frame; the declared count is
/// untrusted until the elements actually arrive.
const MAX_PREALLOC_ARGS: usize = 16;

/// Reply values produced by command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `$<len>\r\n<bytes>\r\n`, or `$-1\r\n` when absent
    Bulk(Option<Bytes>),
    /// `:<digits>\r\n`; the digits are kept as text so they never overflow
    Integer(Bytes),
    /// `+<text>\r\n`
    Status(Bytes),
    /// `-<text>\r\n`
    Error(Bytes),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status(Bytes::from_static(b"OK"))
    }

    pub fn error(msg: impl Into<Bytes>) -> Self {
        Reply::Error(msg.into())
    }
}

/// Parse one request frame (`*<count>\r\n` followed by `count` bulk strings)
/// from the start of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, `Err` when a grammar token
/// does not match, and otherwise the elements with the number of bytes the
/// frame occupies.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Vec<Bytes>, usize)>, String> {
    let (count, mut pos) = match parse_header(buf, 0, b'*')? {
        Some(header) => header,
        None => return Ok(None),
    };

    let mut args = Vec::with_capacity(count.min(MAX_PREALLOC_ARGS));

    for _ in 0..count {
        match parse_bulk_string(buf, pos)? {
            Some((arg, next)) => {
                args.push(arg);
                pos = next;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((args, pos)))
}

/// Parse bulk string at `pos`: $6\r\nfoobar\r\n
fn parse_bulk_string(buf: &[u8], pos: usize) -> Result<Option<(Bytes, usize)>, String> {
    let (len, data_start) = match parse_header(buf, pos, b'$')? {
        Some(header) => header,
        None => return Ok(None),
    };

    let data_end = data_start
        .checked_add(len)
        .filter(|end| end.checked_add(2).is_some())
        .ok_or_else(|| "bulk length out of range".to_string())?;

    // Payload plus trailing CRLF must be present
    if buf.len() < data_end + 2 {
        return Ok(None);
    }

    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return Err("missing CRLF after bulk string".to_string());
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((data, data_end + 2)))
}

/// Parse `<marker><digits>\r\n` at `pos`, returning the decimal value and the
/// offset just past the CRLF.
fn parse_header(buf: &[u8], pos: usize, marker: u8) -> Result<Option<(usize, usize)>, String> {
    let Some(&first) = buf.get(pos) else {
        return Ok(None);
    };

    if first != marker {
        return Err(format!(
            "expected '{}', got byte 0x{:02x}",
            marker as char, first
        ));
    }

    let digits_start = pos + 1;
    let rest = &buf[digits_start..];
    let cr = memchr(b'\r', rest);
    let digits = match cr {
        Some(end) => &rest[..end],
        None => rest,
    };

    // Reject bad digits even before the line terminator shows up
    let mut value: usize = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(format!("invalid byte 0x{:02x} in length", b));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as usize))
            .ok_or_else(|| "length out of range".to_string())?;
    }

    let Some(cr) = cr else {
        return Ok(None);
    };

    if digits.is_empty() {
        return Err("missing length digits".to_string());
    }

    let lf = digits_start + cr + 1;
    match buf.get(lf) {
        None => Ok(None),
        Some(&b'\n') => Ok(Some((value, lf + 1))),
        Some(_) => Err("missing LF after length".to_string()),
    }
}

/// Append the wire form of `reply` to `buf`
pub fn write_reply(buf: &mut Vec<u8>, reply: &Reply) {
    match reply {
        Reply::Bulk(Some(s)) => {
            buf.push(b'$');
            let mut num_buf = itoa::Buffer::new();
            buf.extend_from_slice(num_buf.format(s.len()).as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(None) => {
            buf.extend_from_slice(b"$-1\r\n");
        }
        Reply::Integer(digits) => {
            buf.push(b':');
            buf.extend_from_slice(digits);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Status(s) => {
            buf.push(b'+');
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Error(e) => {
            buf.push(b'-');
            buf.extend_from_slice(e);
            buf.extend_from_slice(b"\r\n");
        }
    }
}
