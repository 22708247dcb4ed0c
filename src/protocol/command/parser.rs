use super::Command;
use crate::protocol::resp::parse_frame;
use bytes::Bytes;

/// Outcome of scanning a receive buffer for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A full frame was found; `usize` is the number of bytes it occupies
    Complete(Command, usize),
    /// A length field or payload runs past the valid bytes
    Incomplete,
    /// A grammar token did not match; the frame cannot be resynchronized
    Malformed(String),
}

/// Parse exactly one request starting at offset 0 of `buf`.
pub fn parse_request(buf: &[u8]) -> ParseResult {
    match parse_frame(buf) {
        Ok(Some((args, consumed))) => ParseResult::Complete(Command::from_args(args), consumed),
        Ok(None) => ParseResult::Incomplete,
        Err(reason) => ParseResult::Malformed(reason),
    }
}

/// Map frame elements to a command.
///
/// Only `get key`, `incr key` and `set key value` are recognized. Names are
/// matched case-sensitively.
#[inline(always)]
pub fn parse_command(args: Vec<Bytes>) -> Command {
    let mut args = args.into_iter();

    let Some(name) = args.next() else {
        return Command::Unknown;
    };

    match (&name[..], args.len()) {
        (b"get", 1) => match args.next() {
            Some(key) => Command::Get(key.to_vec()),
            None => Command::Unknown,
        },

        (b"incr", 1) => match args.next() {
            Some(key) => Command::Incr(key.to_vec()),
            None => Command::Unknown,
        },

        (b"set", 2) => match (args.next(), args.next()) {
            (Some(key), Some(value)) => Command::Set {
                key: key.to_vec(),
                value,
            },
            _ => Command::Unknown,
        },

        _ => Command::Unknown,
    }
}
