use bytes::Bytes;

mod executor;
mod parser;

pub use executor::{increment_digits, CommandExecutor, NotADigit};
pub use parser::{parse_command, parse_request, ParseResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(Vec<u8>),
    Set { key: Vec<u8>, value: Bytes },
    Incr(Vec<u8>),
    /// Any other name, or a known name with the wrong number of arguments
    Unknown,
}

impl Command {
    /// Parse command from the elements of a request frame
    #[inline(always)]
    pub fn from_args(args: Vec<Bytes>) -> Self {
        parser::parse_command(args)
    }

    /// Command name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get(_) => "get",
            Command::Set { .. } => "set",
            Command::Incr(_) => "incr",
            Command::Unknown => "unknown",
        }
    }
}
