pub mod command;
pub mod resp;

pub use command::{parse_request, Command, CommandExecutor, ParseResult};
pub use resp::{parse_frame, write_reply, Reply};
