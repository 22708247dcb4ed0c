use super::Command;
use crate::config::Config;
use crate::protocol::resp::Reply;
use crate::storage::Storage;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error};

/// The stored value contains a byte outside `'0'..='9'`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotADigit {
    pub position: usize,
    pub byte: u8,
}

/// Add one to an unsigned decimal string held as ASCII digits.
///
/// Works on the digits directly with carry propagation, so there is no
/// fixed-width overflow: `"999"` becomes `"1000"`. Leading zeros are kept
/// (`"099"` becomes `"100"`, `"0099"` becomes `"0100"`). An empty input is
/// treated like an all-nines value and becomes `"1"`.
pub fn increment_digits(current: &[u8]) -> Result<Vec<u8>, NotADigit> {
    if let Some(position) = current.iter().position(|b| !b.is_ascii_digit()) {
        return Err(NotADigit {
            position,
            byte: current[position],
        });
    }

    let mut digits = current.to_vec();
    for digit in digits.iter_mut().rev() {
        if *digit == b'9' {
            *digit = b'0';
        } else {
            *digit += 1;
            return Ok(digits);
        }
    }

    // Carry ran off the most significant digit
    digits.insert(0, b'1');
    Ok(digits)
}

/// Executes parsed commands against the storage adapter
#[derive(Clone)]
pub struct CommandExecutor {
    storage: Arc<dyn Storage>,
    strict_set_ack: bool,
}

impl CommandExecutor {
    /// Create a new command executor with the given storage and config
    pub fn new(storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self {
            storage,
            strict_set_ack: config.strict_set_ack,
        }
    }

    /// Execute a command and return the reply to send
    #[inline]
    pub fn execute(&self, cmd: Command) -> Reply {
        match cmd {
            Command::Get(key) => Reply::Bulk(self.read(&key)),
            Command::Set { key, value } => self.set(&key, value),
            Command::Incr(key) => self.incr(&key),
            Command::Unknown => Reply::error("unknown command"),
        }
    }

    /// Storage read where an engine failure counts as an absent value
    fn read(&self, key: &[u8]) -> Option<Bytes> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                error!("Storage read failed for key of {} bytes: {}", key.len(), e);
                None
            }
        }
    }

    fn set(&self, key: &[u8], value: Bytes) -> Reply {
        match self.storage.put(key, value) {
            Ok(()) => Reply::ok(),
            Err(e) => {
                error!("SET failed for key of {} bytes: {}", key.len(), e);
                if self.strict_set_ack {
                    Reply::ok()
                } else {
                    Reply::error(e.reply_text())
                }
            }
        }
    }

    fn incr(&self, key: &[u8]) -> Reply {
        let current = self
            .read(key)
            .unwrap_or_else(|| Bytes::from_static(b"0"));

        let next = match increment_digits(&current) {
            Ok(next) => Bytes::from(next),
            Err(NotADigit { position, byte }) => {
                debug!(
                    "INCR rejected value of {} bytes: byte 0x{:02x} at offset {}",
                    current.len(),
                    byte,
                    position
                );
                return Reply::error("bad key type");
            }
        };

        match self.storage.put(key, next.clone()) {
            Ok(()) => Reply::Integer(next),
            Err(e) => {
                error!("INCR write failed for key of {} bytes: {}", key.len(), e);
                Reply::error(e.reply_text())
            }
        }
    }
}
