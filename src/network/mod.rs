mod connection;

pub use connection::{Connection, ReadOutcome};
