mod buffer;

pub use buffer::ReadBuffer;
