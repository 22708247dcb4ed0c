use crate::error::Error;
use crate::io::ReadBuffer;
use crate::protocol::resp::{write_reply, Reply};
use crate::protocol::{parse_request, CommandExecutor, ParseResult};
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for request bytes
    Reading,
    /// A final error reply is queued; close once it has been written
    Closing,
    /// Peer went away or the socket failed
    Closed,
}

/// Result of a single read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were received and processed; the socket may hold more
    Progress,
    /// The socket has nothing more to give right now
    WouldBlock,
    /// The connection stopped reading (peer closed, error, or closing)
    Stopped,
}

/// Manages a client connection
///
/// Owns the receive buffer and the queue of encoded replies. Each read cycle
/// receives once, then parses and dispatches at most one request.
pub struct Connection {
    id: usize,
    addr: Option<SocketAddr>,

    executor: CommandExecutor,

    buffer: ReadBuffer,

    // Encoded replies not yet accepted by the socket
    write_buffer: Vec<u8>,
    write_position: usize,
    // Reading pauses once this many reply bytes are queued
    max_pending_writes: usize,
    read_paused: bool,

    state: State,

    pub commands_processed: u64,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(
        id: usize,
        buffer_size: usize,
        executor: CommandExecutor,
        addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id,
            addr,
            executor,
            buffer: ReadBuffer::with_capacity(buffer_size),
            write_buffer: Vec::with_capacity(256),
            write_position: 0,
            max_pending_writes: buffer_size,
            read_paused: false,
            state: State::Reading,
            commands_processed: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Number of request bytes currently held
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The connection has finished and can be released
    pub fn is_closed(&self) -> bool {
        match self.state {
            State::Reading => false,
            State::Closing => !self.has_pending_writes(),
            State::Closed => true,
        }
    }

    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    /// Handle a readability notification.
    ///
    /// The reactor reports edges, so read cycles run until the socket would
    /// block or the connection stops reading. Reading also pauses while the
    /// reply queue holds at least a receive buffer's worth of bytes; see
    /// [`Connection::read_paused`].
    pub fn on_readable<R: Read>(&mut self, stream: &mut R) {
        self.read_paused = false;
        loop {
            if self.is_write_backlogged() {
                debug!(
                    "Connection {} paused reading with {} reply bytes queued",
                    self.id,
                    self.write_buffer.len() - self.write_position
                );
                self.read_paused = true;
                return;
            }
            if self.read_cycle(stream) != ReadOutcome::Progress {
                return;
            }
        }
    }

    /// Reading stopped on a full reply queue rather than an empty socket.
    ///
    /// No new readiness edge arrives for bytes already waiting in the
    /// socket, so the caller must call [`Connection::on_readable`] again once
    /// the queue has drained.
    pub fn read_paused(&self) -> bool {
        self.read_paused
    }

    fn is_write_backlogged(&self) -> bool {
        self.write_buffer.len() - self.write_position >= self.max_pending_writes
    }

    /// Receive once into the buffer tail and process what is there.
    pub fn read_cycle<R: Read>(&mut self, stream: &mut R) -> ReadOutcome {
        if self.state != State::Reading {
            return ReadOutcome::Stopped;
        }

        match self.buffer.read_from(stream) {
            Ok(0) => {
                debug!("Connection {} closed by peer", self.id);
                self.state = State::Closed;
                ReadOutcome::Stopped
            }
            Ok(_) => {
                self.process_buffer();
                if self.state == State::Reading {
                    ReadOutcome::Progress
                } else {
                    ReadOutcome::Stopped
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) if e.kind() == ErrorKind::Interrupted => ReadOutcome::Progress,
            Err(e) => {
                if e.kind() != ErrorKind::ConnectionReset {
                    error!("Error reading from connection {}: {}", self.id, e);
                }
                self.state = State::Closed;
                ReadOutcome::Stopped
            }
        }
    }

    /// Try to parse one request from the buffered bytes and execute it.
    fn process_buffer(&mut self) {
        match parse_request(self.buffer.filled()) {
            ParseResult::Complete(command, consumed) => {
                self.commands_processed += 1;
                debug!("Connection {} executing {}", self.id, command.name());

                let reply = self.executor.execute(command);
                write_reply(&mut self.write_buffer, &reply);

                let trailing = self.buffer.len() - consumed;
                if trailing > 0 {
                    debug!(
                        "Connection {} discarding {} bytes after request",
                        self.id, trailing
                    );
                }
                self.buffer.reset();
            }
            ParseResult::Incomplete => {
                if self.buffer.is_full() {
                    warn!(
                        "Connection {} exceeded {} byte request limit",
                        self.id,
                        self.buffer.capacity()
                    );
                    self.fail(Error::BufferOverflow);
                }
            }
            ParseResult::Malformed(reason) => {
                warn!("Connection {} sent a malformed request: {}", self.id, reason);
                self.fail(Error::Protocol(reason));
            }
        }
    }

    /// Queue a final error reply and stop reading
    fn fail(&mut self, err: Error) {
        write_reply(&mut self.write_buffer, &Reply::error(err.reply_text()));
        self.buffer.reset();
        self.state = State::Closing;
    }

    pub fn has_pending_writes(&self) -> bool {
        self.write_position < self.write_buffer.len()
    }

    /// Get pending write data as a single buffer slice
    pub fn pending_writes(&self) -> Option<&[u8]> {
        if self.has_pending_writes() {
            Some(&self.write_buffer[self.write_position..])
        } else {
            None
        }
    }

    /// Mark bytes as written
    pub fn consume_writes(&mut self, n: usize) {
        self.write_position = (self.write_position + n).min(self.write_buffer.len());
        if self.write_position == self.write_buffer.len() {
            self.write_buffer.clear();
            self.write_position = 0;
        }
    }

    /// Write queued replies until the queue is empty or the socket would
    /// block. Returns `true` when everything has been written.
    pub fn flush<W: Write>(&mut self, stream: &mut W) -> bool {
        while let Some(data) = self.pending_writes() {
            match stream.write(data) {
                Ok(0) => {
                    debug!("Connection {} stopped accepting writes", self.id);
                    self.state = State::Closed;
                    return false;
                }
                Ok(n) => self.consume_writes(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() != ErrorKind::BrokenPipe && e.kind() != ErrorKind::ConnectionReset
                    {
                        error!("Error writing to connection {}: {}", self.id, e);
                    }
                    self.state = State::Closed;
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::{MemoryStorage, Storage};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;

    /// Scripted socket: each read returns the next chunk, then would-block
    /// (or end of stream once `eof` is set).
    #[derive(Default)]
    struct MockStream {
        chunks: VecDeque<Vec<u8>>,
        eof: bool,
        written: Vec<u8>,
        write_limit: Option<usize>,
    }

    impl MockStream {
        fn push(&mut self, chunk: &[u8]) {
            self.chunks.push_back(chunk.to_vec());
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk.split_off(n));
                    }
                    Ok(n)
                }
                None if self.eof => Ok(0),
                None => Err(io::Error::new(ErrorKind::WouldBlock, "would block")),
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.write_limit {
                Some(0) => return Err(io::Error::new(ErrorKind::WouldBlock, "would block")),
                Some(limit) => limit.min(buf.len()),
                None => buf.len(),
            };
            if let Some(limit) = self.write_limit.as_mut() {
                *limit -= n;
            }
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn connection(buffer_size: usize) -> (Arc<MemoryStorage>, Connection) {
        let storage = Arc::new(MemoryStorage::new());
        let executor = CommandExecutor::new(storage.clone(), &Config::default());
        (storage, Connection::new(1, buffer_size, executor, None))
    }

    fn exchange(conn: &mut Connection, stream: &mut MockStream, request: &[u8]) -> Vec<u8> {
        stream.push(request);
        conn.on_readable(stream);
        assert!(conn.flush(stream));
        std::mem::take(&mut stream.written)
    }

    #[test]
    fn set_get_incr_cycle() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream::default();

        assert_eq!(
            exchange(
                &mut conn,
                &mut stream,
                b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$2\r\n41\r\n"
            ),
            b"+OK\r\n"
        );
        assert_eq!(
            exchange(&mut conn, &mut stream, b"*2\r\n$4\r\nincr\r\n$1\r\nk\r\n"),
            b":42\r\n"
        );
        assert_eq!(
            exchange(&mut conn, &mut stream, b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n"),
            b"$2\r\n42\r\n"
        );
        assert_eq!(
            exchange(&mut conn, &mut stream, b"*2\r\n$3\r\nget\r\n$1\r\nx\r\n"),
            b"$-1\r\n"
        );
        assert_eq!(conn.commands_processed, 4);
        assert!(!conn.is_closed());
    }

    #[test]
    fn split_frame_parses_like_whole_frame() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream::default();

        stream.push(b"*2\r\n$3\r\nget\r\n");
        assert_eq!(conn.read_cycle(&mut stream), ReadOutcome::Progress);
        assert_eq!(conn.buffered(), 13);
        assert!(conn.pending_writes().is_none());

        assert_eq!(
            exchange(&mut conn, &mut stream, b"$3\r\nfoo\r\n"),
            b"$-1\r\n"
        );
        assert_eq!(conn.buffered(), 0);
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let (storage, mut conn) = connection(1024);
        let mut stream = MockStream::default();
        let request = b"*3\r\n$3\r\nset\r\n$3\r\nkey\r\n$4\r\na\r\nb\r\n";

        for byte in request.iter() {
            stream.push(&[*byte]);
        }
        conn.on_readable(&mut stream);
        assert!(conn.flush(&mut stream));

        assert_eq!(stream.written, b"+OK\r\n");
        assert_eq!(
            storage.get(b"key").unwrap(),
            Some(Bytes::from_static(b"a\r\nb"))
        );
    }

    #[test]
    fn declared_length_beyond_buffered_bytes_waits() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream::default();

        stream.push(b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$10\r\nabc");
        conn.on_readable(&mut stream);
        assert!(!conn.is_closed());
        assert!(conn.pending_writes().is_none());
        assert!(conn.buffered() > 0);

        assert_eq!(
            exchange(&mut conn, &mut stream, b"defghij\r\n"),
            b"+OK\r\n"
        );
    }

    #[test]
    fn second_frame_in_same_read_is_discarded() {
        let (storage, mut conn) = connection(1024);
        let mut stream = MockStream::default();

        let reply = exchange(
            &mut conn,
            &mut stream,
            b"*3\r\n$3\r\nset\r\n$1\r\na\r\n$1\r\n1\r\n*3\r\n$3\r\nset\r\n$1\r\nb\r\n$1\r\n2\r\n",
        );

        assert_eq!(reply, b"+OK\r\n");
        assert_eq!(storage.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));
        assert_eq!(storage.get(b"b").unwrap(), None);
        assert_eq!(conn.buffered(), 0);
    }

    #[test]
    fn unknown_command_reply() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream::default();

        assert_eq!(
            exchange(&mut conn, &mut stream, b"*1\r\n$4\r\nnope\r\n"),
            b"-unknown command\r\n"
        );
        assert!(!conn.is_closed());
    }

    #[test]
    fn malformed_request_closes_after_error() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream::default();

        stream.push(b"GET foo\r\n*1\r\n$4\r\nnope\r\n");
        conn.on_readable(&mut stream);

        assert!(!conn.is_closed(), "error reply must be written first");
        assert!(conn.flush(&mut stream));
        assert_eq!(stream.written, b"-protocol error\r\n");
        assert!(conn.is_closed());
        assert_eq!(conn.buffered(), 0);

        // Nothing else is read once closing
        stream.push(b"*1\r\n$4\r\nnope\r\n");
        assert_eq!(conn.read_cycle(&mut stream), ReadOutcome::Stopped);
    }

    #[test]
    fn full_buffer_without_frame_is_rejected() {
        let (_, mut conn) = connection(64);
        let mut stream = MockStream::default();

        let mut request = b"*3\r\n$3\r\nset\r\n$1\r\nk\r\n$100\r\n".to_vec();
        request.extend_from_slice(&[b'x'; 100]);
        request.extend_from_slice(b"\r\n");
        stream.push(&request);

        conn.on_readable(&mut stream);
        assert!(conn.flush(&mut stream));
        assert_eq!(stream.written, b"-request too large\r\n");
        assert!(conn.is_closed());
    }

    #[test]
    fn frame_exactly_filling_buffer_succeeds() {
        let request = b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n";
        let (_, mut conn) = connection(request.len());
        let mut stream = MockStream::default();

        assert_eq!(exchange(&mut conn, &mut stream, request), b"$-1\r\n");
        assert!(!conn.is_closed());
    }

    #[test]
    fn peer_close() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream {
            eof: true,
            ..Default::default()
        };

        assert_eq!(conn.read_cycle(&mut stream), ReadOutcome::Stopped);
        assert!(conn.is_closed());
    }

    #[test]
    fn would_block_keeps_state() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream::default();

        assert_eq!(conn.read_cycle(&mut stream), ReadOutcome::WouldBlock);
        assert!(!conn.is_closed());
    }

    #[test]
    fn unread_replies_pause_reading() {
        let (storage, mut conn) = connection(1024);
        let mut stream = MockStream {
            write_limit: Some(0),
            ..Default::default()
        };
        storage.put(b"big", Bytes::from(vec![b'v'; 900])).unwrap();

        for _ in 0..10_000 {
            stream.push(b"*2\r\n$3\r\nget\r\n$3\r\nbig\r\n");
        }
        conn.on_readable(&mut stream);

        // One reply may land past the limit before reading stops
        let queued = conn.pending_writes().map_or(0, |w| w.len());
        assert!(queued < 1024 + 1024, "{} reply bytes queued", queued);
        assert!(conn.read_paused());
        assert_eq!(conn.commands_processed, 2);
        assert!(!conn.flush(&mut stream));

        // Draining the queue lets reading continue where it stopped
        stream.write_limit = None;
        assert!(conn.flush(&mut stream));
        conn.on_readable(&mut stream);
        assert_eq!(conn.commands_processed, 4);
        assert!(conn.read_paused());
        assert!(!conn.is_closed());
    }

    #[test]
    fn would_block_clears_pause() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream::default();

        stream.push(b"*1\r\n$4\r\nnope\r\n");
        conn.on_readable(&mut stream);
        assert!(!conn.read_paused());
        assert!(conn.flush(&mut stream));
    }

    #[test]
    fn partial_writes_are_resumed() {
        let (_, mut conn) = connection(1024);
        let mut stream = MockStream {
            write_limit: Some(3),
            ..Default::default()
        };

        stream.push(b"*1\r\n$4\r\nnope\r\n");
        conn.on_readable(&mut stream);

        assert!(!conn.flush(&mut stream));
        assert_eq!(stream.written, b"-un");
        assert!(conn.has_pending_writes());

        stream.write_limit = None;
        assert!(conn.flush(&mut stream));
        assert_eq!(stream.written, b"-unknown command\r\n");
        assert!(conn.pending_writes().is_none());
    }
}
