use crate::network::Connection;
use crate::protocol::CommandExecutor;
use crate::storage::{FeoxStorage, Storage};
use crate::{config::Config, error::Result};
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SERVER: Token = Token(0);

/// A client socket together with its protocol state
struct Client {
    stream: MioTcpStream,
    connection: Connection,
    // Registered for write readiness as well as read readiness
    writable: bool,
}

/// Redis-compatible GET/SET/INCR server
///
/// A single thread owns the event loop, the listening socket, every client
/// socket and the storage handle, so commands never run concurrently.
pub struct Server {
    config: Config,
    storage: Arc<dyn Storage>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    active_connections: AtomicUsize,
}

impl Server {
    /// Open the FeOx store described by `config` and bind the listen socket
    pub fn new(config: Config) -> Result<Self> {
        let storage = FeoxStorage::open(&config)?;
        Self::with_storage(config, Arc::new(storage))
    }

    /// Bind the listen socket in front of an already opened storage
    pub fn with_storage(config: Config, storage: Arc<dyn Storage>) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr())?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            storage,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: AtomicUsize::new(0),
        })
    }

    /// Address the server is accepting connections on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Signal the server to shut down gracefully
    pub fn shutdown(&self) {
        info!("Initiating server shutdown");
        self.shutdown.store(true, Ordering::Release);
    }

    /// Flag that stops [`Server::run`] when set, usable after the server
    /// itself has moved into the event loop
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Get the number of active client connections
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Run the event loop on the calling thread
    ///
    /// This method blocks until the server is shut down.
    pub fn run(self: Arc<Self>) -> Result<()> {
        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(1024);

        let mut listener = MioTcpListener::from_std(self.listener.try_clone()?);
        poll.registry()
            .register(&mut listener, SERVER, Interest::READABLE)?;

        info!("Server listening on {}", self.local_addr()?);

        let mut clients: HashMap<Token, Client> = HashMap::new();
        let mut next_token = 1usize;

        while !self.shutdown.load(Ordering::Acquire) {
            // Poll for events with 100ms timeout so shutdown is noticed
            if let Err(e) = poll.poll(&mut events, Some(Duration::from_millis(100))) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    SERVER => self.accept_connections(
                        &listener,
                        poll.registry(),
                        &mut clients,
                        &mut next_token,
                    ),
                    token => {
                        let should_close = match clients.get_mut(&token) {
                            Some(client) => {
                                if event.is_readable() {
                                    client.connection.on_readable(&mut client.stream);
                                }
                                self.drain_writes(poll.registry(), token, client)
                            }
                            None => false,
                        };

                        if should_close {
                            self.close_client(poll.registry(), &mut clients, token);
                        }
                    }
                }
            }
        }

        // Cleanup
        let tokens: Vec<Token> = clients.keys().copied().collect();
        for token in tokens {
            self.close_client(poll.registry(), &mut clients, token);
        }

        if let Err(e) = self.storage.flush() {
            error!("Failed to flush storage on shutdown: {}", e);
        }

        info!("Server shut down");
        Ok(())
    }

    fn accept_connections(
        &self,
        listener: &MioTcpListener,
        registry: &Registry,
        clients: &mut HashMap<Token, Client>,
        next_token: &mut usize,
    ) {
        loop {
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    if clients.len() >= self.config.max_connections {
                        warn!(
                            "Rejecting connection from {}: {} connections open",
                            addr,
                            clients.len()
                        );
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(self.config.tcp_nodelay) {
                        warn!("Failed to configure socket for {}: {}", addr, e);
                    }

                    let token = Token(*next_token);
                    *next_token += 1;

                    if let Err(e) = registry.register(&mut stream, token, Interest::READABLE) {
                        error!("Failed to register connection from {}: {}", addr, e);
                        continue;
                    }

                    debug!("New connection {} from {}", token.0, addr);

                    let executor = CommandExecutor::new(Arc::clone(&self.storage), &self.config);
                    let connection = Connection::new(
                        token.0,
                        self.config.connection_buffer_size,
                        executor,
                        Some(addr),
                    );

                    clients.insert(
                        token,
                        Client {
                            stream,
                            connection,
                            writable: false,
                        },
                    );
                    self.active_connections.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    break;
                }
            }
        }
    }

    /// Write whatever the socket accepts and keep write interest in sync with
    /// the reply queue. Reading resumes here when it was paused on a full
    /// queue. Returns true when the client should be released.
    fn drain_writes(&self, registry: &Registry, token: Token, client: &mut Client) -> bool {
        let drained = loop {
            let drained = client.connection.flush(&mut client.stream);
            if client.connection.is_closed() {
                return true;
            }
            if !drained || !client.connection.read_paused() {
                break drained;
            }
            client.connection.on_readable(&mut client.stream);
        };

        let want_writable = !drained;
        if want_writable != client.writable {
            let interest = if want_writable {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            if let Err(e) = registry.reregister(&mut client.stream, token, interest) {
                error!("Failed to update interest for connection {}: {}", token.0, e);
                return true;
            }
            client.writable = want_writable;
        }

        false
    }

    fn close_client(
        &self,
        registry: &Registry,
        clients: &mut HashMap<Token, Client>,
        token: Token,
    ) {
        if let Some(mut client) = clients.remove(&token) {
            let _ = registry.deregister(&mut client.stream);
            client.connection.close();
            debug!(
                "Connection {} ({:?}) released after {} commands",
                client.connection.id(),
                client.connection.addr(),
                client.connection.commands_processed
            );
            self.active_connections.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
