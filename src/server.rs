//! Server lifecycle: listening socket, accept loop and shutdown.
//!
//! ```text
//! Stopped -> Starting -> Listening -> ShuttingDown -> Stopped
//! ```
//!
//! Connections are served one at a time on the calling thread. The accept
//! wait is bounded by `accept_timeout` so a shutdown request from a
//! `ShutdownHandle` is noticed within one timeout.

use crate::config::Config;
use crate::error::ServerError;
use crate::session::{Session, SessionEnd, SessionLimits, SessionReport};
use crate::storage::FileStore;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(0);

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Listening,
    ShuttingDown,
}

/// Result of one bounded accept wait.
#[derive(Debug)]
pub enum Accepted {
    Connection(TcpStream, SocketAddr),
    /// Nothing arrived before the timeout.
    Tick,
}

/// State shared with `ShutdownHandle`s.
#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    frames: AtomicU64,
}

/// Cloneable handle for stopping a running server from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Ask the accept loop to stop. Takes effect within one accept timeout,
    /// or after the connection currently being served ends.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Frames completed so far, counted as each reply is sent.
    pub fn frames_processed(&self) -> u64 {
        self.shared.frames.load(Ordering::SeqCst)
    }
}

/// Bound listener plus the poll used to wait on it.
struct Listener {
    socket: TcpListener,
    /// Clone of `socket` registered with `poll` for readiness.
    watcher: mio::net::TcpListener,
    poll: Poll,
    events: Events,
}

/// Upload server instance
pub struct Server {
    config: Config,
    store: Arc<dyn FileStore>,
    limits: SessionLimits,
    state: LifecycleState,
    listener: Option<Listener>,
    local_addr: Option<SocketAddr>,
    shared: Arc<Shared>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, store: Arc<dyn FileStore>) -> Self {
        let limits = SessionLimits::from(&config);
        Server {
            config,
            store,
            limits,
            state: LifecycleState::Stopped,
            listener: None,
            local_addr: None,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Address the listener is bound to, while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Bind the listening socket and move to `Listening`.
    ///
    /// On failure the server stays `Stopped`.
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let (LifecycleState::Listening, Some(addr)) = (self.state, self.local_addr) {
            return Ok(addr);
        }

        let addr = self.config.listen_addr()?;
        info!(address = %addr, "Starting server");
        self.state = LifecycleState::Starting;

        let listener = match open_listener(addr, self.config.backlog) {
            Ok(listener) => listener,
            Err(source) => {
                self.state = LifecycleState::Stopped;
                error!(address = %addr, error = %source, "Failed to start");
                return Err(ServerError::Bind { addr, source });
            }
        };

        let local_addr = listener.socket.local_addr().unwrap_or(addr);
        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        self.shared.running.store(true, Ordering::SeqCst);
        self.state = LifecycleState::Listening;

        info!(address = %local_addr, "Server listening");
        Ok(local_addr)
    }

    /// Accept connections until shutdown is requested, the frame budget is
    /// used up, or accepting fails.
    ///
    /// The server is shut down when this returns. Transfer errors only close
    /// the connection they occurred on.
    pub fn run(&mut self) -> Result<(), ServerError> {
        if self.state != LifecycleState::Listening {
            return Err(ServerError::NotListening);
        }

        let result = loop {
            if !self.is_running() {
                break Ok(());
            }
            if self.budget_exhausted() {
                info!(frames = self.frames_processed(), "Frame budget reached");
                break Ok(());
            }

            match self.accept() {
                Ok(Accepted::Tick) => continue,
                Ok(Accepted::Connection(stream, peer)) => {
                    self.serve_connection(stream, peer);
                }
                Err(e) => {
                    error!(error = %e, "Unexpected error in accept loop");
                    break Err(e);
                }
            }
        };

        self.shutdown();
        result
    }

    /// Wait up to `accept_timeout` for a connection.
    pub fn accept(&mut self) -> Result<Accepted, ServerError> {
        let timeout = self.config.accept_timeout;
        let listener = self.listener.as_mut().ok_or(ServerError::NotListening)?;

        if let Some(accepted) = try_accept(&listener.socket)? {
            return Ok(accepted);
        }

        match listener.poll.poll(&mut listener.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Accepted::Tick),
            Err(e) => return Err(ServerError::Poll(e)),
        }

        Ok(try_accept(&listener.socket)?.unwrap_or(Accepted::Tick))
    }

    /// Serve one connection until it closes.
    pub fn serve_connection(&mut self, stream: TcpStream, peer: SocketAddr) -> SessionReport {
        info!(peer = %peer, "Client connected");

        if let Err(e) = configure_stream(&stream, self.config.read_timeout) {
            warn!(peer = %peer, error = %e, "Failed to configure connection");
            return SessionReport {
                frames: 0,
                bytes_stored: 0,
                end: SessionEnd::Aborted(e.into()),
            };
        }

        let budget = self
            .config
            .max_frames
            .map(|max| max.saturating_sub(self.frames_processed()));

        let report = Session::new(&stream, self.store.as_ref(), self.limits)
            .with_frame_counter(&self.shared.frames)
            .serve(budget);

        match &report.end {
            SessionEnd::PeerClosed => {
                info!(peer = %peer, frames = report.frames, "Client disconnected")
            }
            SessionEnd::Idle => {
                info!(peer = %peer, frames = report.frames, "Closing idle connection")
            }
            SessionEnd::BudgetExhausted => {
                debug!(
                    peer = %peer,
                    frames = report.frames,
                    "Closing connection at frame budget"
                )
            }
            SessionEnd::Aborted(e) => {
                warn!(
                    peer = %peer,
                    frames = report.frames,
                    error = %e,
                    "Transfer failed, closing connection"
                )
            }
        }

        report
    }

    /// Close the listening socket and stop. Safe to call in any state.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if self.state == LifecycleState::Stopped && self.listener.is_none() {
            return;
        }

        info!("Server is shutting down");
        self.state = LifecycleState::ShuttingDown;

        if let Some(mut listener) = self.listener.take() {
            let _ = listener.poll.registry().deregister(&mut listener.watcher);
        }
        self.local_addr = None;
        self.state = LifecycleState::Stopped;
        info!(frames = self.frames_processed(), "Server stopped");
    }

    fn budget_exhausted(&self) -> bool {
        self.config
            .max_frames
            .is_some_and(|max| self.frames_processed() >= max)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept a pending connection, if there is one.
fn try_accept(listener: &TcpListener) -> Result<Option<Accepted>, ServerError> {
    match listener.accept() {
        Ok((stream, peer)) => Ok(Some(Accepted::Connection(stream, peer))),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) if is_transient_accept_error(&e) => {
            debug!(error = %e, "Transient accept failure");
            Ok(Some(Accepted::Tick))
        }
        Err(e) => Err(ServerError::Accept(e)),
    }
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted | io::ErrorKind::TimedOut
    )
}

/// Create the listening socket and register it for readiness polling.
fn open_listener(addr: SocketAddr, backlog: i32) -> io::Result<Listener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.max(1))?;
    socket.set_nonblocking(true)?;

    let socket: TcpListener = socket.into();
    let mut watcher = mio::net::TcpListener::from_std(socket.try_clone()?);
    let poll = Poll::new()?;
    poll.registry()
        .register(&mut watcher, LISTENER_TOKEN, Interest::READABLE)?;

    Ok(Listener {
        socket,
        watcher,
        poll,
        events: Events::with_capacity(8),
    })
}

/// Accepted sockets may inherit non-blocking mode from the listener.
fn configure_stream(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    let timeout = Some(timeout).filter(|t| !t.is_zero());
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    stream.set_nodelay(true)?;
    Ok(())
}
