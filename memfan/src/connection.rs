//! Per-server connections.
//!
//! Each configured server is owned by one actor task. The task's inbox is
//! the request queue: tickets are processed strictly one at a time, which
//! gives FIFO dispatch, FIFO completion and a single writer on the socket.
//! The socket itself is created lazily on the first ticket and destroyed on
//! any terminal error; the actor outlives it and will reconnect for later
//! tickets.

use std::io;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use crate::command::{Command, Reply};
use crate::protocol::{DriveError, Driver, ProtocolKind};

/// Consecutive connect timeouts (and consecutive replays of one request)
/// tolerated before the connection gives up and fails its queue.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Options a connection needs to reach its server.
#[derive(Debug, Clone)]
pub(crate) struct ConnOptions {
    pub connect_timeout: Duration,
    pub protocol: ProtocolKind,
}

/// One queued request and the channel its reply travels back on.
#[derive(Debug)]
pub(crate) struct Ticket {
    pub command: Command,
    pub done: oneshot::Sender<Reply>,
}

#[derive(Debug)]
enum ConnMsg {
    Run(Ticket),
    Connect(oneshot::Sender<bool>),
    Disconnect,
}

/// Handle to a connection actor. Owned by the client facade; the actor task
/// is spawned on first use so the facade itself can be built outside a
/// runtime.
pub(crate) struct ConnHandle {
    server: String,
    tx: mpsc::UnboundedSender<ConnMsg>,
    /// The not-yet-spawned actor; taken by the first async caller.
    seed: Mutex<Option<ConnTask>>,
}

impl ConnHandle {
    pub(crate) fn new(server: String, opts: ConnOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = ConnTask {
            server: server.clone(),
            opts,
            rx,
            stream: None,
            rbuf: BytesMut::with_capacity(8 * 1024),
            driver: None,
            consecutive_timeouts: 0,
            completed: 0,
            last_enqueued: None,
        };
        ConnHandle {
            server,
            tx,
            seed: Mutex::new(Some(task)),
        }
    }

    pub(crate) fn server(&self) -> &str {
        &self.server
    }

    /// Queue a command. The returned channel yields the reply; if the actor
    /// is gone the default is delivered immediately.
    pub(crate) fn submit(&self, command: Command) -> oneshot::Receiver<Reply> {
        self.ensure_spawned();
        let (done, rx) = oneshot::channel();
        let default = command.default_reply();
        if let Err(mpsc::error::SendError(msg)) = self.tx.send(ConnMsg::Run(Ticket { command, done }))
        {
            if let ConnMsg::Run(ticket) = msg {
                let _ = ticket.done.send(default);
            }
        }
        rx
    }

    /// Ask the actor to connect eagerly. Yields whether the socket opened.
    pub(crate) fn connect(&self) -> oneshot::Receiver<bool> {
        self.ensure_spawned();
        let (ack, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(ConnMsg::Connect(ack))) = self.tx.send(ConnMsg::Connect(ack))
        {
            let _ = ack.send(false);
        }
        rx
    }

    /// Drop the socket and fail everything queued behind this call.
    ///
    /// Unlike `submit`/`connect` this may run outside the runtime (from
    /// `set_servers`), so it only enqueues; an actor that was never spawned
    /// has nothing to tear down anyway.
    pub(crate) fn disconnect(&self) {
        let _ = self.tx.send(ConnMsg::Disconnect);
    }

    /// Spawn the actor if this is the first use. Callers are always inside
    /// the runtime by the time they touch a connection.
    fn ensure_spawned(&self) {
        let task = self.seed.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            tokio::spawn(task.run());
        }
    }
}

/// The actor: owns the socket, the read buffer and the failure counters.
struct ConnTask {
    server: String,
    opts: ConnOptions,
    rx: mpsc::UnboundedReceiver<ConnMsg>,
    stream: Option<TcpStream>,
    rbuf: BytesMut,
    driver: Option<Driver>,
    consecutive_timeouts: u32,
    completed: u64,
    last_enqueued: Option<Instant>,
}

impl ConnTask {
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                ConnMsg::Run(ticket) => self.run_ticket(ticket).await,
                ConnMsg::Connect(ack) => {
                    let connected = match self.ensure_connected().await {
                        Ok(()) => true,
                        Err(err) => {
                            log::debug!("{}: eager connect failed: {err}", self.server);
                            false
                        }
                    };
                    let _ = ack.send(connected);
                }
                ConnMsg::Disconnect => self.shutdown().await,
            }
        }
        // Facade dropped: pending oneshots resolve to defaults on their own.
    }

    /// Drive one ticket to completion, reconnecting and replaying through
    /// transient failures.
    async fn run_ticket(&mut self, ticket: Ticket) {
        self.last_enqueued = Some(Instant::now());
        let mut replays = 0u32;

        loop {
            if let Err(err) = self.ensure_connected().await {
                self.fail_cascade(ticket, &err);
                return;
            }
            let (Some(stream), Some(driver)) = (self.stream.as_mut(), self.driver.as_mut()) else {
                self.fail_cascade(ticket, &io::Error::other("connection state lost"));
                return;
            };

            match driver.exchange(stream, &mut self.rbuf, &ticket.command).await {
                Ok(reply) => {
                    self.completed += 1;
                    self.consecutive_timeouts = 0;
                    let _ = ticket.done.send(reply);
                    return;
                }
                Err(DriveError::Malformed(what)) => {
                    // The reply stream is unrecoverable, but only this
                    // request pays for it; queued requests get a fresh
                    // socket.
                    log::warn!("{}: {what}, dropping connection", self.server);
                    self.drop_stream();
                    let default = ticket.command.default_reply();
                    let _ = ticket.done.send(default);
                    return;
                }
                Err(DriveError::Io(err)) if is_disconnect(&err) => {
                    // The server went away under an active request: take a
                    // new socket and replay, the request has not failed.
                    self.drop_stream();
                    replays += 1;
                    if replays >= MAX_CONSECUTIVE_FAILURES {
                        self.fail_cascade(ticket, &err);
                        return;
                    }
                    log::debug!("{}: {err}; reconnecting to replay request", self.server);
                }
                Err(DriveError::Io(err)) => {
                    self.drop_stream();
                    self.fail_cascade(ticket, &err);
                    return;
                }
            }
        }
    }

    /// Open the socket if it is absent. Consecutive connect timeouts retry
    /// silently up to the ceiling; anything else is terminal.
    async fn ensure_connected(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        loop {
            match time::timeout(self.opts.connect_timeout, TcpStream::connect(&self.server)).await {
                Ok(Ok(stream)) => {
                    self.opts.protocol.prepare(&stream)?;
                    self.stream = Some(stream);
                    self.driver = Some(Driver::new(self.opts.protocol));
                    self.rbuf.clear();
                    self.consecutive_timeouts = 0;
                    self.completed = 0;
                    log::debug!("{}: connected", self.server);
                    return Ok(());
                }
                Ok(Err(err)) => return Err(err),
                Err(_elapsed) => {
                    self.consecutive_timeouts += 1;
                    if self.consecutive_timeouts >= MAX_CONSECUTIVE_FAILURES {
                        self.consecutive_timeouts = 0;
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "connect timed out repeatedly",
                        ));
                    }
                    log::debug!(
                        "{}: connect timed out ({}), retrying",
                        self.server,
                        self.consecutive_timeouts
                    );
                }
            }
        }
    }

    /// Terminal failure: this request and everything queued behind it
    /// complete with their defaults. One log line per cascade.
    fn fail_cascade(&mut self, ticket: Ticket, err: &io::Error) {
        let mut failed = 1usize;
        let default = ticket.command.default_reply();
        let _ = ticket.done.send(default);

        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                ConnMsg::Run(ticket) => {
                    let default = ticket.command.default_reply();
                    let _ = ticket.done.send(default);
                    failed += 1;
                }
                ConnMsg::Connect(ack) => {
                    let _ = ack.send(false);
                }
                ConnMsg::Disconnect => {}
            }
        }
        self.drop_stream();
        log::info!(
            "{}: giving up ({err}); {failed} pending request(s) completed with defaults ({} served on this socket)",
            self.server,
            self.completed
        );
    }

    /// Orderly disconnect: best-effort QUIT, then drop the socket and fail
    /// whatever is queued.
    async fn shutdown(&mut self) {
        if let Some(at) = self.last_enqueued {
            log::debug!(
                "{}: disconnecting; last request queued {:?} ago",
                self.server,
                at.elapsed()
            );
        }
        if let (Some(stream), Some(driver)) = (self.stream.as_mut(), self.driver.as_mut()) {
            use tokio::io::AsyncWriteExt;
            let quit = driver.quit_bytes();
            let _ = stream.write_all(&quit).await;
            let _ = stream.shutdown().await;
        }
        self.drop_stream();

        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                ConnMsg::Run(ticket) => {
                    let default = ticket.command.default_reply();
                    let _ = ticket.done.send(default);
                }
                ConnMsg::Connect(ack) => {
                    let _ = ack.send(false);
                }
                ConnMsg::Disconnect => {}
            }
        }
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.driver = None;
        self.rbuf.clear();
    }
}

/// Socket errors that mean "the server hung up" rather than "the server is
/// unreachable": these trigger reconnect-and-replay.
fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}
