//! Machine-mode client: one instance per child process.
//!
//! [`MachineClient`] owns the correlation registry, the subscriber table,
//! the serialised writer, and the background tasks (reader loop and event
//! pump). It is cheap to clone; every clone refers to the same instance.
//!
//! # Lifecycle
//!
//! 1. [`MachineClient::connect`] spawns the child and waits for `ready`
//!    (`NotStarted → Starting → Ready`). On timeout the child is killed.
//!    These phases are logged by `connect` only; no client exists yet.
//! 2. The reader loop and event pump start (`Ready → Running`). A returned
//!    client is always `Running` or later.
//! 3. [`MachineClient::disconnect`] sends `/quit`, closes the registry, and
//!    escalates until the child is gone (`Running → Stopping → Terminated`).
//!    EOF on the child's stdout also ends in `Terminated`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::machine::codec::MachineCodec;
use crate::machine::dispatcher::{run_event_pump, run_reader, Dispatcher, ReaderExit};
use crate::machine::frame::Frame;
use crate::machine::lifecycle::{self, ExitPath, ProcessState};
use crate::machine::registry::{CorrelationRegistry, PendingResponse};
use crate::machine::subscribers::{handler, EventCategory, SubscriberTable};
use crate::machine::transport::{self, LineWriter, SpawnConfig};
use crate::models::message::IncomingMessage;
use crate::models::peer::PeerUpdate;
use crate::{AppError, Result};

/// Token prefix carrying the correlation id on the command line.
pub const ID_FLAG: &str = "--id=";

/// Prefix of generated correlation ids.
pub const GENERATED_ID_PREFIX: &str = "cmd_";

/// Command sent to ask the child to exit.
pub const QUIT_COMMAND: &str = "/quit";

/// Timeouts governing one client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Window for the `ready` frame.
    pub startup_timeout: Duration,
    /// Default deadline for correlated responses.
    pub response_timeout: Duration,
    /// Grace period for each shutdown escalation step.
    pub shutdown_grace: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl From<&GlobalConfig> for ClientOptions {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            startup_timeout: config.startup_timeout(),
            response_timeout: config.response_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Caller-supplied correlation id; ignored if the command already
    /// carries `--id=`.
    pub id: Option<String>,
    /// Deadline overriding [`ClientOptions::response_timeout`].
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Use `id` as the correlation id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Wait at most `timeout` for the response.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Return the value of the first `--id=` token in `command`, if any.
///
/// Only whole tokens outside double-quoted arguments count; `--id=` inside
/// message text is not an id.
#[must_use]
pub fn extract_id(command: &str) -> Option<&str> {
    locate_id(command).map(|(_, id)| id)
}

/// Byte offset and value of the first unquoted `--id=` token.
fn locate_id(command: &str) -> Option<(usize, &str)> {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut token_start = true;
    for (idx, ch) in command.char_indices() {
        if in_quotes {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }
        if ch.is_whitespace() {
            token_start = true;
            continue;
        }
        if token_start {
            if let Some(rest) = command[idx..].strip_prefix(ID_FLAG) {
                let id = rest.split(char::is_whitespace).next().unwrap_or_default();
                if !id.is_empty() {
                    return Some((idx, id));
                }
            }
        }
        token_start = false;
        if ch == '"' {
            in_quotes = true;
        }
    }
    None
}

struct ClientInner {
    identity: String,
    options: ClientOptions,
    registry: Arc<CorrelationRegistry>,
    subscribers: Arc<SubscriberTable>,
    writer: LineWriter,
    next_id: AtomicU64,
    state: Arc<watch::Sender<ProcessState>>,
    child: Mutex<Option<Child>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Async client for one CSend process in machine mode.
#[derive(Clone)]
pub struct MachineClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for MachineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineClient")
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl MachineClient {
    /// Spawn the child described by `config` and wait for readiness.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn`: the executable could not be launched.
    /// - `AppError::StartupTimeout`: no `ready` frame in time; the child
    ///   has been killed and reaped before this returns.
    /// - `AppError::ClientClosed`: the child exited before `ready`.
    pub async fn connect(config: &GlobalConfig) -> Result<Self> {
        Self::connect_with(
            &config.spawn_config(),
            &config.identity,
            ClientOptions::from(config),
        )
        .await
    }

    /// Spawn an explicit command line and wait for readiness.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_with(
        spawn: &SpawnConfig,
        identity: &str,
        options: ClientOptions,
    ) -> Result<Self> {
        let span = info_span!("connect", identity);
        async {
            debug!(
                state = %ProcessState::NotStarted,
                program = %spawn.program.display(),
                "spawning child"
            );
            let transport::SpawnedProcess {
                mut child,
                writer,
                stdout,
            } = transport::spawn_process(spawn)?;

            debug!(state = %ProcessState::Starting, "waiting for ready signal");
            let mut framed = FramedRead::new(stdout, MachineCodec::new());
            if let Err(err) = lifecycle::wait_for_ready(&mut framed, options.startup_timeout).await
            {
                warn!(error = %err, "startup failed, killing child");
                lifecycle::force_kill(&mut child).await;
                return Err(err);
            }

            Ok(Self::start(identity, options, framed, writer, Some(child)))
        }
        .instrument(span)
        .await
    }

    /// Run the client over arbitrary streams instead of a child process.
    ///
    /// `reader` plays the child's stdout and `writer` its stdin. The startup
    /// handshake still applies.
    ///
    /// # Errors
    ///
    /// - `AppError::StartupTimeout`: no `ready` frame in time.
    /// - `AppError::ClientClosed`: `reader` ended before `ready`.
    pub async fn from_streams<R, W>(
        reader: R,
        writer: W,
        identity: &str,
        options: ClientOptions,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut framed = FramedRead::new(reader, MachineCodec::new());
        lifecycle::wait_for_ready(&mut framed, options.startup_timeout).await?;
        Ok(Self::start(
            identity,
            options,
            framed,
            LineWriter::new(Box::new(writer)),
            None,
        ))
    }

    fn start<R>(
        identity: &str,
        options: ClientOptions,
        framed: FramedRead<R, MachineCodec>,
        writer: LineWriter,
        child: Option<Child>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        debug!(state = %ProcessState::Ready, "handshake complete");
        let (state, _) = watch::channel(ProcessState::Ready);
        let state = Arc::new(state);
        let registry = CorrelationRegistry::new();
        let subscribers = Arc::new(SubscriberTable::new());
        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher::new(Arc::clone(&registry), event_tx);
        let reader_state = Arc::clone(&state);
        let reader_cancel = cancel.child_token();
        let reader = tokio::spawn(
            async move {
                let (exit, stats) = run_reader(framed, dispatcher, reader_cancel).await;
                info!(
                    ?exit,
                    frames = stats.frames,
                    skipped = stats.skipped,
                    resolved = stats.resolved,
                    dropped = stats.dropped,
                    events = stats.events,
                    "reader stopped"
                );
                if exit != ReaderExit::Cancelled {
                    reader_state.send_if_modified(|s| {
                        if *s == ProcessState::Stopping || *s == ProcessState::Terminated {
                            false
                        } else {
                            *s = ProcessState::Terminated;
                            true
                        }
                    });
                }
            }
            .instrument(info_span!("reader", identity)),
        );

        let pump = tokio::spawn(
            run_event_pump(event_rx, Arc::clone(&subscribers), cancel.child_token())
                .instrument(info_span!("event_pump", identity)),
        );

        state.send_replace(ProcessState::Running);
        info!(identity, "machine-mode client running");

        Self {
            inner: Arc::new(ClientInner {
                identity: identity.to_owned(),
                options,
                registry,
                subscribers,
                writer,
                next_id: AtomicU64::new(1),
                state,
                child: Mutex::new(child),
                tasks: StdMutex::new(vec![reader, pump]),
                cancel,
            }),
        }
    }

    /// Identity passed to `--machine-mode`.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Current process state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.inner.state.borrow()
    }

    /// Number of correlated requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.registry.pending_count()
    }

    /// Number of handlers bound to `category`.
    #[must_use]
    pub fn subscriber_count(&self, category: &EventCategory) -> usize {
        self.inner.subscribers.count(category)
    }

    /// Wait until the client reaches [`ProcessState::Terminated`].
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        if rx.wait_for(|s| *s == ProcessState::Terminated).await.is_err() {
            debug!("state channel dropped while waiting for close");
        }
    }

    fn ensure_accepting(&self) -> Result<()> {
        let state = self.state();
        if !state.accepts_commands() || self.inner.registry.is_closed() {
            return Err(AppError::ClientClosed(format!(
                "client is {state}; no further commands accepted"
            )));
        }
        Ok(())
    }

    /// Write a command without waiting for a reply.
    ///
    /// # Errors
    ///
    /// - `AppError::ClientClosed`: the client is not running.
    /// - `AppError::Protocol`: `command` contains a line break.
    /// - `AppError::Write`: the child's stdin is gone; the client closes.
    /// - `AppError::ResponseTimeout`: the child did not accept the line
    ///   within the response timeout.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        self.ensure_accepting()?;
        debug!(command, "sending command");
        let deadline = Instant::now() + self.inner.options.response_timeout;
        self.write_until(command, deadline).await
    }

    /// Write `line`, giving up at `deadline` if the child stops reading.
    async fn write_until(&self, line: &str, deadline: Instant) -> Result<()> {
        let outcome = tokio::time::timeout_at(deadline, self.inner.writer.write_line(line))
            .await
            .unwrap_or_else(|_elapsed| {
                Err(AppError::ResponseTimeout(
                    "child stdin did not accept the command in time".into(),
                ))
            });

        match outcome {
            Err(err @ AppError::Write(_)) => {
                let cancelled = self.inner.registry.close();
                warn!(error = %err, cancelled, "child stdin closed, failing outstanding requests");
                Err(err)
            }
            Err(err @ AppError::ResponseTimeout(_)) if self.inner.writer.is_closed() => {
                let cancelled = self.inner.registry.close();
                warn!(error = %err, cancelled, "write abandoned mid-line, failing outstanding requests");
                Err(err)
            }
            other => other,
        }
    }

    /// Send `command` and wait for its correlated response.
    ///
    /// # Errors
    ///
    /// See [`request_with`](Self::request_with).
    pub async fn request(&self, command: &str) -> Result<Frame> {
        self.request_with(command, RequestOptions::default()).await
    }

    /// Send `command` with per-request options and wait for its response.
    ///
    /// The correlation id is, in order of precedence: an `--id=` token
    /// already in `command`, `options.id`, or a generated `cmd_<n>`.
    /// The returned frame may be an `error` frame; that is the child's
    /// answer, not a transport failure.
    ///
    /// # Errors
    ///
    /// - `AppError::DuplicateId`: the chosen id is already pending.
    /// - `AppError::ResponseTimeout`: no reply before the deadline. The
    ///   deadline covers writing the line as well as waiting for the reply.
    /// - `AppError::ClientClosed`: the client closed before a reply.
    /// - `AppError::Protocol`: `command` contains a line break, or `--id=`
    ///   inside a quoted argument ahead of any real id token.
    /// - `AppError::Write`: see [`send_command`](Self::send_command).
    pub async fn request_with(&self, command: &str, options: RequestOptions) -> Result<Frame> {
        self.ensure_accepting()?;

        let (line, pending) = self.register_for(command, options.id.as_deref())?;
        let timeout = options.timeout.unwrap_or(self.inner.options.response_timeout);
        let deadline = Instant::now() + timeout;

        debug!(id = pending.id(), command = %line, "sending correlated command");
        // On failure `pending` is dropped here, which unregisters it.
        self.write_until(&line, deadline).await?;

        pending
            .wait(deadline.saturating_duration_since(Instant::now()))
            .await
    }

    fn register_for(
        &self,
        command: &str,
        requested: Option<&str>,
    ) -> Result<(String, PendingResponse)> {
        let located = locate_id(command);
        // The child takes the first `--id=` anywhere in the line, quoted or not.
        if let Some(first) = command.find(ID_FLAG) {
            if located.map(|(at, _)| at) != Some(first) {
                return Err(AppError::Protocol(format!(
                    "'{ID_FLAG}' inside a quoted argument would be read as the correlation id"
                )));
            }
        }

        if let Some((_, id)) = located {
            let pending = self.inner.registry.register(id)?;
            return Ok((command.to_owned(), pending));
        }

        if let Some(id) = requested {
            let pending = self.inner.registry.register(id)?;
            return Ok((format!("{command} {ID_FLAG}{id}"), pending));
        }

        // Generated ids skip over any caller-supplied id that collides.
        loop {
            let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let id = format!("{GENERATED_ID_PREFIX}{n}");
            match self.inner.registry.register(&id) {
                Ok(pending) => return Ok((format!("{command} {ID_FLAG}{id}"), pending)),
                Err(AppError::DuplicateId(_)) => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// Handle incoming chat messages.
    ///
    /// Message events without a `data` payload are skipped.
    pub fn on_message<F, Fut>(&self, f: F)
    where
        F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe_typed(EventCategory::Message, "message", f);
    }

    /// Handle peer join/leave/change notifications.
    pub fn on_peer_update<F, Fut>(&self, f: F)
    where
        F: Fn(PeerUpdate) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe_typed(EventCategory::PeerUpdate, "peer_update", f);
    }

    /// Handle every event named `event`, receiving the raw frame.
    pub fn on_event<F, Fut>(&self, event: &str, f: F)
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner
            .subscribers
            .subscribe(EventCategory::Named(event.to_owned()), handler(f));
    }

    /// Handle every event frame regardless of category.
    pub fn on_any_event<F, Fut>(&self, f: F)
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner.subscribers.subscribe(EventCategory::Any, handler(f));
    }

    fn subscribe_typed<T, F, Fut>(&self, category: EventCategory, name: &'static str, f: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.inner.subscribers.subscribe(
            category,
            handler(move |frame: Frame| {
                let f = Arc::clone(&f);
                async move {
                    let Some(data) = frame.data else {
                        debug!(event = name, "event without data skipped");
                        return Ok(());
                    };
                    let payload: T = serde_json::from_value(data).map_err(|e| {
                        AppError::Protocol(format!("invalid {name} event payload: {e}"))
                    })?;
                    f(payload).await
                }
            }),
        );
    }

    /// Shut the client down.
    ///
    /// Sends `/quit` if the child is still accepting commands, fails every
    /// outstanding request with `AppError::ClientClosed`, waits for the
    /// child with SIGTERM/SIGKILL escalation, and stops the background
    /// tasks. Idempotent. Returns how the child ended, or `None` when there
    /// was no child left to stop.
    pub async fn disconnect(&self) -> Option<ExitPath> {
        let grace = self.inner.options.shutdown_grace;
        let was_live = self.inner.state.send_if_modified(|s| {
            if s.accepts_commands() {
                *s = ProcessState::Stopping;
                true
            } else {
                false
            }
        });

        if was_live {
            match tokio::time::timeout(grace, self.inner.writer.write_line(QUIT_COMMAND)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "quit command not delivered"),
                Err(_elapsed) => {
                    warn!(?grace, "child stdin blocked, quit command abandoned");
                    self.inner.writer.mark_closed();
                }
            }
        }

        let cancelled = self.inner.registry.close();
        if tokio::time::timeout(grace, self.inner.writer.close()).await.is_err() {
            debug!("child stdin close timed out");
            self.inner.writer.mark_closed();
        }

        let exit = match self.inner.child.lock().await.take() {
            Some(mut child) => Some(lifecycle::terminate(&mut child, grace).await),
            None => None,
        };

        self.inner.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for mut task in tasks {
            // A subscriber may be the one calling disconnect; never wait on
            // it forever.
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                task.abort();
            }
        }

        self.inner.subscribers.clear();
        self.inner.state.send_replace(ProcessState::Terminated);
        info!(identity = %self.inner.identity, cancelled, ?exit, "client disconnected");
        exit
    }
}
