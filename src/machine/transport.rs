//! Line transport: child process spawning and the serialised line writer.
//!
//! The child is launched with piped stdin/stdout/stderr and
//! `kill_on_drop(true)`, so a client dropped without an orderly shutdown
//! never leaves the process behind. Reading is owned by the single reader
//! loop in [`dispatcher`](super::dispatcher); writing goes through
//! [`LineWriter`], which holds an async mutex for the whole line so
//! concurrent callers can never interleave bytes mid-line.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::codec::Encoder;
use tracing::{debug, info, trace, warn};

use crate::machine::codec::MachineCodec;
use crate::{AppError, Result};

/// Boxed write half handed to [`LineWriter`].
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Parameters for launching the child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Executable path or name resolved through `PATH`.
    pub program: PathBuf,
    /// Arguments passed verbatim.
    pub args: Vec<OsString>,
    /// Optional working directory for the child.
    pub working_dir: Option<PathBuf>,
}

impl SpawnConfig {
    /// Launch `executable --machine-mode <identity>`.
    #[must_use]
    pub fn machine_mode(executable: &Path, identity: &str) -> Self {
        Self {
            program: executable.to_path_buf(),
            args: vec!["--machine-mode".into(), identity.into()],
            working_dir: None,
        }
    }

    /// Launch an arbitrary program with arguments.
    #[must_use]
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }
}

/// A freshly spawned child with its stdio halves separated.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Child handle; kept alive so `kill_on_drop` applies.
    pub child: Child,
    /// Writer over the child's stdin.
    pub writer: LineWriter,
    /// The child's stdout, consumed by the reader loop.
    pub stdout: ChildStdout,
}

/// Spawn the child process described by `config`.
///
/// Stderr is drained in a background task and forwarded to `tracing` at
/// `DEBUG`, so a chatty child can never block on a full stderr pipe.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn …")`: OS spawn failure (missing
///   binary, permissions).
/// - `AppError::Spawn("failed to capture …")`: a stdio pipe was not created.
pub fn spawn_process(config: &SpawnConfig) -> Result<SpawnedProcess> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn {}: {err}",
            config.program.display()
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture child stdout".into()))?;

    if let Some(stderr) = child.stderr.take() {
        drain_stderr(stderr);
    }

    info!(
        program = %config.program.display(),
        pid = child.id().unwrap_or(0),
        "machine-mode process spawned"
    );

    Ok(SpawnedProcess {
        child,
        writer: LineWriter::new(Box::new(stdin)),
        stdout,
    })
}

fn drain_stderr(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(stderr = %line, "child stderr"),
                Ok(None) => break,
                Err(err) => {
                    debug!(%err, "child stderr closed with error");
                    break;
                }
            }
        }
    });
}

/// Serialised writer over the child's stdin.
///
/// Each call to [`write_line`](Self::write_line) encodes `text\n` and writes
/// it while holding the writer lock. Once a write fails the writer is marked
/// closed and every later call fails fast with `AppError::Write`.
///
/// A write cancelled part-way through a line (for example by a caller's
/// timeout) also closes the writer: the child would otherwise read the torn
/// prefix glued to the next command.
pub struct LineWriter {
    inner: Mutex<WriterState>,
    closed: AtomicBool,
}

struct WriterState {
    sink: BoxedWriter,
    codec: MachineCodec,
}

impl std::fmt::Debug for LineWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineWriter")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl LineWriter {
    /// Wrap an arbitrary async writer.
    #[must_use]
    pub fn new(sink: BoxedWriter) -> Self {
        Self {
            inner: Mutex::new(WriterState {
                sink,
                codec: MachineCodec::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether a previous write failed or [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write `text` followed by a single `\n`.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if `text` contains a line break.
    /// - `AppError::Write` if the writer is closed or the pipe write fails.
    pub async fn write_line(&self, text: &str) -> Result<()> {
        if text.contains(['\n', '\r']) {
            return Err(AppError::Protocol(
                "command text must not contain line breaks".into(),
            ));
        }

        let mut state = self.inner.lock().await;
        if self.is_closed() {
            return Err(AppError::Write("writer is closed".into()));
        }

        let mut buf = BytesMut::with_capacity(text.len() + 1);
        let WriterState { sink, codec } = &mut *state;
        codec
            .encode(text.to_owned(), &mut buf)
            .map_err(|e| AppError::Write(e.to_string()))?;

        let mut torn = TornLineGuard {
            closed: &self.closed,
            partial: false,
        };
        let outcome = async {
            let mut written = 0;
            while written < buf.len() {
                let n = sink.write(&buf[written..]).await?;
                if n == 0 {
                    return Err(io::Error::from(io::ErrorKind::WriteZero));
                }
                written += n;
                torn.partial = written < buf.len();
            }
            sink.flush().await
        }
        .await;
        torn.partial = false;

        if let Err(err) = outcome {
            self.closed.store(true, Ordering::Release);
            warn!(error = %err, "write to child stdin failed");
            return Err(AppError::Write(format!("write failed: {err}")));
        }

        trace!(line = text, "line written");
        Ok(())
    }

    /// Mark the writer closed without waiting for the lock.
    ///
    /// Used when a write is stuck behind a child that stopped reading; later
    /// writes fail fast instead of queueing behind it.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Close the writer, shutting down the underlying stream.
    pub async fn close(&self) {
        let mut state = self.inner.lock().await;
        self.closed.store(true, Ordering::Release);
        if let Err(err) = state.sink.shutdown().await {
            debug!(%err, "error shutting down child stdin");
        }
    }
}

/// Closes the writer if dropped while a line is half written.
struct TornLineGuard<'a> {
    closed: &'a AtomicBool,
    partial: bool,
}

impl Drop for TornLineGuard<'_> {
    fn drop(&mut self) {
        if self.partial {
            self.closed.store(true, Ordering::Release);
            warn!("write cancelled mid-line, closing child stdin writer");
        }
    }
}
