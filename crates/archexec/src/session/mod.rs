//! Child process sessions.
//!
//! A [`Session`] owns one child started in its own process group with piped
//! stdout and stderr. Each stream is drained by a dedicated reader thread
//! into its own channel, so a chatty stream can never block the other and
//! the supervising thread never blocks on a read.
//!
//! # Example
//!
//! ```ignore
//! use archexec::session::{Session, SpawnConfig};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), archexec::runner::RunnerError> {
//! let mut session = Session::spawn(SpawnConfig::new("echo", ["hello"]))?;
//! let status = session.wait_for_exit(Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::model::StreamKind;
use crate::runner::{ErrorCode, RunnerError, RunnerResult};

/// Message sent by a stream reader thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// One line without its terminator (`\n` or `\r\n`).
    Line(String),
    /// The stream reached EOF or failed; no more lines will follow.
    Closed,
}

/// Result of a non-blocking read from one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPoll {
    Line(String),
    Pending,
    Closed,
}

/// What to start and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Written to the child's stdin, which is then closed. `None` attaches
    /// stdin to `/dev/null`. Wiped on drop since it may carry a credential.
    pub stdin: Option<Zeroizing<String>>,
}

impl SpawnConfig {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            stdin: None,
        }
    }

    /// Split a full argv into program and arguments.
    pub fn from_argv(argv: Vec<String>) -> RunnerResult<Self> {
        let mut parts = argv.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| RunnerError::internal("cannot spawn an empty argv"))?;
        Ok(Self::new(program, parts))
    }
}

/// Starts sessions. Swapped out in tests to observe or prevent spawning.
pub trait Launcher: Send + Sync {
    fn launch(&self, config: SpawnConfig) -> RunnerResult<Session>;
}

/// [`Launcher`] that starts real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, config: SpawnConfig) -> RunnerResult<Session> {
        Session::spawn(config)
    }
}

pub struct Session {
    child: Child,
    pid: u32,
    stdout: Receiver<StreamMessage>,
    stderr: Receiver<StreamMessage>,
    spawned_at: Instant,
}

impl Session {
    /// Start the child in a new process group and attach the stream readers.
    ///
    /// # Errors
    /// - `E_SPAWN`: the program could not be started, or a reader thread
    ///   could not be created (the child is killed in that case)
    pub fn spawn(config: SpawnConfig) -> RunnerResult<Self> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .stdin(if config.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|err| {
            RunnerError::io(
                ErrorCode::Spawn,
                format!("failed to start {}: {err}", config.program),
                err,
            )
        })?;
        let pid = child.id();
        debug!(pid, program = %config.program, "spawned child");

        let (stdout, stderr) = match attach_readers(&mut child) {
            Ok(receivers) => receivers,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        if let (Some(payload), Some(mut pipe)) = (config.stdin, child.stdin.take()) {
            // A write error means the child exited or closed stdin early;
            // its exit status reports the real outcome.
            if let Err(err) = pipe.write_all(payload.as_bytes()) {
                debug!(pid, error = %err, "child closed stdin early");
            }
        }

        Ok(Self {
            child,
            pid,
            stdout,
            stderr,
            spawned_at: Instant::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    /// Take one pending line from a stream without blocking.
    pub fn poll_stream(&self, stream: StreamKind) -> StreamPoll {
        let receiver = match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        };
        match receiver.try_recv() {
            Ok(StreamMessage::Line(line)) => StreamPoll::Line(line),
            Ok(StreamMessage::Closed) | Err(TryRecvError::Disconnected) => StreamPoll::Closed,
            Err(TryRecvError::Empty) => StreamPoll::Pending,
        }
    }

    /// # Errors
    /// - `E_IO`: failed to query the child status
    pub fn try_wait(&mut self) -> RunnerResult<Option<ExitStatus>> {
        self.child
            .try_wait()
            .map_err(|err| RunnerError::io(ErrorCode::Io, "failed to wait for child", err))
    }

    /// Wait for the child to exit.
    ///
    /// Returns `Some(ExitStatus)` if the process exits within `timeout`,
    /// or `None` if the timeout expires.
    ///
    /// # Errors
    /// - `E_IO`: failed to query the child status
    pub fn wait_for_exit(&mut self, timeout: Duration) -> RunnerResult<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// SIGTERM the whole process group, wait `grace`, then SIGKILL it.
    ///
    /// Returns the exit status if the child was reaped.
    ///
    /// # Errors
    /// - `E_IO`: signalling failed for a reason other than the group being
    ///   gone or owned by another user
    pub fn terminate_process_group(&mut self, grace: Duration) -> RunnerResult<Option<ExitStatus>> {
        if let Some(status) = self.try_wait()? {
            // Leader already reaped; stragglers in the group still get a SIGKILL.
            signal_process_group(self.pid, Signal::SIGKILL)?;
            return Ok(Some(status));
        }
        signal_process_group(self.pid, Signal::SIGTERM)?;
        if let Some(status) = self.wait_for_exit(grace)? {
            signal_process_group(self.pid, Signal::SIGKILL)?;
            return Ok(Some(status));
        }
        signal_process_group(self.pid, Signal::SIGKILL)?;
        let status = self.wait_for_exit(Duration::from_millis(200))?;
        if status.is_none() {
            warn!(pid = self.pid, "process group survived SIGKILL");
        }
        Ok(status)
    }

    /// Best-effort cleanup for a child that was never reaped. Used by Drop.
    fn cleanup_process_best_effort(&mut self) {
        if self.child.try_wait().ok().flatten().is_some() {
            return;
        }
        let _ = signal_process_group(self.pid, Signal::SIGTERM);
        let deadline = Instant::now() + Duration::from_millis(100);
        while Instant::now() < deadline {
            if self.child.try_wait().ok().flatten().is_some() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let _ = signal_process_group(self.pid, Signal::SIGKILL);
        let _ = self.child.wait();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cleanup_process_best_effort();
    }
}

fn attach_readers(
    child: &mut Child,
) -> RunnerResult<(Receiver<StreamMessage>, Receiver<StreamMessage>)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::internal("child stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::internal("child stderr was not piped"))?;
    Ok((
        spawn_reader(stdout, StreamKind::Stdout)?,
        spawn_reader(stderr, StreamKind::Stderr)?,
    ))
}

fn spawn_reader<R>(source: R, stream: StreamKind) -> RunnerResult<Receiver<StreamMessage>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("archexec-{stream}"))
        .spawn(move || read_lines(source, stream, &tx))
        .map_err(|err| RunnerError::io(ErrorCode::Spawn, "failed to start stream reader", err))?;
    Ok(rx)
}

fn read_lines<R: Read>(source: R, stream: StreamKind, tx: &Sender<StreamMessage>) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(StreamMessage::Line(decode_line(&buf))).is_err() {
                    // Supervisor dropped the session; nobody is listening.
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                debug!(%stream, error = %err, "stream read failed");
                break;
            }
        }
    }
    let _ = tx.send(StreamMessage::Closed);
}

/// Decode lossily and strip the line terminator.
fn decode_line(raw: &[u8]) -> String {
    let mut line = String::from_utf8_lossy(raw).into_owned();
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

fn signal_process_group(pid: u32, signal: Signal) -> RunnerResult<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| RunnerError::internal(format!("pid {pid} out of range")))?;
    match killpg(Pid::from_raw(raw), signal) {
        // ESRCH means the group is already gone, which is fine
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(Errno::EPERM) => {
            warn!(pid, ?signal, "not permitted to signal process group");
            Ok(())
        }
        Err(err) => Err(RunnerError::io(
            ErrorCode::Io,
            "failed to signal process group",
            err,
        )),
    }
}
