//! Supervision loop for a running session.

use std::process::ExitStatus;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::elevation::Redactor;
use crate::model::StreamKind;
use crate::runner::control::ExecutionControl;
use crate::runner::events::{ExecutionEvent, ExecutionObserver};
use crate::runner::RunnerResult;
use crate::session::{Session, StreamPoll};

/// Lines taken from one stream per pass before re-checking cancel/timeout.
const MAX_LINES_PER_PASS: usize = 512;

/// What ended supervision. The first one observed wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct Supervision {
    pub outcome: Outcome,
    /// Exit status of the child if it was reaped, also after termination.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

pub(crate) struct SuperviseOptions<'a> {
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub control: &'a ExecutionControl,
    pub redactor: &'a Redactor,
    pub observer: &'a dyn ExecutionObserver,
}

struct Capture<'a> {
    options: &'a SuperviseOptions<'a>,
    stdout: Vec<String>,
    stderr: Vec<String>,
    stdout_open: bool,
    stderr_open: bool,
}

impl<'a> Capture<'a> {
    fn new(options: &'a SuperviseOptions<'a>) -> Self {
        Self {
            options,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_open: true,
            stderr_open: true,
        }
    }

    fn streams_closed(&self) -> bool {
        !self.stdout_open && !self.stderr_open
    }

    /// Move every pending line from both streams; returns whether any arrived.
    fn drain(&mut self, session: &Session, limit: usize) -> bool {
        let stdout = self.drain_stream(session, StreamKind::Stdout, limit);
        let stderr = self.drain_stream(session, StreamKind::Stderr, limit);
        stdout || stderr
    }

    fn drain_stream(&mut self, session: &Session, stream: StreamKind, limit: usize) -> bool {
        let mut received = false;
        for _ in 0..limit {
            let open = match stream {
                StreamKind::Stdout => &mut self.stdout_open,
                StreamKind::Stderr => &mut self.stderr_open,
            };
            if !*open {
                break;
            }
            match session.poll_stream(stream) {
                StreamPoll::Line(line) => {
                    received = true;
                    self.record(stream, line);
                }
                StreamPoll::Closed => {
                    *open = false;
                    break;
                }
                StreamPoll::Pending => break,
            }
        }
        received
    }

    fn record(&mut self, stream: StreamKind, line: String) {
        let line = self.options.redactor.redact(line).trim_end().to_string();
        self.options.observer.on_event(&ExecutionEvent::Output {
            stream,
            line: line.clone(),
        });
        match stream {
            StreamKind::Stdout => self.stdout.push(line),
            StreamKind::Stderr => self.stderr.push(line),
        }
    }

    fn finish(self, outcome: Outcome, status: Option<ExitStatus>) -> Supervision {
        Supervision {
            outcome,
            status,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Drive `session` until it exits and both streams are closed, or until
/// cancellation or the timeout fires.
pub(crate) fn supervise(
    session: &mut Session,
    options: &SuperviseOptions<'_>,
) -> RunnerResult<Supervision> {
    let mut capture = Capture::new(options);
    loop {
        if options.control.cancel_requested() {
            debug!(pid = session.pid(), "cancellation requested");
            return terminate(session, capture, Outcome::Cancelled);
        }
        if options
            .timeout
            .is_some_and(|limit| session.elapsed() >= limit)
        {
            debug!(pid = session.pid(), "timeout reached");
            return terminate(session, capture, Outcome::TimedOut);
        }

        let received = capture.drain(session, MAX_LINES_PER_PASS);
        if capture.streams_closed() {
            if let Some(status) = session.try_wait()? {
                return Ok(capture.finish(Outcome::Exited(status), Some(status)));
            }
        }
        if !received {
            thread::sleep(options.poll_interval);
        }
    }
}

fn terminate(
    session: &mut Session,
    mut capture: Capture<'_>,
    outcome: Outcome,
) -> RunnerResult<Supervision> {
    let status = session.terminate_process_group(capture.options.grace_period)?;
    // Keep whatever the readers had already queued; they are not joined.
    capture.drain(session, usize::MAX);
    Ok(capture.finish(outcome, status))
}
