//! External process adapter.
//!
//! Runs `program + args + payload` (or `payload[0] + payload[1..]` when no
//! program is configured) in the job's working directory:
//! - stdout and stderr are merged into one line stream
//! - lines are split on both `\n` and `\r`, since encoders redraw progress
//!   in place with carriage returns
//! - cancellation sends SIGTERM, then kills after the grace period

pub mod summary;

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::adapter::{
    CancelFlag, ExecError, ExecOutcome, ExecRequest, ExecResult, ExecStatus, ExecutionAdapter,
    LineControl, LineKind, ProgressSink,
};
use summary::{parse_result_line, ResultSummary};

/// How often the cancel flag and child status are polled.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for [`ProcessAdapter`].
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Program to run. When unset, the first payload element is the program.
    pub program: Option<String>,
    /// Arguments placed between the program and the payload.
    pub args: Vec<String>,
    /// Grace period in seconds for SIGTERM before SIGKILL.
    pub termination_grace_seconds: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            termination_grace_seconds: 10,
        }
    }
}

/// Runs each job as an external process.
#[derive(Debug, Clone, Default)]
pub struct ProcessAdapter {
    config: ProcessConfig,
}

impl ProcessAdapter {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    /// Resolve the program and argument list for a payload.
    pub fn command_line(&self, payload: &[String]) -> ExecResult<(String, Vec<String>)> {
        match &self.config.program {
            Some(program) => {
                let mut args = self.config.args.clone();
                args.extend_from_slice(payload);
                Ok((program.clone(), args))
            }
            None => {
                let (program, rest) = payload.split_first().ok_or(ExecError::EmptyCommand)?;
                let mut args = self.config.args.clone();
                args.extend_from_slice(rest);
                Ok((program.clone(), args))
            }
        }
    }

    /// Terminate a child process gracefully then forcefully.
    fn terminate_child(&self, child: &mut Child) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            let _ = signal::kill(pid, Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }

        let grace = Duration::from_secs(self.config.termination_grace_seconds);
        let start = Instant::now();
        while start.elapsed() < grace {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        tracing::warn!(pid = child.id(), "process ignored SIGTERM, killing");
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

impl ExecutionAdapter for ProcessAdapter {
    fn execute(
        &self,
        request: &ExecRequest,
        sink: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> ExecResult<ExecOutcome> {
        let start = Instant::now();
        let (program, args) = self.command_line(&request.payload)?;

        if !request.working_dir.is_dir() {
            return Err(ExecError::MissingWorkingDir(request.working_dir.clone()));
        }

        let mut stream = OutputState::default();

        if cancel.load(Ordering::SeqCst) {
            return Ok(stream.finish(ExecStatus::Cancelled, start));
        }

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::SpawnFailed {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(job_id = %request.job_id, pid = child.id(), %program, "process started");

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, tx.clone())?;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, tx.clone())?;
        }
        drop(tx);

        let mut streams_open = true;
        let exit = loop {
            if stream.aborted || cancel.load(Ordering::SeqCst) {
                tracing::debug!(job_id = %request.job_id, "terminating process");
                self.terminate_child(&mut child)?;
                return Ok(stream.finish(ExecStatus::Cancelled, start));
            }

            if streams_open {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => {
                        stream.push(line, sink);
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => streams_open = false,
                }
            } else {
                thread::sleep(POLL_INTERVAL);
            }

            if let Some(status) = child.try_wait()? {
                break status;
            }
        };

        let status = if exit.success() {
            ExecStatus::Success
        } else {
            ExecStatus::Failed {
                code: exit.code(),
                signal: signal_name(&exit),
            }
        };
        tracing::debug!(job_id = %request.job_id, ?status, "process exited");

        Ok(stream.finish(status, start))
    }
}

/// Accumulated view of the output stream.
#[derive(Default)]
struct OutputState {
    last_line: Option<String>,
    summary: Option<ResultSummary>,
    aborted: bool,
}

impl OutputState {
    fn push(&mut self, line: String, sink: &mut dyn ProgressSink) {
        let kind = LineKind::of(&line);
        if kind == LineKind::Normal && self.summary.is_none() {
            self.summary = parse_result_line(&line);
        }
        if sink.on_line(&line, kind) == LineControl::Abort {
            self.aborted = true;
        }
        self.last_line = Some(line);
    }

    fn finish(self, status: ExecStatus, start: Instant) -> ExecOutcome {
        ExecOutcome {
            status,
            last_line: self.last_line,
            summary: self.summary,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Forward non-empty lines from `reader` until EOF or the receiver hangs up.
fn spawn_line_reader<R>(reader: R, tx: Sender<String>) -> io::Result<()>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("slotq-output".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut pending = Vec::new();
            loop {
                let chunk = match reader.fill_buf() {
                    Ok([]) => break,
                    Ok(chunk) => chunk,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                };
                let len = chunk.len();
                for &byte in chunk {
                    if byte == b'\n' || byte == b'\r' {
                        if !send_line(&mut pending, &tx) {
                            return;
                        }
                    } else {
                        pending.push(byte);
                    }
                }
                reader.consume(len);
            }
            send_line(&mut pending, &tx);
        })?;
    Ok(())
}

/// Send the buffered line, if any. Returns false once the receiver is gone.
fn send_line(pending: &mut Vec<u8>, tx: &Sender<String>) -> bool {
    let line = String::from_utf8_lossy(pending).trim_end().to_string();
    pending.clear();
    if line.is_empty() {
        return true;
    }
    tx.send(line).is_ok()
}

fn signal_name(status: &ExitStatus) -> Option<String> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|s| {
            nix::sys::signal::Signal::try_from(s)
                .map(|sig| sig.as_str().to_string())
                .unwrap_or_else(|_| format!("SIG{}", s))
        })
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}
