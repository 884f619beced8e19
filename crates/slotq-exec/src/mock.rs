//! Scripted execution adapter.
//!
//! Replays canned output and exit codes per payload so scheduling behavior can
//! be tested without spawning processes. Every start and finish is recorded,
//! along with the set of payloads running at each start.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::adapter::{
    CancelFlag, ExecError, ExecOutcome, ExecRequest, ExecResult, ExecStatus, ExecutionAdapter,
    LineControl, LineKind, ProgressSink,
};
use crate::executor::summary::parse_result_line;

const TICK: Duration = Duration::from_millis(5);

/// How a scripted run ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptExit {
    Success,
    Fail(i32),
    /// The process never starts.
    SpawnError(String),
    /// Runs until the cancel flag is set.
    UntilCancelled,
}

/// Canned behavior for one payload.
#[derive(Debug, Clone)]
pub struct Script {
    /// Lines emitted before the run time elapses.
    pub lines: Vec<String>,
    /// Time spent after emitting lines.
    pub run_time: Duration,
    pub exit: ScriptExit,
}

impl Script {
    pub fn success() -> Self {
        Self::with_exit(ScriptExit::Success)
    }

    pub fn fail(code: i32) -> Self {
        Self::with_exit(ScriptExit::Fail(code))
    }

    pub fn spawn_error(reason: impl Into<String>) -> Self {
        Self::with_exit(ScriptExit::SpawnError(reason.into()))
    }

    pub fn until_cancelled() -> Self {
        Self::with_exit(ScriptExit::UntilCancelled)
    }

    fn with_exit(exit: ScriptExit) -> Self {
        Self {
            lines: Vec::new(),
            run_time: Duration::ZERO,
            exit,
        }
    }

    pub fn lines(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn run_for(mut self, run_time: Duration) -> Self {
        self.run_time = run_time;
        self
    }
}

/// A recorded adapter event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    Started(String),
    Finished(String),
}

#[derive(Debug, Default)]
struct Recorder {
    events: Vec<ScriptEvent>,
    active: Vec<String>,
    /// Active payload keys captured at each start, including the new one.
    snapshots: Vec<Vec<String>>,
}

/// Adapter that replays [`Script`]s keyed by payload.
///
/// Lookup tries the whole payload joined by spaces, then the first element,
/// then falls back to the default script.
#[derive(Debug)]
pub struct ScriptedAdapter {
    scripts: HashMap<String, Script>,
    default_script: Script,
    recorder: Mutex<Recorder>,
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAdapter {
    /// Every payload succeeds immediately unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            default_script: Script::success(),
            recorder: Mutex::new(Recorder::default()),
        }
    }

    pub fn script(mut self, key: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(key.into(), script);
        self
    }

    pub fn default_script(mut self, script: Script) -> Self {
        self.default_script = script;
        self
    }

    /// Key the recorder uses for a payload.
    pub fn key_of(payload: &[String]) -> String {
        payload.join(" ")
    }

    fn lookup(&self, payload: &[String]) -> &Script {
        self.scripts
            .get(&Self::key_of(payload))
            .or_else(|| payload.first().and_then(|head| self.scripts.get(head)))
            .unwrap_or(&self.default_script)
    }

    pub fn events(&self) -> Vec<ScriptEvent> {
        self.recorder().events.clone()
    }

    /// Payload keys in the order they started.
    pub fn started(&self) -> Vec<String> {
        self.recorder()
            .events
            .iter()
            .filter_map(|e| match e {
                ScriptEvent::Started(key) => Some(key.clone()),
                ScriptEvent::Finished(_) => None,
            })
            .collect()
    }

    /// Sets of concurrently running payloads, one per start.
    pub fn snapshots(&self) -> Vec<Vec<String>> {
        self.recorder().snapshots.clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.recorder()
            .snapshots
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    fn recorder(&self) -> std::sync::MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start(&self, key: &str) {
        let mut recorder = self.recorder();
        recorder.active.push(key.to_string());
        let snapshot = recorder.active.clone();
        recorder.snapshots.push(snapshot);
        recorder.events.push(ScriptEvent::Started(key.to_string()));
    }

    fn finish(&self, key: &str) {
        let mut recorder = self.recorder();
        if let Some(pos) = recorder.active.iter().position(|k| k == key) {
            recorder.active.remove(pos);
        }
        recorder.events.push(ScriptEvent::Finished(key.to_string()));
    }
}

impl ExecutionAdapter for ScriptedAdapter {
    fn execute(
        &self,
        request: &ExecRequest,
        sink: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> ExecResult<ExecOutcome> {
        let started = Instant::now();
        let key = Self::key_of(&request.payload);
        let script = self.lookup(&request.payload).clone();

        if let ScriptExit::SpawnError(reason) = &script.exit {
            return Err(ExecError::SpawnFailed {
                program: request.payload.first().cloned().unwrap_or_default(),
                reason: reason.clone(),
            });
        }

        self.start(&key);

        let mut last_line = None;
        let mut summary = None;
        let mut cancelled = cancel.load(Ordering::SeqCst);

        for line in &script.lines {
            if cancelled {
                break;
            }
            let kind = LineKind::of(line);
            if kind == LineKind::Normal && summary.is_none() {
                summary = parse_result_line(line);
            }
            last_line = Some(line.clone());
            if sink.on_line(line, kind) == LineControl::Abort {
                cancelled = true;
            }
        }

        let deadline = started + script.run_time;
        while !cancelled {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            if script.exit != ScriptExit::UntilCancelled && Instant::now() >= deadline {
                break;
            }
            thread::sleep(TICK);
        }

        self.finish(&key);

        let status = if cancelled {
            ExecStatus::Cancelled
        } else {
            match script.exit {
                ScriptExit::Fail(code) => ExecStatus::Failed {
                    code: Some(code),
                    signal: None,
                },
                _ => ExecStatus::Success,
            }
        };

        Ok(ExecOutcome {
            status,
            last_line,
            summary,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
