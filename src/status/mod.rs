//! Plain-text status rendering
//!
//! The queue renders one line per job, `[index] (state) command line`, with
//! the state message indented underneath. During `run`, each worker's current
//! job and latest output line follow the queue.

use std::io::{self, Write};
use std::sync::Mutex;

use crate::job::Job;

/// What one worker is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEntry {
    pub job_id: String,
    pub command_line: String,
    /// Latest output line, progress or otherwise
    pub last_line: Option<String>,
}

/// Per-worker status slots, written by workers and read by the reporter.
#[derive(Debug)]
pub struct StatusBoard {
    entries: Mutex<Vec<Option<WorkerEntry>>>,
}

impl StatusBoard {
    pub fn new(workers: usize) -> Self {
        Self {
            entries: Mutex::new(vec![None; workers]),
        }
    }

    pub fn start(&self, slot: usize, job_id: &str, command_line: String) {
        self.with_slot(slot, |entry| {
            *entry = Some(WorkerEntry {
                job_id: job_id.to_string(),
                command_line,
                last_line: None,
            })
        });
    }

    pub fn update(&self, slot: usize, line: &str) {
        self.with_slot(slot, |entry| {
            if let Some(entry) = entry {
                entry.last_line = Some(line.to_string());
            }
        });
    }

    pub fn clear(&self, slot: usize) {
        self.with_slot(slot, |entry| *entry = None);
    }

    pub fn snapshot(&self) -> Vec<Option<WorkerEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn with_slot(&self, slot: usize, f: impl FnOnce(&mut Option<WorkerEntry>)) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(slot) {
            f(entry);
        }
    }
}

/// Everything a reporter draws.
#[derive(Debug, Clone)]
pub struct StatusView {
    pub jobs: Vec<Job>,
    pub workers: Vec<Option<WorkerEntry>>,
    pub available: i64,
    pub running: u32,
    pub max_slots: u32,
}

/// Renders status views.
pub trait StatusReporter: Send {
    fn render(&mut self, view: &StatusView) -> io::Result<()>;
}

/// `[index] (state) command line`
pub fn format_job_line(index: usize, job: &Job) -> String {
    format!("[{}] ({}) {}", index, job.state, job.command_line())
}

/// Write the queue listing.
pub fn write_queue<W: Write>(out: &mut W, jobs: &[Job]) -> io::Result<()> {
    for (index, job) in jobs.iter().enumerate() {
        writeln!(out, "{}", format_job_line(index, job))?;
        if let Some(message) = &job.state_message {
            writeln!(out, "    {}", message)?;
        }
    }
    Ok(())
}

/// Renders to any writer, skipping frames identical to the last one.
pub struct PlainReporter<W: Write + Send> {
    out: W,
    last_frame: Option<String>,
}

impl<W: Write + Send> PlainReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_frame: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn frame(view: &StatusView) -> io::Result<String> {
        let mut buf = Vec::new();
        write_queue(&mut buf, &view.jobs)?;
        writeln!(
            buf,
            "Slots: {}/{} free, {} running",
            view.available.max(0),
            view.max_slots,
            view.running
        )?;
        for (slot, entry) in view.workers.iter().enumerate() {
            match entry {
                Some(entry) => {
                    writeln!(buf, "Worker {}: {}", slot, entry.command_line)?;
                    if let Some(line) = &entry.last_line {
                        writeln!(buf, "    {}", line)?;
                    }
                }
                None => writeln!(buf, "Worker {}: idle", slot)?,
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl<W: Write + Send> StatusReporter for PlainReporter<W> {
    fn render(&mut self, view: &StatusView) -> io::Result<()> {
        let frame = Self::frame(view)?;
        if self.last_frame.as_deref() == Some(frame.as_str()) {
            return Ok(());
        }
        self.out.write_all(frame.as_bytes())?;
        writeln!(self.out)?;
        self.out.flush()?;
        self.last_frame = Some(frame);
        Ok(())
    }
}
