//! Per-camera status lines.
//!
//! Every capture worker reports directly through a shared `StatusMonitor`;
//! the monitor serialises those calls behind one mutex and hands finished
//! lines to a `StatusRender`.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use crate::registry::SourceInfo;

/// Width of the camera column, dot-padded.
const LABEL_WIDTH: usize = 20;
/// Width of the message column, space-padded so shorter text overwrites longer.
const MESSAGE_WIDTH: usize = 45;

pub trait StatusRender: Send {
    /// Called once with the number of rows before any `render`.
    fn init(&mut self, rows: usize);
    fn render(&mut self, row: usize, line: &str);
}

/// Fixed-position terminal output: one row per camera.
pub struct AnsiRender<W: Write + Send> {
    out: W,
    left: usize,
    top: usize,
    rows: usize,
}

impl AnsiRender<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), 1, 1)
    }
}

impl<W: Write + Send> AnsiRender<W> {
    pub fn new(out: W, left: usize, top: usize) -> Self {
        Self {
            out,
            left,
            top,
            rows: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_row(&mut self, row: usize, line: &str) -> io::Result<()> {
        write!(self.out, "\x1b[{};{}f{}", self.top + row, self.left, line)?;
        // Park the cursor below the status block.
        write!(self.out, "\x1b[{};{}f", self.top + self.rows + 1, self.left)?;
        self.out.flush()
    }
}

impl<W: Write + Send> StatusRender for AnsiRender<W> {
    fn init(&mut self, rows: usize) {
        self.rows = rows;
        if let Err(e) = write!(self.out, "\x1b[2J").and_then(|_| self.out.flush()) {
            log::debug!("status monitor: clear screen failed: {}", e);
        }
    }

    fn render(&mut self, row: usize, line: &str) {
        if let Err(e) = self.write_row(row, line) {
            log::debug!("status monitor: write failed: {}", e);
        }
    }
}

/// Status lines as log records, for non-interactive runs.
#[derive(Debug, Default)]
pub struct LogRender;

impl StatusRender for LogRender {
    fn init(&mut self, _rows: usize) {}

    fn render(&mut self, _row: usize, line: &str) {
        log::info!("{}", line.trim_end());
    }
}

struct MonitorState {
    labels: Vec<String>,
    render: Box<dyn StatusRender>,
}

pub struct StatusMonitor {
    state: Option<Mutex<MonitorState>>,
}

impl StatusMonitor {
    pub fn new(render: Box<dyn StatusRender>) -> Self {
        Self {
            state: Some(Mutex::new(MonitorState {
                labels: Vec::new(),
                render,
            })),
        }
    }

    /// A monitor whose calls are no-ops.
    pub fn disabled() -> Self {
        Self { state: None }
    }

    /// Terminal rendering on a tty, log records otherwise.
    pub fn for_terminal(enabled: bool) -> Self {
        use std::io::IsTerminal;
        if !enabled {
            return Self::disabled();
        }
        if io::stdout().is_terminal() {
            Self::new(Box::new(AnsiRender::stdout()))
        } else {
            Self::new(Box::new(LogRender))
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    pub fn initialize(&self, sources: &[SourceInfo]) {
        let Some(state) = &self.state else {
            return;
        };
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.labels = sources.iter().map(|s| s.to_string()).collect();
        state.render.init(sources.len());
    }

    pub fn report(&self, source_id: usize, text: &str) {
        let Some(state) = &self.state else {
            return;
        };
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(label) = state.labels.get(source_id) else {
            log::debug!("status for unknown source {}: {}", source_id, text);
            return;
        };
        let line = format_line(label, text);
        state.render.render(source_id, &line);
    }
}

pub fn format_line(label: &str, text: &str) -> String {
    format!(
        "{:.<lw$}: {:<mw$}",
        label,
        text,
        lw = LABEL_WIDTH,
        mw = MESSAGE_WIDTH
    )
}
