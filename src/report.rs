//! Structured event reporting.
//!
//! Events are plaintext lines built for grep-based assertions: a leading
//! `event=<CODE>` field followed by `key=value` pairs. Per-repository header
//! lines (`-- identity (path) --`) can be toggled, and the reporter keeps
//! aggregate counters and operation durations for the trailing `Summary:`
//! lines. All emission funnels through one mutex so concurrent workers never
//! interleave partial lines.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use indexmap::IndexMap;

/// Event codes are a small closed set; executors reference these constants
/// rather than ad-hoc strings.
pub mod codes {
    pub const PROTOCOL_UPDATE: &str = "PROTOCOL_UPDATE";
    pub const PROTOCOL_SKIP: &str = "PROTOCOL_SKIP";
    pub const PROTOCOL_PLAN: &str = "PROTOCOL_PLAN";
    pub const REMOTE_UPDATE: &str = "REMOTE_UPDATE";
    pub const REMOTE_SKIP: &str = "REMOTE_SKIP";
    pub const REMOTE_PLAN: &str = "REMOTE_PLAN";
    pub const REPO_FOLDER_RENAME: &str = "REPO_FOLDER_RENAME";
    pub const REPO_FOLDER_SKIP: &str = "REPO_FOLDER_SKIP";
    pub const REPO_FOLDER_PLAN: &str = "REPO_FOLDER_PLAN";
    pub const WORKFLOW_DEFAULT: &str = "WORKFLOW-DEFAULT";
    pub const WORKFLOW_PLAN: &str = "WORKFLOW-PLAN";
    pub const HISTORY_PURGE: &str = "HISTORY-PURGE";
    pub const HISTORY_SKIP: &str = "HISTORY-SKIP";
    pub const HISTORY_PLAN: &str = "HISTORY-PLAN";
    pub const RELEASE_TAG: &str = "RELEASE_TAG";
    pub const RELEASE_SKIP: &str = "RELEASE_SKIP";
    pub const RELEASE_PLAN: &str = "RELEASE_PLAN";
    pub const AUDIT_ROW: &str = "AUDIT_ROW";
    pub const TASK_SKIP: &str = "TASK_SKIP";
    pub const TASK_FAIL: &str = "TASK_FAIL";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// One structured event.
#[derive(Debug, Clone)]
pub struct Event {
    pub level: Level,
    pub code: &'static str,
    pub repo_id: Option<String>,
    pub repo_path: Option<PathBuf>,
    pub message: Option<String>,
    pub details: IndexMap<String, String>,
}

impl Event {
    pub fn new(level: Level, code: &'static str) -> Self {
        Self {
            level,
            code,
            repo_id: None,
            repo_path: None,
            message: None,
            details: IndexMap::new(),
        }
    }

    pub fn info(code: &'static str) -> Self {
        Self::new(Level::Info, code)
    }

    pub fn warn(code: &'static str) -> Self {
        Self::new(Level::Warn, code)
    }

    pub fn error(code: &'static str) -> Self {
        Self::new(Level::Error, code)
    }

    pub fn repo(mut self, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.repo_id = Some(id.into());
        self.repo_path = Some(path.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Render the machine-readable line: `event=<CODE> key=value ...`.
    fn render(&self) -> String {
        let mut line = format!("event={} level={}", self.code, self.level);
        if let Some(id) = &self.repo_id {
            line.push_str(&format!(" repo={}", quote(id)));
        }
        if let Some(path) = &self.repo_path {
            line.push_str(&format!(" path={}", quote(&path.display().to_string())));
        }
        if let Some(message) = &self.message {
            line.push_str(&format!(" message={}", quote(message)));
        }
        for (key, value) in &self.details {
            line.push_str(&format!(" {key}={}", quote(value)));
        }
        line
    }
}

/// Quote a value when it contains whitespace or quotes.
fn quote(value: &str) -> String {
    if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[derive(Default)]
struct ReporterState {
    counts: BTreeMap<(String, Level), u64>,
    durations: BTreeMap<String, Duration>,
    last_header: Option<String>,
}

/// Options controlling reporter output.
#[derive(Debug, Clone)]
pub struct ReporterOptions {
    /// Emit `-- <identity> (<path>) --` lines when the repository changes.
    pub repo_headers: bool,
}

impl Default for ReporterOptions {
    fn default() -> Self {
        Self { repo_headers: true }
    }
}

/// Thread-safe event sink. One instance per invocation; pass it down
/// explicitly (no globals).
pub struct Reporter {
    out: Mutex<Box<dyn Write + Send>>,
    state: Mutex<ReporterState>,
    options: ReporterOptions,
}

impl Reporter {
    pub fn new(out: Box<dyn Write + Send>, options: ReporterOptions) -> Self {
        Self {
            out: Mutex::new(out),
            state: Mutex::new(ReporterState::default()),
            options,
        }
    }

    pub fn stderr(options: ReporterOptions) -> Self {
        Self::new(Box::new(std::io::stderr()), options)
    }

    /// Emit one event line, preceded by a repository header when the
    /// repository identity changed since the last emission.
    pub fn report(&self, event: &Event) {
        let header = match (&event.repo_id, &event.repo_path) {
            (Some(id), Some(path)) if self.options.repo_headers => {
                Some(format!("-- {id} ({}) --", path.display()))
            }
            _ => None,
        };

        self.record_event(event.code, event.level);

        let line = event.render();
        let mut state = self.state.lock().unwrap();
        let emit_header = match &header {
            Some(h) => state.last_header.as_deref() != Some(h.as_str()),
            None => false,
        };
        if let Some(h) = header {
            state.last_header = Some(h);
        }
        // Hold the state lock across the write so header + line stay adjacent
        let mut out = self.out.lock().unwrap();
        if emit_header {
            let _ = writeln!(out, "{}", state.last_header.as_deref().unwrap_or_default());
        }
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }

    /// Bump the aggregate counter for a code/level pair.
    pub fn record_event(&self, code: &str, level: Level) {
        let mut state = self.state.lock().unwrap();
        *state.counts.entry((code.to_string(), level)).or_insert(0) += 1;
    }

    /// Accumulate wall-clock time spent in an operation.
    pub fn record_operation_duration(&self, operation: &str, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        *state
            .durations
            .entry(operation.to_string())
            .or_insert(Duration::ZERO) += duration;
    }

    /// Emit the trailing summary lines.
    pub fn emit_summary(&self) {
        let state = self.state.lock().unwrap();
        let mut out = self.out.lock().unwrap();

        let total: u64 = state.counts.values().sum();
        let warnings: u64 = state
            .counts
            .iter()
            .filter(|((_, level), _)| *level == Level::Warn)
            .map(|(_, n)| n)
            .sum();
        let errors: u64 = state
            .counts
            .iter()
            .filter(|((_, level), _)| *level == Level::Error)
            .map(|(_, n)| n)
            .sum();
        let _ = writeln!(out, "Summary: events={total} warnings={warnings} errors={errors}");
        for ((code, level), count) in &state.counts {
            let _ = writeln!(out, "Summary: code={code} level={level} count={count}");
        }
        for (operation, duration) in &state.durations {
            let _ = writeln!(
                out,
                "Summary: operation={} duration_ms={}",
                quote(operation),
                duration.as_millis()
            );
        }
        let _ = out.flush();
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::buffered;
    use super::*;

    #[test]
    fn event_lines_lead_with_the_code() {
        let (reporter, buffer) = buffered(ReporterOptions { repo_headers: false });
        reporter.report(
            &Event::info(codes::PROTOCOL_UPDATE)
                .repo("acme/widgets", "/repos/widgets")
                .detail("from", "git")
                .detail("to", "https"),
        );
        let output = buffer.contents();
        assert!(
            output.contains("event=PROTOCOL_UPDATE level=info repo=acme/widgets path=/repos/widgets from=git to=https"),
            "unexpected output: {output}"
        );
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        let (reporter, buffer) = buffered(ReporterOptions { repo_headers: false });
        reporter.report(
            &Event::warn(codes::TASK_SKIP).message("worktree is dirty: 2 entries"),
        );
        assert!(
            buffer
                .contents()
                .contains("message=\"worktree is dirty: 2 entries\"")
        );
    }

    #[test]
    fn repo_headers_emitted_once_per_repo() {
        let (reporter, buffer) = buffered(ReporterOptions::default());
        let first = Event::info(codes::REMOTE_UPDATE).repo("acme/a", "/r/a");
        let second = Event::info(codes::REMOTE_SKIP).repo("acme/a", "/r/a");
        let third = Event::info(codes::REMOTE_UPDATE).repo("acme/b", "/r/b");
        reporter.report(&first);
        reporter.report(&second);
        reporter.report(&third);

        let output = buffer.contents();
        assert_eq!(output.matches("-- acme/a (/r/a) --").count(), 1);
        assert_eq!(output.matches("-- acme/b (/r/b) --").count(), 1);
    }

    #[test]
    fn summary_aggregates_counts_and_durations() {
        let (reporter, buffer) = buffered(ReporterOptions { repo_headers: false });
        reporter.report(&Event::info(codes::PROTOCOL_UPDATE));
        reporter.report(&Event::warn(codes::TASK_SKIP));
        reporter.record_event(codes::TASK_SKIP, Level::Warn);
        reporter.record_operation_duration("repo.protocol.convert", Duration::from_millis(12));
        reporter.emit_summary();

        let output = buffer.contents();
        assert!(output.contains("Summary: events=3 warnings=2 errors=0"));
        assert!(output.contains("Summary: code=TASK_SKIP level=warn count=2"));
        assert!(output.contains("Summary: operation=repo.protocol.convert duration_ms=12"));
    }
}
