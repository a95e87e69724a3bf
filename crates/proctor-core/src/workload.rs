//! Workload files and the engine that executes them.
//!
//! A workload is a TOML list of test commands. Each test is a child process
//! whose exit code is compared against an expected value, the same way a
//! check command is judged.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proctor_wire::{AgentCommand, CommandReply};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::transport::CommandHandler;

/// Errors loading a workload file.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("failed to read workload {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("workload must contain at least one test")]
    NoTests,

    #[error("test #{0} has an empty name")]
    EmptyName(usize),

    #[error("test {0:?} has an empty command")]
    EmptyCommand(String),

    #[error("duplicate test name: {0:?}")]
    DuplicateTestName(String),
}

// -----------------------------------------------------------------------
// File format
// -----------------------------------------------------------------------

/// Top-level structure of a workload file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    /// Human-readable workload name.
    pub name: String,
    /// Tests in execution order.
    #[serde(rename = "test", default)]
    pub tests: Vec<WorkloadTest>,
}

/// A single `[[test]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadTest {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub expected_exit_code: i32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Workload {
    /// Parse and validate workload TOML.
    pub fn parse(content: &str) -> Result<Self, WorkloadError> {
        let workload: Workload = toml::from_str(content)?;
        workload.validate()?;
        Ok(workload)
    }

    /// Read, parse, and validate the workload file at `path`.
    pub fn load(path: &Path) -> Result<Self, WorkloadError> {
        let content = std::fs::read_to_string(path).map_err(|source| WorkloadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<(), WorkloadError> {
        if self.tests.is_empty() {
            return Err(WorkloadError::NoTests);
        }
        let mut seen = HashSet::new();
        for (index, test) in self.tests.iter().enumerate() {
            if test.name.trim().is_empty() {
                return Err(WorkloadError::EmptyName(index + 1));
            }
            if test.command.trim().is_empty() {
                return Err(WorkloadError::EmptyCommand(test.name.clone()));
            }
            if !seen.insert(test.name.as_str()) {
                return Err(WorkloadError::DuplicateTestName(test.name.clone()));
            }
        }
        Ok(())
    }
}

/// Directory that relative paths in the workload at `path` resolve against.
pub fn workload_base_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

// -----------------------------------------------------------------------
// Results
// -----------------------------------------------------------------------

/// The result of executing one test.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    pub passed: bool,
    /// `None` when the process was killed by a signal, timed out, or never
    /// started.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

/// The result of executing a whole workload.
#[derive(Debug, Clone)]
pub struct WorkloadReport {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<TestOutcome>,
}

impl WorkloadReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    /// One-line result, e.g. `smoke: 2 passed, 1 failed (3 total)`.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} passed, {} failed ({} total)",
            self.name,
            self.passed(),
            self.failed(),
            self.outcomes.len()
        )
    }
}

// -----------------------------------------------------------------------
// Execution
// -----------------------------------------------------------------------

/// Run every test of `workload` in order with `base_dir` as the working
/// directory.
///
/// A test that cannot be spawned counts as failed; it does not abort the
/// rest of the workload.
pub async fn run_workload(workload: &Workload, base_dir: &Path) -> WorkloadReport {
    let started_at = Utc::now();
    let mut outcomes = Vec::with_capacity(workload.tests.len());

    for test in &workload.tests {
        let outcome = match run_test(test, base_dir).await {
            Ok(outcome) => outcome,
            Err(e) => TestOutcome::not_started(test, &e),
        };
        tracing::info!(
            workload = %workload.name,
            test = %outcome.name,
            passed = outcome.passed,
            exit_code = ?outcome.exit_code,
            duration_ms = outcome.duration_ms,
            "test finished"
        );
        outcomes.push(outcome);
    }

    WorkloadReport {
        name: workload.name.clone(),
        started_at,
        outcomes,
    }
}

/// Commands containing a path separator resolve against `base_dir`; bare
/// names are looked up on `PATH`.
fn resolve_command(command: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(command);
    if path.is_relative() && path.components().count() > 1 {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// How long to keep reading a test's pipes once the test itself is gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

async fn run_test(test: &WorkloadTest, base_dir: &Path) -> Result<TestOutcome> {
    let started = Instant::now();
    let mut child = spawn_test(test, base_dir)?;
    let capture = OutputCapture::start(&mut child);

    let deadline = Duration::from_secs(test.timeout_secs.max(1));
    let status = match tokio::time::timeout(deadline, child.wait()).await {
        Ok(status) => {
            Some(status.with_context(|| format!("failed to wait on test {:?}", test.name))?)
        }
        Err(_) => {
            child.kill().await.ok();
            None
        }
    };
    let output = capture.finish(OUTPUT_GRACE).await;
    let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    Ok(match status {
        Some(status) => TestOutcome::finished(test, status.code(), output, duration_ms),
        None => TestOutcome::timed_out(test, output, duration_ms),
    })
}

fn spawn_test(test: &WorkloadTest, base_dir: &Path) -> Result<Child> {
    Command::new(resolve_command(&test.command, base_dir))
        .args(&test.args)
        .current_dir(base_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| {
            format!(
                "failed to execute test {:?} (command: {} {})",
                test.name,
                test.command,
                test.args.join(" "),
            )
        })
}

impl TestOutcome {
    fn finished(
        test: &WorkloadTest,
        exit_code: Option<i32>,
        output: CapturedOutput,
        duration_ms: i64,
    ) -> Self {
        Self {
            name: test.name.clone(),
            passed: exit_code == Some(test.expected_exit_code),
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms,
        }
    }

    /// Keeps whatever the test wrote before it was killed.
    fn timed_out(test: &WorkloadTest, output: CapturedOutput, duration_ms: i64) -> Self {
        let mut stderr = output.stderr;
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "test {:?} timed out after {}s",
            test.name, test.timeout_secs
        ));
        Self {
            name: test.name.clone(),
            passed: false,
            exit_code: None,
            stdout: output.stdout,
            stderr,
            duration_ms,
        }
    }

    fn not_started(test: &WorkloadTest, error: &anyhow::Error) -> Self {
        Self {
            name: test.name.clone(),
            passed: false,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("{error:#}"),
            duration_ms: 0,
        }
    }
}

/// Text a test wrote to its stdout and stderr.
#[derive(Debug, Default)]
struct CapturedOutput {
    stdout: String,
    stderr: String,
}

/// Both pipes of a running test, drained on their own tasks so the test
/// never stalls on a full pipe.
struct OutputCapture {
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
}

impl OutputCapture {
    fn start(child: &mut Child) -> Self {
        Self {
            stdout: tokio::spawn(read_lossy(child.stdout.take())),
            stderr: tokio::spawn(read_lossy(child.stderr.take())),
        }
    }

    /// Collect both streams. A pipe some grandchild still holds open after
    /// `grace` yields nothing.
    async fn finish(self, grace: Duration) -> CapturedOutput {
        CapturedOutput {
            stdout: collect(self.stdout, grace).await,
            stderr: collect(self.stderr, grace).await,
        }
    }
}

async fn read_lossy<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await.ok();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(mut reader: JoinHandle<String>, grace: Duration) -> String {
    match tokio::time::timeout(grace, &mut reader).await {
        Ok(text) => text.unwrap_or_default(),
        Err(_) => {
            reader.abort();
            String::new()
        }
    }
}

// -----------------------------------------------------------------------
// Engine
// -----------------------------------------------------------------------

/// Default [`CommandHandler`]: runs workload files on request.
#[derive(Debug, Clone)]
pub struct WorkloadEngine {
    /// Relative workload paths in `run` commands resolve against this.
    work_directory: PathBuf,
}

impl WorkloadEngine {
    pub fn new(work_directory: impl Into<PathBuf>) -> Self {
        let work_directory = work_directory.into();
        let work_directory = if work_directory.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            work_directory
        };
        Self { work_directory }
    }

    async fn run(&self, workload: &Path) -> CommandReply {
        let path = if workload.is_relative() {
            self.work_directory.join(workload)
        } else {
            workload.to_path_buf()
        };
        match Workload::load(&path) {
            Ok(loaded) => {
                let report = run_workload(&loaded, &workload_base_dir(&path)).await;
                CommandReply::Completed {
                    summary: report.summary(),
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot load workload");
                CommandReply::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl CommandHandler for WorkloadEngine {
    async fn handle(&self, command: AgentCommand) -> CommandReply {
        match command {
            AgentCommand::Ping => CommandReply::Pong,
            AgentCommand::Run { workload } => self.run(&workload).await,
            AgentCommand::Stop => CommandReply::Stopping,
        }
    }
}
