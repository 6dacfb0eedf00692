//! Blocking invocation of external converter tools with a bounded wait

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::error::{CodecError, CodecResult};

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured output of a finished tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// An external executable plus the wait budget for each call
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: PathBuf,
    timeout: Duration,
}

impl ExternalTool {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn failure(&self, subject: &Path, reason: impl Into<String>) -> CodecError {
        CodecError::ToolInvocation {
            tool: self.name(),
            path: subject.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Run the tool to completion.
    ///
    /// `subject` is the file being converted, used for error context. A spawn
    /// failure, a non-zero exit or running past the timeout is a
    /// [`CodecError::ToolInvocation`]; a timed-out child is killed. Output
    /// pipes left open past the timeout (by a process the tool started) are
    /// abandoned rather than waited on.
    pub fn run<I, S>(&self, args: I, subject: &Path) -> CodecResult<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("Running {:?}", command);

        let mut child = command.spawn().map_err(|e| {
            self.failure(subject, format!("could not start {}: {}", self.program.display(), e))
        })?;
        let deadline = Instant::now() + self.timeout;

        // Drain pipes on their own threads so a chatty child can't block on a full pipe
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = self.wait_bounded(&mut child, deadline, subject)?;

        let (Some(stdout), Some(stderr)) = (
            collect_reader(stdout, deadline),
            collect_reader(stderr, deadline),
        ) else {
            warn!(
                "{} exited but its output stayed open past {:?} on {}",
                self.name(),
                self.timeout,
                subject.display()
            );
            return Err(self.failure(
                subject,
                format!("output still open {:?} after start", self.timeout),
            ));
        };
        let output = ToolOutput { stdout, stderr };

        if !status.success() {
            let detail = output.stderr.trim();
            let reason = match status.code() {
                Some(code) if detail.is_empty() => format!("exited with code {}", code),
                Some(code) => format!("exited with code {}: {}", code, detail),
                None => "terminated by signal".to_string(),
            };
            return Err(self.failure(subject, reason));
        }

        Ok(output)
    }

    fn wait_bounded(
        &self,
        child: &mut Child,
        deadline: Instant,
        subject: &Path,
    ) -> CodecResult<ExitStatus> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        "{} exceeded {:?} on {}, killing it",
                        self.name(),
                        self.timeout,
                        subject.display()
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    let reason = format!("timed out after {:?}", self.timeout);
                    return Err(self.failure(subject, reason));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(self.failure(subject, format!("wait failed: {}", e))),
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Everything a reader captured, or `None` if its pipe is still open at `deadline`.
///
/// A pipe that was never opened reads as empty.
fn collect_reader(reader: Option<Receiver<String>>, deadline: Instant) -> Option<String> {
    match reader {
        Some(rx) => rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .ok(),
        None => Some(String::new()),
    }
}
