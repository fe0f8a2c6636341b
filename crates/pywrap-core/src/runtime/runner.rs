//! Parent side of the execution protocol.
//!
//! One child per run. Console output is streamed as it arrives; the
//! side-channel result is read only after the child has exited.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::config::ExecutionConfig;
use crate::errors::{PywrapError, PywrapResult};
use crate::models::ResultKind;
use crate::planner::LaunchSpec;
use crate::runtime::protocol::{
    ErrorInfo, ResultEnvelope, ResultLimits, RunState, REQUEST_PATH_ENV, RESULT_PATH_ENV,
    UNBUFFERED_ENV,
};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_CHUNK: usize = 8192;
const STDERR_TAIL_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A decoded piece of console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleChunk {
    pub stream: StreamKind,
    pub text: String,
}

/// Final outcome of a run: the envelope plus the captured console text.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub envelope: ResultEnvelope,
    pub stdout: String,
    pub stderr: String,
}

impl RunReport {
    pub fn state(&self) -> RunState {
        RunState::from_envelope(&self.envelope)
    }
}

/// Incremental UTF-8 decoding that survives sequences split across reads.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flushes a dangling partial sequence as a replacement character.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).to_string();
        self.pending.clear();
        rest
    }
}

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

impl Captured {
    fn append(&mut self, chunk: &str, limit: usize) {
        if self.truncated {
            return;
        }
        let room = limit.saturating_sub(self.text.len());
        if chunk.len() <= room {
            self.text.push_str(chunk);
            return;
        }
        let mut cut = room;
        while !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&chunk[..cut]);
        self.truncated = true;
    }
}

fn pump<R: Read>(
    mut pipe: R,
    stream: StreamKind,
    tx: Sender<ConsoleChunk>,
    limit: usize,
) -> Captured {
    let mut decoder = Utf8Stream::default();
    let mut captured = Captured::default();
    let mut buf = [0u8; READ_CHUNK];
    let mut deliver = |text: String, captured: &mut Captured| {
        if text.is_empty() {
            return;
        }
        captured.append(&text, limit);
        // The receiver may be gone; capture continues regardless.
        let _ = tx.send(ConsoleChunk { stream, text });
    };
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => deliver(decoder.push(&buf[..n]), &mut captured),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Console pipe closed: {e}");
                break;
            }
        }
    }
    deliver(decoder.finish(), &mut captured);
    captured
}

fn spawn_pump<R: Read + Send + 'static>(
    pipe: Option<R>,
    stream: StreamKind,
    tx: Sender<ConsoleChunk>,
    limit: usize,
) -> Option<JoinHandle<Captured>> {
    pipe.map(|p| thread::spawn(move || pump(p, stream, tx, limit)))
}

fn join_pump(handle: Option<JoinHandle<Captured>>) -> Captured {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn send_terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: kill(2) takes plain integers; the child leads its own group.
        let result = unsafe { libc::kill(-(child.id() as libc::pid_t), libc::SIGTERM) };
        if result != 0 {
            debug!("SIGTERM to process group {} failed", child.id());
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
}

/// Kills the child and, on unix, every process left in its group.
pub(crate) fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: as in `send_terminate`.
        unsafe {
            libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Exited,
    Cancelled,
    TimedOut,
}

struct RunControl {
    cancel: AtomicBool,
    state: Mutex<RunState>,
}

impl RunControl {
    fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            state: Mutex::new(RunState::Pending),
        }
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
    }
}

/// Waits for the child, escalating from SIGTERM to SIGKILL on cancel or
/// timeout. Returns why the wait ended and the exit status, if any.
fn supervise(
    child: &mut Child,
    control: &RunControl,
    timeout: Duration,
    grace: Duration,
) -> (Stop, Option<ExitStatus>) {
    let deadline = Instant::now() + timeout;
    let mut stop = Stop::Exited;
    let mut kill_at: Option<Instant> = None;
    loop {
        match child.wait_timeout(POLL_INTERVAL) {
            Ok(Some(status)) => return (stop, Some(status)),
            Ok(None) => {}
            Err(e) => {
                warn!("Waiting on child failed: {e}");
                force_kill(child);
                return (stop, child.wait().ok());
            }
        }
        let now = Instant::now();
        if kill_at.is_none() {
            if control.cancel.load(Ordering::SeqCst) {
                stop = Stop::Cancelled;
            } else if now >= deadline {
                stop = Stop::TimedOut;
            }
            if stop != Stop::Exited {
                debug!("Stopping child {} ({stop:?})", child.id());
                send_terminate(child);
                kill_at = Some(now + grace);
            }
        } else if kill_at.is_some_and(|at| now >= at) {
            warn!("Child {} ignored SIGTERM; killing", child.id());
            force_kill(child);
            return (stop, child.wait().ok());
        }
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let count = stderr.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return stderr;
    }
    let skip = count - STDERR_TAIL_CHARS;
    let start = stderr.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &stderr[start..]
}

fn non_empty_tail(stderr: &str) -> Option<String> {
    let tail = stderr_tail(stderr).trim();
    (!tail.is_empty()).then(|| tail.to_string())
}

fn read_envelope(
    path: &Path,
    max_bytes: u64,
    exit_code: Option<i32>,
    stderr: &str,
) -> ResultEnvelope {
    let Ok(size) = std::fs::metadata(path).map(|meta| meta.len()) else {
        let mut envelope =
            ResultEnvelope::failed("NoResult", "Child exited without writing a result", exit_code);
        if let Some(error) = envelope.error.as_mut() {
            error.traceback = non_empty_tail(stderr);
        }
        return envelope;
    };
    if size > max_bytes {
        return ResultEnvelope::failed(
            "ResultTooLarge",
            format!("Result of {size} bytes exceeds the {max_bytes} byte limit"),
            exit_code,
        );
    }
    let parsed = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice::<ResultEnvelope>(&bytes).map_err(|e| e.to_string()));
    match parsed {
        Ok(mut envelope) => {
            if exit_code.is_some() {
                envelope.exit_code = exit_code;
            }
            if envelope.ok && exit_code != Some(0) {
                // The process status is authoritative over what the child wrote.
                envelope.ok = false;
                envelope.result_kind = ResultKind::None;
                envelope.payload = Value::Null;
                envelope.error = Some(ErrorInfo {
                    kind: "NonZeroExit".to_string(),
                    message: match exit_code {
                        Some(code) => format!("Child reported success but exited with status {code}"),
                        None => "Child reported success but was terminated by a signal".to_string(),
                    },
                    traceback: non_empty_tail(stderr),
                });
            }
            envelope
        }
        Err(e) => ResultEnvelope::failed("InvalidResult", format!("Unreadable result: {e}"), exit_code),
    }
}

fn build_command(launch: &LaunchSpec, side_channel: Option<(&Path, &Path)>) -> Command {
    let mut command = Command::new(&launch.program);
    command
        .args(&launch.args)
        .current_dir(&launch.working_dir)
        .envs(&launch.env)
        .env(UNBUFFERED_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some((request, result)) = side_channel {
        command.env(REQUEST_PATH_ENV, request).env(RESULT_PATH_ENV, result);
    }
    own_process_group(&mut command);
    command
}

/// Puts the child at the head of a new process group so a whole tree can
/// be signalled at once.
pub(crate) fn own_process_group(command: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = command;
}

fn execute(
    launch: LaunchSpec,
    config: &ExecutionConfig,
    control: &RunControl,
    tx: Sender<ConsoleChunk>,
) -> RunReport {
    let started = Instant::now();
    let limits = ResultLimits {
        timeout_ms: config.timeout_ms,
        max_result_bytes: config.max_result_bytes,
        max_console_bytes: config.max_console_bytes,
    };
    let finish = |mut envelope: ResultEnvelope, stdout: Captured, stderr: Captured| {
        envelope.duration_ms = started.elapsed().as_millis() as u64;
        envelope.stdout_truncated = stdout.truncated;
        envelope.stderr_truncated = stderr.truncated;
        envelope.limits = Some(limits);
        RunReport {
            envelope,
            stdout: stdout.text,
            stderr: stderr.text,
        }
    };

    // Dropping the directory removes the request, the result and any
    // `.partial` leftover.
    let channel_dir = match &launch.request {
        Some(_) => {
            let builder_result = match &config.temp_dir {
                Some(dir) => tempfile::Builder::new().prefix("pywrap-run-").tempdir_in(dir),
                None => tempfile::Builder::new().prefix("pywrap-run-").tempdir(),
            };
            match builder_result {
                Ok(dir) => Some(dir),
                Err(e) => {
                    let envelope = ResultEnvelope::failed("SetupError", format!("Temp dir: {e}"), None);
                    return finish(envelope, Captured::default(), Captured::default());
                }
            }
        }
        None => None,
    };
    let paths = channel_dir
        .as_ref()
        .map(|dir| (dir.path().join("request.json"), dir.path().join("result.json")));

    if let (Some(request), Some((request_path, _))) = (&launch.request, &paths) {
        let written = serde_json::to_vec(request)
            .map_err(PywrapError::from)
            .and_then(|bytes| std::fs::write(request_path, bytes).map_err(PywrapError::from));
        if let Err(e) = written {
            let envelope = ResultEnvelope::failed("SetupError", e.to_string(), None);
            return finish(envelope, Captured::default(), Captured::default());
        }
    }

    let side_channel = paths.as_ref().map(|(req, res)| (req.as_path(), res.as_path()));
    let mut child = match build_command(&launch, side_channel).spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to start {}: {e}", launch.program);
            let envelope =
                ResultEnvelope::failed("SpawnError", format!("Failed to start {}: {e}", launch.program), None);
            return finish(envelope, Captured::default(), Captured::default());
        }
    };
    control.set_state(RunState::Running);
    info!("Running {} as pid {}", launch.action_id, child.id());

    let limit = usize::try_from(config.max_console_bytes).unwrap_or(usize::MAX);
    let stdout_pump = spawn_pump(child.stdout.take(), StreamKind::Stdout, tx.clone(), limit);
    let stderr_pump = spawn_pump(child.stderr.take(), StreamKind::Stderr, tx, limit);

    let (stop, status) = supervise(&mut child, control, config.timeout(), config.cancel_grace());
    let stdout = join_pump(stdout_pump);
    let stderr = join_pump(stderr_pump);
    let exit_code = status.and_then(|s| s.code());

    let envelope = match (stop, &paths) {
        (Stop::Cancelled, _) => ResultEnvelope::cancelled(exit_code),
        (Stop::TimedOut, _) => ResultEnvelope::timed_out(config.timeout_ms, exit_code),
        (Stop::Exited, Some((_, result_path))) => {
            read_envelope(result_path, config.max_result_bytes, exit_code, &stderr.text)
        }
        (Stop::Exited, None) => ResultEnvelope::from_exit(exit_code, stderr_tail(&stderr.text)),
    };
    drop(channel_dir);
    finish(envelope, stdout, stderr)
}

/// Frees the runner's single-flight slot when the supervisor ends, even by
/// unwinding.
struct ActiveSlot(Arc<Mutex<Option<Arc<RunControl>>>>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

/// Handle on one in-flight run.
pub struct RunHandle {
    control: Arc<RunControl>,
    output: Receiver<ConsoleChunk>,
    worker: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Requests cooperative termination; forced after the grace period.
    pub fn cancel(&self) {
        self.control.cancel.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> RunState {
        *self.control.state.lock()
    }

    /// Console chunks in arrival order per stream.
    pub fn output(&self) -> &Receiver<ConsoleChunk> {
        &self.output
    }

    pub fn wait(self) -> RunReport {
        let control = self.control;
        self.worker.join().unwrap_or_else(|_| {
            let envelope = ResultEnvelope::failed("InternalError", "Run supervisor panicked", None);
            control.set_state(RunState::Failed);
            RunReport {
                envelope,
                stdout: String::new(),
                stderr: String::new(),
            }
        })
    }
}

/// Single-flight executor: at most one running child per runner.
pub struct ActionRunner {
    config: ExecutionConfig,
    active: Arc<Mutex<Option<Arc<RunControl>>>>,
}

impl ActionRunner {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Starts `launch` in the background.
    ///
    /// Fails with [`PywrapError::Busy`] while another run is active; every
    /// other problem is reported through the run's envelope.
    pub fn start(&self, launch: LaunchSpec) -> PywrapResult<RunHandle> {
        let control = {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(PywrapError::Busy);
            }
            let control = Arc::new(RunControl::new());
            *active = Some(Arc::clone(&control));
            control
        };

        let (tx, rx) = mpsc::channel();
        let config = self.config.clone();
        let slot = ActiveSlot(Arc::clone(&self.active));
        let worker_control = Arc::clone(&control);
        let spawned = thread::Builder::new()
            .name("pywrap-run".to_string())
            .spawn(move || {
                let _slot = slot;
                let report = execute(launch, &config, &worker_control, tx);
                worker_control.set_state(report.state());
                info!(
                    "Run finished: {:?} in {}ms",
                    report.state(),
                    report.envelope.duration_ms
                );
                report
            });
        match spawned {
            Ok(worker) => Ok(RunHandle {
                control,
                output: rx,
                worker,
            }),
            Err(e) => {
                self.active.lock().take();
                Err(PywrapError::Execution(format!("Failed to start supervisor: {e}")))
            }
        }
    }

    /// Runs `launch` to completion.
    pub fn run(&self, launch: LaunchSpec) -> PywrapResult<RunReport> {
        Ok(self.start(launch)?.wait())
    }
}
