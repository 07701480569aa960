// ServerProcessSupervisor: starts the server runtime as a child process and
// bridges its stdio to the operator console.
//
// Each `ProcessSession` owns exactly three relay tasks: stdout and stderr
// relays that are joined once the child exits (for at most
// `RELAY_DRAIN_TIMEOUT`), and a stdin forwarder that is cancelled on child
// exit so a quiet console never pins it.

use crate::config::HarnessConfig;
use crate::constants::{defaults, DEBUG_AGENT_FLAG, RELAY_DRAIN_TIMEOUT, RUN_FLAG};
use crate::errors::ProcessLaunchError;
use crate::relay::{forward_input, relay_lines, spawn_relay};
use crate::shutdown::{terminate_process, ShutdownHook};

use anyhow::{Context, Result};
use runserver_sdk::TraceWriter;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

pub type ConsoleWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type ConsoleReader = Box<dyn AsyncRead + Send + Unpin>;

/// The operator side of the console bridge.
pub struct Console {
    pub output: ConsoleWriter,
    pub error: ConsoleWriter,
    pub input: ConsoleReader,
}

impl Console {
    pub fn new(
        output: impl AsyncWrite + Send + Unpin + 'static,
        error: impl AsyncWrite + Send + Unpin + 'static,
        input: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            output: Box::new(output),
            error: Box::new(error),
            input: Box::new(input),
        }
    }

    /// The harness's own standard streams.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdout(), tokio::io::stderr(), tokio::io::stdin())
    }
}

// ---------------------------------------------------------------------------
// Launch options
// ---------------------------------------------------------------------------

/// How the runtime is started, independent of any one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Java executable; bare names are looked up on `PATH`.
    pub java: String,
    /// Extra JVM arguments placed before the debug flag.
    pub jvm_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            java: defaults::JAVA.to_string(),
            jvm_args: Vec::new(),
        }
    }
}

impl LaunchOptions {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            java: config.java().to_string(),
            jvm_args: config.jvm_args().to_vec(),
        }
    }

    /// `jvm_args ++ [debug flag] ++ ["-jar", runtime_file_name]`.
    pub fn build_arguments(&self, runtime_file_name: &str, debug: bool) -> Vec<String> {
        let mut args = self.jvm_args.clone();
        if debug {
            args.push(DEBUG_AGENT_FLAG.to_string());
        }
        args.push(RUN_FLAG.to_string());
        args.push(runtime_file_name.to_string());
        args
    }

    /// The program to spawn. A bare name resolves through `PATH` when
    /// possible; otherwise it is passed through and spawn reports the error.
    pub fn resolve_program(&self) -> PathBuf {
        let raw = Path::new(&self.java);
        if raw.components().count() > 1 {
            return raw.to_path_buf();
        }
        which::which(&self.java).unwrap_or_else(|_| raw.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// ProcessSession
// ---------------------------------------------------------------------------

/// Lifecycle of a session. A session only exists once its child spawned, so
/// the not-started state is the absence of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    /// The child exited; `-1` when it died from a signal.
    Exited(i32),
}

/// A running server process and its relay tasks.
pub struct ProcessSession {
    child: Child,
    pid: u32,
    state: SessionState,
    started: Instant,
    stdout_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    stdin_task: Option<JoinHandle<()>>,
    stdin_cancel: CancellationToken,
    hook: ShutdownHook,
    trace: Arc<dyn TraceWriter>,
}

impl ProcessSession {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Wait for the child to exit and return its exit code.
    ///
    /// The stdout and stderr relays are drained before returning, unless a
    /// leftover process keeps their pipes open past the drain timeout, in
    /// which case they are stopped. The stdin forwarder is cancelled.
    /// Calling again returns the same code.
    pub async fn wait(&mut self) -> Result<i32> {
        if let SessionState::Exited(code) = self.state {
            return Ok(code);
        }

        let status = self
            .child
            .wait()
            .await
            .context("Failed to wait for server process")?;
        let exit_code = status.code().unwrap_or(-1);
        self.state = SessionState::Exited(exit_code);
        self.hook.unregister(self.pid);

        let deadline = tokio::time::Instant::now() + RELAY_DRAIN_TIMEOUT;
        for (name, task) in [
            ("stdout", self.stdout_task.take()),
            ("stderr", self.stderr_task.take()),
        ] {
            let Some(mut task) = task else { continue };
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(joined) => self.report_join(name, joined),
                Err(_) => {
                    self.trace.warning(&format!(
                        "Console {name} relay still open after the server exited, \
                         another process holds the pipe. Stopping the relay."
                    ));
                    task.abort();
                }
            }
        }

        self.stdin_cancel.cancel();
        if let Some(task) = self.stdin_task.take() {
            let joined = task.await;
            self.report_join("stdin", joined);
        }

        self.trace.info(&format!(
            "Finished server process {} with exit code {exit_code}, and elapsed time {:.2?}.",
            self.pid,
            self.started.elapsed()
        ));
        Ok(exit_code)
    }

    fn report_join(&self, name: &str, joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            if e.is_panic() {
                self.trace
                    .warning(&format!("Console {name} relay panicked: {e}"));
            }
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.stdin_cancel.cancel();
        if self.state == SessionState::Running {
            stop_child(&mut self.child, self.pid, terminate_process);
            self.hook.unregister(self.pid);
        }
    }
}

/// Ask a still-running child to terminate; kill it outright when no
/// terminate signal could be sent.
fn stop_child(child: &mut Child, pid: u32, terminate: impl Fn(u32) -> bool) {
    if let Ok(None) = child.try_wait() {
        if !terminate(pid) {
            let _ = child.start_kill();
        }
    }
}

// ---------------------------------------------------------------------------
// ServerProcessSupervisor
// ---------------------------------------------------------------------------

/// Launches server processes and wires up their console bridge.
pub struct ServerProcessSupervisor {
    options: LaunchOptions,
    hook: ShutdownHook,
    trace: Arc<dyn TraceWriter>,
}

impl ServerProcessSupervisor {
    pub fn new(options: LaunchOptions, hook: ShutdownHook, trace: Arc<dyn TraceWriter>) -> Self {
        Self {
            options,
            hook,
            trace,
        }
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    /// Spawn the runtime in `working_dir` and start the three relays.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`ProcessLaunchError`] when the OS cannot start the process, in which
    /// case no relay is started.
    pub fn launch(
        &self,
        runtime_path: &Path,
        working_dir: &Path,
        debug: bool,
        console: Console,
    ) -> Result<ProcessSession> {
        let runtime_file_name = runtime_path
            .file_name()
            .with_context(|| format!("'{}' has no file name", runtime_path.display()))?
            .to_string_lossy()
            .into_owned();
        let arguments = self.options.build_arguments(&runtime_file_name, debug);
        let program = self.options.resolve_program();

        self.trace.info("Starting server process:");
        self.trace
            .info(&format!("  File name: '{}'", program.display()));
        self.trace
            .info(&format!("  Arguments: '{}'", arguments.join(" ")));
        self.trace
            .info(&format!("  Working directory: '{}'", working_dir.display()));
        if debug {
            self.trace.info(&format!(
                "Debug mode enabled. Connect debugger to port {}",
                crate::constants::DEBUG_PORT
            ));
        }

        let mut cmd = Command::new(&program);
        cmd.args(&arguments)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // No terminate signal exists off Unix; the hook can only rely on the
        // handle being dropped when the harness goes away.
        #[cfg(not(unix))]
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessLaunchError {
            program: self.options.java.clone(),
            arguments: arguments.join(" "),
            source,
        })?;
        let started = Instant::now();

        let (Some(pid), Some(stdout), Some(stderr), Some(stdin)) = (
            child.id(),
            child.stdout.take(),
            child.stderr.take(),
            child.stdin.take(),
        ) else {
            let _ = child.start_kill();
            anyhow::bail!("Server process started without piped stdio");
        };
        self.hook.register(pid);
        self.trace
            .info(&format!("Server process started with process id {pid}."));

        let stdin_cancel = CancellationToken::new();
        let stdout_task = spawn_relay(
            "stdout",
            relay_lines("stdout", stdout, console.output, self.trace.clone()),
            self.trace.clone(),
        );
        let stderr_task = spawn_relay(
            "stderr",
            relay_lines("stderr", stderr, console.error, self.trace.clone()),
            self.trace.clone(),
        );
        let stdin_task = spawn_relay(
            "stdin",
            forward_input(console.input, stdin, stdin_cancel.clone()),
            self.trace.clone(),
        );

        Ok(ProcessSession {
            child,
            pid,
            state: SessionState::Running,
            started,
            stdout_task: Some(stdout_task),
            stderr_task: Some(stderr_task),
            stdin_task: Some(stdin_task),
            stdin_cancel,
            hook: self.hook.clone(),
            trace: self.trace.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use parking_lot::Mutex;
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::AsyncWrite;

    /// Collects everything written to it; clones share the buffer.
    #[derive(Clone, Default)]
    pub(crate) struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        pub(crate) fn bytes(&self) -> Vec<u8> {
            self.0.lock().clone()
        }

        pub(crate) fn text(&self) -> String {
            String::from_utf8(self.bytes()).unwrap()
        }
    }

    impl AsyncWrite for Capture {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.0.lock().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
