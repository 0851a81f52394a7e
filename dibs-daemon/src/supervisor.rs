//! Process supervision.
//!
//! [`run_blocking`] runs a step to completion with an optional deadline and a
//! cancellation token; [`SupervisedProcess`] launches a long-running process
//! and can be killed at any time. Output of both is passed through to this
//! process's own stdout/stderr, never captured.
//!
//! Command lines are split on whitespace. There is no shell quoting, so an
//! argument cannot contain a space.
//!
//! On unix every command leads its own process group and kills are sent to
//! the whole group, so servers forked by a wrapper (`go run .`, `sh start.sh`)
//! die with it.

use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{io_err, DaemonError};
use crate::paths::TERM_GRACE;

/// A program plus arguments, parsed from one configuration string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn parse(line: &str) -> Result<Self, DaemonError> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts.next().ok_or(DaemonError::InvalidCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn to_command(&self, cwd: Option<&Path>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Blocking steps
// ---------------------------------------------------------------------------

enum StepOutcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

/// Run `command` to completion.
///
/// The child is killed when `cancel` fires or `timeout` elapses. A non-zero
/// exit is [`DaemonError::CommandFailed`].
pub async fn run_blocking(
    command: &CommandLine,
    cwd: Option<&Path>,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<(), DaemonError> {
    let mut child = command
        .to_command(cwd)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| io_err(&command.program, e))?;
    let pid = child.id();

    let deadline = async {
        match timeout {
            Some(after) => {
                tokio::time::sleep(after).await;
                after
            }
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => StepOutcome::Exited(status),
        _ = cancel.cancelled() => StepOutcome::Cancelled,
        after = deadline => StepOutcome::TimedOut(after),
    };

    match outcome {
        StepOutcome::Exited(status) => {
            let status = status.map_err(|e| io_err(&command.program, e))?;
            if status.success() {
                Ok(())
            } else {
                Err(DaemonError::CommandFailed {
                    command: command.to_string(),
                    status,
                })
            }
        }
        StepOutcome::Cancelled => {
            group::kill(pid);
            let _ = child.kill().await;
            Err(DaemonError::CommandCancelled {
                command: command.to_string(),
            })
        }
        StepOutcome::TimedOut(after) => {
            group::kill(pid);
            let _ = child.kill().await;
            Err(DaemonError::CommandTimedOut {
                command: command.to_string(),
                after,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Long-running processes
// ---------------------------------------------------------------------------

/// Lifecycle of a [`SupervisedProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(ExitStatus),
    /// The exit status could not be collected.
    Lost,
}

/// Handle to a process started with [`SupervisedProcess::spawn`].
///
/// A reaper task owns the child; the handle only signals it. Killing is
/// fire-and-forget and idempotent.
#[derive(Debug)]
pub struct SupervisedProcess {
    command: String,
    pid: Option<u32>,
    kill: CancellationToken,
    state: watch::Receiver<ProcessState>,
    reaper: JoinHandle<()>,
}

impl SupervisedProcess {
    /// Launch `command` and return immediately.
    pub fn spawn(command: &CommandLine, cwd: Option<&Path>) -> Result<Self, DaemonError> {
        let mut child = command
            .to_command(cwd)
            .spawn()
            .map_err(|e| io_err(&command.program, e))?;
        let pid = child.id();
        let label = command.to_string();

        let kill = CancellationToken::new();
        let (state_tx, state) = watch::channel(ProcessState::Running);

        let reaper = {
            let kill = kill.clone();
            let label = label.clone();
            tokio::spawn(async move {
                let exited = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = kill.cancelled() => None,
                };
                let status = match exited {
                    Some(status) => status,
                    None => terminate(&mut child, pid, &label).await,
                };
                let final_state = match status {
                    Ok(status) => {
                        tracing::info!(command = %label, %status, "supervised process exited");
                        ProcessState::Exited(status)
                    }
                    Err(err) => {
                        tracing::warn!(command = %label, error = %err, "lost track of supervised process");
                        ProcessState::Lost
                    }
                };
                let _ = state_tx.send(final_state);
            })
        };

        Ok(Self {
            command: label,
            pid,
            kill,
            state,
            reaper,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.state() == ProcessState::Running && !self.reaper.is_finished()
    }

    /// Ask the process to terminate without waiting for it.
    ///
    /// Once the leader has exited, whatever it left behind in its group is
    /// killed directly.
    pub fn kill(&self) {
        if self.state() != ProcessState::Running {
            group::kill(self.pid);
        }
        self.kill.cancel();
    }

    /// Wait until the process is gone.
    pub async fn wait(&mut self) -> ProcessState {
        match self.state.wait_for(|s| *s != ProcessState::Running).await {
            Ok(state) => *state,
            Err(_) => ProcessState::Lost,
        }
    }

    /// Kill and wait up to `grace` for the exit to be observed.
    pub async fn kill_and_wait(&mut self, grace: Duration) -> Option<ProcessState> {
        self.kill();
        tokio::time::timeout(grace, self.wait()).await.ok()
    }
}

/// SIGTERM the group, SIGKILL it after [`TERM_GRACE`], and collect the
/// leader's exit status.
async fn terminate(child: &mut Child, pid: Option<u32>, label: &str) -> std::io::Result<ExitStatus> {
    group::terminate(pid);
    let status = match tokio::time::timeout(TERM_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(command = %label, "process ignored SIGTERM; killing");
            if let Err(err) = child.start_kill() {
                tracing::debug!(command = %label, error = %err, "kill signal not delivered");
            }
            child.wait().await
        }
    };
    // Group members that outlived the leader.
    group::kill(pid);
    status
}

#[cfg(unix)]
mod group {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    pub(super) fn terminate(leader: Option<u32>) {
        send(leader, Signal::SIGTERM);
    }

    pub(super) fn kill(leader: Option<u32>) {
        send(leader, Signal::SIGKILL);
    }

    fn send(leader: Option<u32>, signal: Signal) {
        let Some(raw) = leader.and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        match killpg(Pid::from_raw(raw), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                tracing::debug!(pgid = raw, signal = ?signal, error = %err, "group signal not delivered");
            }
        }
    }
}

#[cfg(not(unix))]
mod group {
    pub(super) fn terminate(_leader: Option<u32>) {}

    pub(super) fn kill(_leader: Option<u32>) {}
}
