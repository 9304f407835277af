//! Scoped child processes.
//!
//! Every external `git` invocation is wrapped so that an early return or a
//! cancellation unwinding through the engine cannot leak a running child:
//! dropping the guard kills and reaps the process unless it was already
//! waited for.

use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Output, Stdio};

use crate::Error;

/// A child process that is killed on drop unless explicitly waited for.
#[derive(Debug)]
pub struct ScopedChild {
    inner: Option<Child>,
    context: &'static str,
}

impl ScopedChild {
    /// Spawn `cmd`, labeling failures with `context`.
    pub fn spawn(cmd: &mut Command, context: &'static str) -> crate::Result<Self> {
        let child = cmd
            .spawn()
            .map_err(|e| Error::io(format!("starting '{context}'"), e))?;
        Ok(Self {
            inner: Some(child),
            context,
        })
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.inner.as_mut().and_then(|c| c.stdin.take())
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.inner.as_mut().and_then(|c| c.stdout.take())
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.inner.as_mut().and_then(|c| c.stderr.take())
    }

    /// Wait for the child to exit, disarming the kill-on-drop guard.
    pub fn wait(mut self) -> crate::Result<ExitStatus> {
        let context = self.context;
        let mut child = self.inner.take().unwrap_or_else(|| unreachable!());
        child
            .wait()
            .map_err(|e| Error::io(format!("waiting for '{context}'"), e))
    }

    /// Wait for the child and collect its remaining output.
    pub fn wait_with_output(mut self) -> crate::Result<Output> {
        let context = self.context;
        let child = self.inner.take().unwrap_or_else(|| unreachable!());
        child
            .wait_with_output()
            .map_err(|e| Error::io(format!("waiting for '{context}'"), e))
    }

    /// Require a zero exit status, mapping anything else to [`Error::Child`].
    pub fn expect_success(self) -> crate::Result<()> {
        let context = self.context;
        let status = self.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::child(context, status.to_string()))
        }
    }
}

impl Drop for ScopedChild {
    fn drop(&mut self) {
        if let Some(mut child) = self.inner.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// A `git` command with stdio defaulted to null, ready for per-site tweaks.
pub fn git_command(repo: &std::path::Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(repo)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}
