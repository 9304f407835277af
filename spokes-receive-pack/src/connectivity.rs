//! Reachability checks over the quarantined objects.
//!
//! After a successful unpack the new tips must be closed under
//! reachability, stopping the traversal at anything reachable from the
//! pre-existing references. The checks run `git rev-list` with the
//! quarantine in the child's object-directory environment so the received
//! objects are visible.

use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use crate::process::{git_command, ScopedChild};
use crate::protocol::Command;
use crate::quarantine::Quarantine;
use crate::Error;

pub(crate) struct ConnectivityChecker<'a> {
    repo_path: &'a Path,
    env: [(&'static str, OsString); 3],
}

impl<'a> ConnectivityChecker<'a> {
    pub(crate) fn new(repo_path: &'a Path, quarantine: &Quarantine) -> Self {
        Self {
            repo_path,
            env: quarantine.child_env(),
        }
    }

    fn rev_list(&self) -> std::process::Command {
        let mut cmd = git_command(self.repo_path);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Check all candidate tips in one `rev-list` run. Commands that were
    /// already rejected and deletes contribute no tips; with no tips at all
    /// the check trivially passes.
    pub(crate) fn check_connectivity(&self, commands: &[Command]) -> crate::Result<()> {
        let tips: Vec<&str> = commands
            .iter()
            .filter(|c| !c.status().is_rejected() && !c.is_delete())
            .map(|c| c.new_oid())
            .collect();
        if tips.is_empty() {
            return Ok(());
        }

        let mut cmd = self.rev_list();
        cmd.args([
            "rev-list",
            "--objects",
            "--no-object-names",
            "--stdin",
            "--not",
            "--exclude-hidden=receive",
            "--all",
            "--alternate-refs",
        ])
        .stdin(Stdio::piped());

        let mut child = ScopedChild::spawn(&mut cmd, "rev-list")?;
        let Some(mut stdin) = child.take_stdin() else {
            return Err(Error::child("rev-list", "stdin unavailable"));
        };
        for tip in tips {
            writeln!(stdin, "{tip}").map_err(|e| Error::io("writing to 'rev-list' input", e))?;
        }
        drop(stdin);

        child.expect_success()
    }

    /// Retry one tip on its own, capturing the child's complaints for the
    /// log.
    pub(crate) fn check_object(&self, oid: &str) -> crate::Result<()> {
        let mut cmd = self.rev_list();
        cmd.args([
            "rev-list",
            "--objects",
            "--no-object-names",
            oid,
            "--not",
            "--all",
            "--alternate-refs",
        ])
        .stderr(Stdio::piped());

        let child = ScopedChild::spawn(&mut cmd, "rev-list")?;
        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::child(
                "rev-list",
                format!(
                    "oid {oid}: {}. Details: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ))
        }
    }

    /// Whether updating from `old` to `new` would be a fast-forward. Any
    /// failure to answer counts as "no".
    pub(crate) fn is_fast_forward(&self, old: &str, new: &str) -> bool {
        let mut cmd = self.rev_list();
        cmd.args(["merge-base", "--is-ancestor", old, new]);
        match ScopedChild::spawn(&mut cmd, "merge-base") {
            Ok(child) => child.wait().map(|status| status.success()).unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandStatus;

    const C0: &str = "74730d410fcb6603ace96f1dc55ea6196122532d";
    const C1: &str = "5a3f6be755bbb7deae50065988cbfa1ffa9ab68a";
    const ZERO: &str = "0000000000000000000000000000000000000000";

    fn checker_fixture() -> (tempfile::TempDir, Quarantine) {
        let repo = tempfile::tempdir().unwrap();
        let quarantine = Quarantine::new(repo.path(), "incoming-q");
        (repo, quarantine)
    }

    #[test]
    fn no_candidate_tips_passes_without_running_git() {
        let (repo, quarantine) = checker_fixture();
        let checker = ConnectivityChecker::new(repo.path(), &quarantine);

        let delete = Command::parse(format!("{C0} {ZERO} refs/heads/gone\n").as_bytes()).unwrap();
        let mut rejected =
            Command::parse(format!("{ZERO} {C1} refs/heads/new\n").as_bytes()).unwrap();
        rejected.set_status(CommandStatus::Rejected("denied".to_owned()));

        // The repo path holds no repository at all, so any spawned rev-list
        // would fail; passing proves none ran.
        checker.check_connectivity(&[delete, rejected]).unwrap();
    }
}
