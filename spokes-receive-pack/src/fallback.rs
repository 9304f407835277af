//! Delegation to the stock `git-receive-pack`.
//!
//! When the request did not opt into the quarantined path, this binary is
//! nothing but a shim: the original arguments go to `git-receive-pack`
//! verbatim, stdio is inherited, and its exit status becomes ours.

use std::ffi::OsString;
use std::process::Command;

/// Run `git-receive-pack` with `args` and return its exit code.
pub fn run<I>(args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    match Command::new("git-receive-pack").args(args).status() {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            eprintln!("error: unexpected error executing the git-receive-pack Git command: {e}");
            1
        }
    }
}
