//! Reference discovery: the server's advertisement to the client.
//!
//! References are enumerated through `git for-each-ref`, one child process
//! per enumeration: the visible refs (with hide rules turned into
//! `--exclude` patterns), an optional pass over the unhide patterns, and an
//! optional pass over a fork parent's refs in the alternate network
//! directory, advertised as `.have` lines.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use bstr::ByteSlice;
use spokes_serve_core::{HideRules, PacketWriter};

use crate::process::ScopedChild;
use crate::Error;

const REF_FORMAT: &str = "--format=%(objectname) %(refname)";
const HAVE_FORMAT: &str = "--format=%(objectname) .have";

/// Writes advertisement packets, attaching the capability list to the first
/// line. At most one capability line is ever written.
pub(crate) struct RefAdvertiser<'a> {
    writer: PacketWriter<&'a mut dyn Write>,
    capabilities: &'a str,
    wrote_capabilities: bool,
}

impl<'a> RefAdvertiser<'a> {
    pub(crate) fn new(out: &'a mut dyn Write, capabilities: &'a str) -> Self {
        Self {
            writer: PacketWriter::new(out),
            capabilities,
            wrote_capabilities: false,
        }
    }

    /// Advertise one `<oid> <refname>` line. Hidden references were already
    /// excluded from the enumeration, so anything that gets here is safe to
    /// advertise.
    pub(crate) fn advertise(&mut self, line: &[u8]) -> crate::Result<()> {
        if line.len() < 41 {
            return Err(Error::Protocol(format!(
                "malformed ref line: {:?}",
                line.as_bstr()
            )));
        }

        let mut payload = Vec::with_capacity(line.len() + self.capabilities.len() + 2);
        payload.extend_from_slice(line);
        if !self.wrote_capabilities {
            self.wrote_capabilities = true;
            payload.push(0);
            payload.extend_from_slice(self.capabilities.as_bytes());
        }
        payload.push(b'\n');
        self.writer.write_packet(&payload)?;
        Ok(())
    }

    /// The advertisement for a repository with nothing to list: a null oid,
    /// the `capabilities^{}` placeholder refname, and the capability list.
    fn advertise_capabilities_only(&mut self, null_oid: &str) -> crate::Result<()> {
        let payload = format!("{null_oid} capabilities^{{}}\0{}", self.capabilities);
        self.writer.write_packet(payload.as_bytes())?;
        Ok(())
    }

    fn finish(mut self) -> crate::Result<()> {
        self.writer.write_flush()?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Run the reference-discovery phase: enumerate, advertise, flush.
#[allow(clippy::too_many_arguments)]
pub(crate) fn perform_reference_discovery(
    out: &mut dyn Write,
    repo_path: &Path,
    capabilities: &str,
    null_oid: &str,
    rules: &HideRules,
    parent_repo_id: u32,
    advertise_parent_tags: bool,
) -> crate::Result<()> {
    let mut advertiser = RefAdvertiser::new(out, capabilities);

    let mut args: Vec<String> = vec!["for-each-ref".to_owned(), REF_FORMAT.to_owned()];
    args.extend(rules.exclude_patterns().map(|p| format!("--exclude={p}")));
    collect_references(repo_path, None, &args, &mut advertiser)?;

    let unhide: Vec<&str> = rules.unhide_patterns().collect();
    if !unhide.is_empty() {
        let mut args: Vec<String> = vec!["for-each-ref".to_owned(), REF_FORMAT.to_owned()];
        args.extend(unhide.iter().map(|p| (*p).to_owned()));
        collect_references(repo_path, None, &args, &mut advertiser)?;
    }

    // Advertise the fork parent's tips as `.have` so the client can avoid
    // resending objects the network already stores.
    if parent_repo_id != 0 {
        if let Ok(network) = network_repo_path(repo_path) {
            let mut args: Vec<String> = vec![
                "for-each-ref".to_owned(),
                HAVE_FORMAT.to_owned(),
                format!("refs/remotes/{parent_repo_id}/heads"),
            ];
            if advertise_parent_tags {
                args.push(format!("refs/remotes/{parent_repo_id}/tags"));
            }
            collect_references(repo_path, Some(&network), &args, &mut advertiser)?;
        }
    }

    if !advertiser.wrote_capabilities {
        advertiser.advertise_capabilities_only(null_oid)?;
    }
    advertiser.finish()
}

/// Stream one `for-each-ref` enumeration into the advertiser.
fn collect_references(
    repo_path: &Path,
    git_dir: Option<&Path>,
    args: &[String],
    advertiser: &mut RefAdvertiser<'_>,
) -> crate::Result<()> {
    let mut cmd = std::process::Command::new("git");
    cmd.current_dir(repo_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    if let Some(dir) = git_dir {
        cmd.arg(format!("--git-dir={}", dir.display()));
    }
    cmd.args(args);

    let mut child = ScopedChild::spawn(&mut cmd, "for-each-ref")?;
    let Some(stdout) = child.take_stdout() else {
        return Err(Error::child("for-each-ref", "stdout unavailable"));
    };
    for line in BufReader::new(stdout).split(b'\n') {
        let line = line.map_err(|e| Error::io("collecting references", e))?;
        advertiser.advertise(&line)?;
    }
    child.expect_success()
}

/// The network directory this fork's alternates point at, when the
/// `objects/info/alternates` file names a sibling of the repository.
fn network_repo_path(repo_path: &Path) -> crate::Result<PathBuf> {
    let alternates_file = repo_path.join("objects").join("info").join("alternates");
    let contents = std::fs::read_to_string(&alternates_file).map_err(|e| {
        Error::io(
            format!(
                "could not read objects/info/alternates of '{}'",
                repo_path.display()
            ),
            e,
        )
    })?;
    let alternates = contents.strip_suffix('\n').unwrap_or(&contents);

    let mut path = PathBuf::from(alternates);
    if path.is_relative() {
        path = repo_path.join("objects").join(path);
    }
    let path = std::fs::canonicalize(&path)
        .map_err(|e| Error::io("could not get absolute alternates path", e))?;

    if !path.is_dir() {
        return Err(Error::Protocol(format!(
            "alternates path is not a directory: {}",
            path.display()
        )));
    }

    let parent = repo_path.parent().unwrap_or_else(|| Path::new("/"));
    if !path.starts_with(parent) {
        return Err(Error::Protocol(
            "alternates and repo are not in the same parent directory".to_owned(),
        ));
    }

    Ok(path.parent().unwrap_or_else(|| Path::new("/")).to_owned())
}
