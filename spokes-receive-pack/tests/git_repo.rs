//! Tests against real repositories, driven through the `git` binary.
//!
//! Every test returns early when no `git` is on PATH, so the suite stays
//! green on hosts without one.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use spokes_receive_pack::config::Config;
use spokes_receive_pack::governor::Conn;
use spokes_receive_pack::interrupt::CancellationFlag;
use spokes_receive_pack::object_format::ObjectFormat;
use spokes_receive_pack::pack::PackStream;
use spokes_receive_pack::protocol::{Session, SpokesReceivePack};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(repo: &Path, args: &[&str], stdin: &[u8]) -> String {
    let mut child = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .env("GIT_AUTHOR_NAME", "spokes-receive-pack")
        .env("GIT_AUTHOR_EMAIL", "spokes-receive-pack@github.com")
        .env("GIT_COMMITTER_NAME", "spokes-receive-pack")
        .env("GIT_COMMITTER_EMAIL", "spokes-receive-pack@github.com")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawning git");
    child
        .stdin
        .take()
        .expect("git stdin")
        .write_all(stdin)
        .expect("writing git stdin");
    let output = child.wait_with_output().expect("waiting for git");
    assert!(output.status.success(), "git {args:?} failed");
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

/// A bare repository with one commit on `refs/heads/main`, built from
/// plumbing so no worktree is needed.
fn bare_repo_with_main(dir: &Path) -> String {
    let repo = dir.join("origin.git");
    let output = Command::new("git")
        .args(["init", "--bare", "--quiet"])
        .arg(&repo)
        .output()
        .expect("running git init");
    assert!(output.status.success(), "git init failed");

    let tree = git(&repo, &["mktree"], b"");
    let commit = git(&repo, &["commit-tree", &tree, "-m", "initial"], b"");
    git(&repo, &["update-ref", "refs/heads/main", &commit], b"");
    commit
}

fn advertisement(repo: PathBuf) -> Vec<u8> {
    let config = Config::read(&repo).expect("reading config");
    let object_format = ObjectFormat::detect(&repo).expect("detecting object format");
    let session = Session {
        repo_path: repo,
        config,
        object_format,
        stateless_rpc: true,
        advertise_refs: true,
        quarantine_id: "git-repo-test-quarantine".to_owned(),
        version: "0.3.0",
        cancel: CancellationFlag::new(),
        pack_stream: PackStream::Copy,
    };

    let mut output = Vec::new();
    let mut rp = SpokesReceivePack::new(std::io::empty(), &mut output, session);
    let mut governor = Conn::null();
    rp.execute(&mut governor).expect("advertising refs");
    drop(rp);
    output
}

#[test]
fn config_snapshot_reads_repeated_values_in_order() {
    if !git_available() {
        eprintln!("skipping: no git binary on PATH");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("origin.git");
    bare_repo_with_main(dir.path());

    git(&repo, &["config", "receive.hiderefs", "refs/pull/"], b"");
    git(&repo, &["config", "--add", "receive.hiderefs", "refs/gh/"], b"");
    git(&repo, &["config", "--add", "receive.hiderefs", "refs/__gh__"], b"");

    let config = Config::read(&repo).unwrap();
    assert_eq!(
        config.get_all("receive.hiderefs"),
        vec!["refs/pull/", "refs/gh/", "refs/__gh__"]
    );
}

#[test]
fn object_format_of_a_fresh_repo_is_sha1() {
    if !git_available() {
        eprintln!("skipping: no git binary on PATH");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    bare_repo_with_main(dir.path());
    let format = ObjectFormat::detect(&dir.path().join("origin.git")).unwrap();
    assert_eq!(format, ObjectFormat::Sha1);
}

#[test]
fn advertisement_lists_refs_with_capabilities_on_the_first_line() {
    if !git_available() {
        eprintln!("skipping: no git binary on PATH");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let commit = bare_repo_with_main(dir.path());

    let output = advertisement(dir.path().join("origin.git"));
    let text = String::from_utf8_lossy(&output);

    assert!(text.contains(&format!("{commit} refs/heads/main\0")));
    assert!(text.contains("report-status report-status-v2 delete-refs side-band-64k"));
    assert!(text.contains("agent=github/spokes-receive-pack-0.3.0"));
    assert!(text.ends_with("0000"));
    assert_eq!(text.matches('\0').count(), 1);
}

#[test]
fn empty_repo_advertises_the_lonely_capability_line() {
    if !git_available() {
        eprintln!("skipping: no git binary on PATH");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("empty.git");
    let output = Command::new("git")
        .args(["init", "--bare", "--quiet"])
        .arg(&repo)
        .output()
        .expect("running git init");
    assert!(output.status.success());

    let advert = advertisement(repo);
    let text = String::from_utf8_lossy(&advert);

    assert!(text.contains(&format!("{} capabilities^{{}}\0", "0".repeat(40))));
    assert!(text.ends_with("0000"));
}
