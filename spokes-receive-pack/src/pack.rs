//! Pack intake: streaming the client's packfile into `git index-pack`.
//!
//! The child indexes straight off our stdin into the quarantine object
//! directory. While it runs, its stderr is multiplexed onto side-band 2 (if
//! negotiated) and its stdout is collected in the background so the
//! resulting pack's size can be reported to the governor.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::mpsc;
use std::time::Duration;

use spokes_serve_core::{sideband, Band, Capabilities, PacketError, PacketWriter};

use crate::config::Config;
use crate::governor::Conn;
use crate::process::ScopedChild;
use crate::quarantine::Quarantine;
use crate::{sockstat, Error};

const IMPORT_MAX_INPUT_SIZE: i64 = 40 * 1024 * 1024 * 1024;
const IMPORT_SKIP_LIMIT_MAX_INPUT_SIZE: i64 = 80 * 1024 * 1024 * 1024;

/// How `index-pack` receives the packfile bytes.
///
/// A bidirectional client keeps its stream open until it has read the
/// report, so the pack cannot be pumped through a pipe until EOF there:
/// the child must own the descriptor and stop at the end of the pack.
#[derive(Debug)]
pub enum PackStream {
    /// The session input is the process stdin; the child inherits the
    /// descriptor and consumes exactly the pack bytes itself.
    InheritStdin,
    /// Stream the session input into the child through a pipe, to EOF.
    /// Suitable for stateless requests and in-memory runs.
    Copy,
}

/// The concrete byte source for one intake run.
pub(crate) enum PackSource<'a> {
    InheritStdin,
    Stream(&'a mut dyn Read),
}

/// Size and fsck policy knobs carried by the sockstat environment for
/// repository imports.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImportPolicy {
    pub importing: bool,
    pub skip_push_limit: bool,
    pub allow_bad_date: bool,
}

impl ImportPolicy {
    pub fn from_sockstat() -> Self {
        let importing = sockstat::get_bool("is_importing");
        Self {
            importing,
            skip_push_limit: sockstat::get_bool("import_skip_push_limit"),
            allow_bad_date: importing && sockstat::get_bool("allow_baddate_in_import"),
        }
    }
}

/// Assemble the `index-pack` argument list from the negotiated capabilities
/// and the repository configuration.
pub(crate) fn index_pack_args(
    config: &Config,
    capabilities: &Capabilities,
    import: ImportPolicy,
) -> crate::Result<Vec<String>> {
    let mut args = vec!["index-pack".to_owned(), "--stdin".to_owned()];

    if capabilities.use_side_band() {
        args.push("--report-end-of-input".to_owned());
        if !capabilities.quiet() {
            args.push("--show-resolving-progress".to_owned());
        }
    }

    args.push("--fix-thin".to_owned());

    if fsck_enabled(config) {
        let sub_options = config.get_prefix("receive.fsck.");
        if !sub_options.is_empty() || import.allow_bad_date {
            let mut options = Vec::new();
            for (key, values) in &sub_options {
                for value in values {
                    options.push(format!("{key}={value}"));
                }
            }
            if import.allow_bad_date {
                options.push("baddate=warn".to_owned());
            }
            args.push(format!("--strict={}", options.join(",")));
        } else {
            args.push("--strict".to_owned());
        }
    }

    let max_size = max_input_size(config, import)?;
    if max_size > 0 {
        args.push(format!("--max-input-size={max_size}"));
    }

    let warn_size = config.get_signed("receive.warnobjectsize")?.unwrap_or(0);
    if warn_size > 0 {
        args.push(format!("--warn-object-size={warn_size}"));
    }

    Ok(args)
}

fn fsck_enabled(config: &Config) -> bool {
    config.get("receive.fsckObjects") == Some("true")
        || config.get("transfer.fsckObjects") == Some("true")
}

fn max_input_size(config: &Config, import: ImportPolicy) -> crate::Result<i64> {
    if import.importing {
        // Imports push whole repositories at once and get a flat budget
        // instead of the per-push receive.maxsize.
        return Ok(if import.skip_push_limit {
            IMPORT_SKIP_LIMIT_MAX_INPUT_SIZE
        } else {
            IMPORT_MAX_INPUT_SIZE
        });
    }
    Ok(config.get_signed("receive.maxsize")?.unwrap_or(0))
}

/// Run `index-pack` over the remaining client input.
///
/// The side-band multiplexer is joined before the child's exit status is
/// consumed, so nothing can interleave with the report that follows.
#[allow(clippy::too_many_arguments)]
pub(crate) fn read_pack(
    source: PackSource<'_>,
    output: &mut (dyn Write + Send),
    repo_path: &Path,
    config: &Config,
    capabilities: &Capabilities,
    import: ImportPolicy,
    quarantine: &Quarantine,
    governor: &mut Conn,
) -> crate::Result<()> {
    let args = index_pack_args(config, capabilities, import)?;
    let use_side_band = capabilities.use_side_band();

    let mut cmd = std::process::Command::new("git");
    cmd.args(&args)
        .current_dir(repo_path)
        .stdin(match source {
            PackSource::InheritStdin => Stdio::inherit(),
            PackSource::Stream(_) => Stdio::piped(),
        })
        .stdout(Stdio::piped())
        .stderr(if use_side_band {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
    for (key, value) in quarantine.child_env() {
        cmd.env(key, value);
    }

    let mut child = ScopedChild::spawn(&mut cmd, "index-pack")?;
    let mut piped_stdin = match source {
        PackSource::Stream(_) => match child.take_stdin() {
            Some(stdin) => Some(stdin),
            None => return Err(Error::child("index-pack", "stdin unavailable")),
        },
        PackSource::InheritStdin => None,
    };
    let Some(mut child_stdout) = child.take_stdout() else {
        return Err(Error::child("index-pack", "stdout unavailable"));
    };
    let child_stderr = if use_side_band { child.take_stderr() } else { None };

    // Collect stdout off-thread; it is read back with a deadline after the
    // child exits so a wedged pipe cannot stall the push.
    let (stdout_tx, stdout_rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut collected = Vec::new();
        let _ = child_stdout.read_to_end(&mut collected);
        let _ = stdout_tx.send(collected);
    });

    let packet_max = capabilities.side_band_packet_max();
    let (copy_result, mux_result) = std::thread::scope(|scope| {
        let mux = child_stderr
            .map(|stderr| scope.spawn(move || multiplex_progress(stderr, output, packet_max)));

        // Feed (or hand over) the pack, closing our end before joining the
        // multiplexer: its EOF depends on the child finishing.
        let copy_result = match source {
            PackSource::InheritStdin => Ok(()),
            PackSource::Stream(input) => match piped_stdin.take() {
                Some(mut stdin) => std::io::copy(input, &mut stdin).map(|_| ()),
                None => Ok(()),
            },
        };

        let mux_result = match mux {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(PacketError::Io(std::io::Error::other(
                    "side-band multiplexer panicked",
                )))
            }),
            None => Ok(()),
        };
        (copy_result, mux_result)
    });

    let status = child.wait()?;
    if !status.success() {
        return Err(Error::child("index-pack", status.to_string()));
    }
    mux_result?;
    copy_result.map_err(|e| Error::io("streaming pack to 'index-pack'", e))?;

    match stdout_rx.recv_timeout(Duration::from_secs(1)) {
        Ok(collected) => record_pack_size(&collected, quarantine, governor),
        Err(_) => tracing::warn!("index-pack output was too slow"),
    }

    Ok(())
}

/// Forward child stderr to the client as band-2 packets until EOF.
fn multiplex_progress(
    mut stderr: std::process::ChildStderr,
    output: &mut (dyn Write + Send),
    packet_max: usize,
) -> Result<(), PacketError> {
    let mut writer = PacketWriter::new(output);
    let mut buf = vec![0u8; sideband::chunk_limit(packet_max)];
    loop {
        match stderr.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                writer.write_band(Band::Progress, &buf[..n])?;
                writer.flush()?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PacketError::Io(e)),
        }
    }
}

/// Record the indexed pack's on-disk size with the governor, if the child's
/// stdout names one.
fn record_pack_size(stdout: &[u8], quarantine: &Quarantine, governor: &mut Conn) {
    let Some(path) = indexed_pack_path(quarantine.pack_dir(), stdout) else {
        return;
    };
    if let Ok(metadata) = std::fs::metadata(&path) {
        governor.set_receive_pack_size(metadata.len() as i64);
    }
}

/// `index-pack --stdin` prints `pack\t<hex>` or `keep\t<hex>`; map that to
/// the pack file it wrote into the quarantine.
pub(crate) fn indexed_pack_path(pack_dir: PathBuf, stdout: &[u8]) -> Option<PathBuf> {
    let rest = stdout
        .strip_prefix(b"pack\t")
        .or_else(|| stdout.strip_prefix(b"keep\t"))?;
    let id = std::str::from_utf8(rest).ok()?.trim();
    if id.is_empty() || !id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    Some(pack_dir.join(format!("pack-{id}.pack")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entries: &str) -> Config {
        let mut raw = Vec::new();
        for entry in entries.split(';').filter(|e| !e.is_empty()) {
            let (key, value) = entry.split_once('=').expect("key=value");
            raw.extend_from_slice(key.as_bytes());
            raw.push(b'\n');
            raw.extend_from_slice(value.as_bytes());
            raw.push(0);
        }
        Config::from_list_output(&raw).unwrap()
    }

    fn caps(list: &str) -> Capabilities {
        Capabilities::parse(list.as_bytes()).unwrap()
    }

    #[test]
    fn baseline_args_are_stdin_and_fix_thin() {
        let args = index_pack_args(&config(""), &caps("report-status"), ImportPolicy::default())
            .unwrap();
        assert_eq!(args, vec!["index-pack", "--stdin", "--fix-thin"]);
    }

    #[test]
    fn side_band_enables_progress_reporting_unless_quiet() {
        let args = index_pack_args(
            &config(""),
            &caps("report-status side-band-64k"),
            ImportPolicy::default(),
        )
        .unwrap();
        assert_eq!(
            args,
            vec![
                "index-pack",
                "--stdin",
                "--report-end-of-input",
                "--show-resolving-progress",
                "--fix-thin"
            ]
        );

        let quiet = index_pack_args(
            &config(""),
            &caps("report-status side-band-64k quiet"),
            ImportPolicy::default(),
        )
        .unwrap();
        assert!(!quiet.contains(&"--show-resolving-progress".to_owned()));
        assert!(quiet.contains(&"--report-end-of-input".to_owned()));
    }

    #[test]
    fn fsck_objects_turns_on_strict() {
        for key in ["receive.fsckobjects", "transfer.fsckobjects"] {
            let args = index_pack_args(
                &config(&format!("{key}=true")),
                &caps("report-status"),
                ImportPolicy::default(),
            )
            .unwrap();
            assert!(args.contains(&"--strict".to_owned()), "{key}");
        }
    }

    #[test]
    fn fsck_sub_options_are_flattened_into_strict() {
        let args = index_pack_args(
            &config("receive.fsckobjects=true;receive.fsck.baddate=ignore;receive.fsck.missingemail=warn"),
            &caps("report-status"),
            ImportPolicy::default(),
        )
        .unwrap();
        assert!(args.contains(&"--strict=baddate=ignore,missingemail=warn".to_owned()));
    }

    #[test]
    fn imports_may_downgrade_bad_dates_to_warnings() {
        let import = ImportPolicy {
            importing: true,
            skip_push_limit: false,
            allow_bad_date: true,
        };
        let args = index_pack_args(&config("receive.fsckobjects=true"), &caps("report-status"), import)
            .unwrap();
        assert!(args.contains(&"--strict=baddate=warn".to_owned()));
    }

    #[test]
    fn max_input_size_comes_from_config() {
        let args = index_pack_args(
            &config("receive.maxsize=2k"),
            &caps("report-status"),
            ImportPolicy::default(),
        )
        .unwrap();
        assert!(args.contains(&"--max-input-size=2048".to_owned()));

        let unset = index_pack_args(&config(""), &caps("report-status"), ImportPolicy::default())
            .unwrap();
        assert!(!unset.iter().any(|a| a.starts_with("--max-input-size")));
    }

    #[test]
    fn imports_get_flat_size_budgets() {
        let import = ImportPolicy {
            importing: true,
            ..Default::default()
        };
        let args =
            index_pack_args(&config("receive.maxsize=1"), &caps("report-status"), import).unwrap();
        assert!(args.contains(&format!("--max-input-size={}", 40_i64 * 1024 * 1024 * 1024)));

        let skip = ImportPolicy {
            importing: true,
            skip_push_limit: true,
            ..Default::default()
        };
        let args =
            index_pack_args(&config("receive.maxsize=1"), &caps("report-status"), skip).unwrap();
        assert!(args.contains(&format!("--max-input-size={}", 80_i64 * 1024 * 1024 * 1024)));
    }

    #[test]
    fn warn_object_size_is_forwarded() {
        let args = index_pack_args(
            &config("receive.warnobjectsize=1m"),
            &caps("report-status"),
            ImportPolicy::default(),
        )
        .unwrap();
        assert!(args.contains(&format!("--warn-object-size={}", 1 << 20)));
    }

    #[test]
    fn unparsable_sizes_fail() {
        assert!(index_pack_args(
            &config("receive.maxsize=NaN"),
            &caps("report-status"),
            ImportPolicy::default(),
        )
        .is_err());
    }

    #[test]
    fn pack_and_keep_stdout_lines_name_the_pack_file() {
        let dir = PathBuf::from("/q/pack");
        assert_eq!(
            indexed_pack_path(dir.clone(), b"pack\tdeadbeef\n"),
            Some(PathBuf::from("/q/pack/pack-deadbeef.pack"))
        );
        assert_eq!(
            indexed_pack_path(dir.clone(), b"keep\tdeadbeef\n"),
            Some(PathBuf::from("/q/pack/pack-deadbeef.pack"))
        );
        assert_eq!(indexed_pack_path(dir.clone(), b"pack\tDEADBEEF\n"), None);
        assert_eq!(indexed_pack_path(dir.clone(), b"pack\t\n"), None);
        assert_eq!(indexed_pack_path(dir, b"something else"), None);
    }
}
