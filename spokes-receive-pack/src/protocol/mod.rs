//! The push state machine.
//!
//! One invocation walks a strictly linear sequence: reference discovery,
//! command read, push-options drain, pack intake, connectivity check,
//! status report. Each phase produces a typed result ([`CommandSet`], the
//! pack outcome) that the later phases consume, so they cannot run out of
//! order. Per-command outcomes are collected on the commands themselves and
//! never abort the sequence; only protocol violations do.

pub(crate) mod advertise;
mod commands;
mod report;

pub use commands::{read_commands, Command, CommandSet, CommandStatus, HIDDEN_REF_REASON};

use std::io::{Read, Write};
use std::path::PathBuf;

use spokes_serve_core::{is_safe_capability_value, HideRules, Packet, PacketReader};

use crate::config::Config;
use crate::connectivity::ConnectivityChecker;
use crate::governor::Conn;
use crate::interrupt::CancellationFlag;
use crate::object_format::ObjectFormat;
use crate::pack::{self, ImportPolicy, PackSource, PackStream};
use crate::quarantine::Quarantine;
use crate::{sockstat, Error};

/// Everything a session needs before any byte is exchanged.
#[derive(Debug)]
pub struct Session {
    pub repo_path: PathBuf,
    pub config: Config,
    pub object_format: ObjectFormat,
    pub stateless_rpc: bool,
    pub advertise_refs: bool,
    pub quarantine_id: String,
    pub version: &'static str,
    pub cancel: CancellationFlag,
    /// How the packfile reaches `index-pack`; see [`PackStream`].
    pub pack_stream: PackStream,
}

/// Compose the server's capability line.
pub(crate) fn capability_line(
    object_format: ObjectFormat,
    version: &str,
    config: &Config,
    session_id: &str,
) -> String {
    let mut line = format!(
        "report-status report-status-v2 delete-refs side-band-64k ofs-delta atomic \
         object-format={object_format} quiet agent=github/spokes-receive-pack-{version}"
    );
    if !session_id.is_empty() && is_safe_capability_value(session_id) {
        line.push_str(" session-id=");
        line.push_str(session_id);
    }
    if config.get("receive.advertisePushOptions") == Some("true") {
        line.push_str(" push-options");
    }
    line
}

/// The engine driving one push.
pub struct SpokesReceivePack<R, W> {
    input: R,
    output: W,
    capabilities: String,
    repo_path: PathBuf,
    config: Config,
    object_format: ObjectFormat,
    stateless_rpc: bool,
    advertise_refs: bool,
    quarantine: Quarantine,
    cancel: CancellationFlag,
    pack_stream: PackStream,
}

impl<R: Read, W: Write + Send> SpokesReceivePack<R, W> {
    pub fn new(input: R, output: W, session: Session) -> Self {
        let capabilities = capability_line(
            session.object_format,
            session.version,
            &session.config,
            &sockstat::get_string("request_id"),
        );
        let quarantine = Quarantine::new(&session.repo_path, &session.quarantine_id);
        Self {
            input,
            output,
            capabilities,
            repo_path: session.repo_path,
            config: session.config,
            object_format: session.object_format,
            stateless_rpc: session.stateless_rpc,
            advertise_refs: session.advertise_refs,
            quarantine,
            cancel: session.cancel,
            pack_stream: session.pack_stream,
        }
    }

    /// Run the push to completion.
    ///
    /// On success the quarantine is left in place for the downstream
    /// ref-update machinery; every error path removes it (see
    /// [`remove_quarantine`](Self::remove_quarantine) and the quarantine's
    /// own drop guard).
    pub fn execute(&mut self, governor: &mut Conn) -> crate::Result<()> {
        // Reference discovery runs over the full connection, and in
        // stateless-RPC mode only when this request is the advertisement
        // request.
        if self.advertise_refs || !self.stateless_rpc {
            self.cancel.check()?;
            let rules = self.hide_rules();
            let parent_repo_id = sockstat::get_uint32("parent_repo_id");
            let advertise_tags = !std::env::var("GIT_NW_ADVERTISE_TAGS")
                .unwrap_or_default()
                .is_empty();
            advertise::perform_reference_discovery(
                &mut self.output,
                &self.repo_path,
                &self.capabilities,
                self.object_format.null_oid(),
                &rules,
                parent_repo_id,
                advertise_tags,
            )?;
        }

        if self.advertise_refs {
            return Ok(());
        }

        self.cancel.check()?;
        let rules = self.hide_rules();
        let command_limit = self
            .config
            .get_signed("receive.refupdatecommandlimit")?
            .unwrap_or(0);
        let mut set = read_commands(&mut self.input, &rules, command_limit)?;
        if set.commands.is_empty() {
            return Ok(());
        }

        let mut push_options_count = 0;
        if set.capabilities.push_options() {
            push_options_count = self.drain_push_options()?;
        }
        let options_limit = self
            .config
            .get_signed("receive.pushoptionscountlimit")?
            .unwrap_or(0);
        if options_limit > 0 && push_options_count > options_limit {
            for command in &mut set.commands {
                command.reject("push options count exceeds maximum");
            }
        }

        self.cancel.check()?;
        let mut unpack_error = None;
        if set.commands.iter().any(|c| !c.is_delete()) {
            self.quarantine
                .create_dirs()
                .map_err(|e| Error::io("creating quarantine dirs", e))?;
            let import = ImportPolicy::from_sockstat();
            let source = match self.pack_stream {
                PackStream::InheritStdin => PackSource::InheritStdin,
                PackStream::Copy => PackSource::Stream(&mut self.input),
            };
            if let Err(e) = pack::read_pack(
                source,
                &mut self.output,
                &self.repo_path,
                &self.config,
                &set.capabilities,
                import,
                &self.quarantine,
                governor,
            ) {
                let reason = format!("error processing packfiles: {e}");
                for command in &mut set.commands {
                    command.reject(reason.clone());
                }
                unpack_error = Some(e);
            }
        }

        if unpack_error.is_none() {
            self.check_commands(&mut set);
        }

        if set.capabilities.report_status() || set.capabilities.report_status_v2() {
            report::send_report(
                &mut self.output,
                &set.capabilities,
                unpack_error.is_none(),
                &set.commands,
            )?;
        }
        self.output
            .flush()
            .map_err(|e| Error::io("flushing output to client", e))?;

        if let Some(e) = unpack_error {
            return Err(e);
        }

        self.quarantine.disarm();
        Ok(())
    }

    /// Decide per-command outcomes: reachability of the new tips, and
    /// fast-forward classification when `receive.reportStatusFF` asks for it.
    fn check_commands(&mut self, set: &mut CommandSet) {
        let checker = ConnectivityChecker::new(&self.repo_path, &self.quarantine);
        let collective_ok = match checker.check_connectivity(&set.commands) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "collective connectivity check failed");
                false
            }
        };
        let report_ff = self.config.get("receive.reportStatusFF") == Some("true");

        for command in &mut set.commands {
            if command.status().is_rejected() {
                continue;
            }
            command.set_status(CommandStatus::Ok);

            let mut missing_objects = false;
            if !collective_ok && !command.is_delete() {
                if let Err(e) = checker.check_object(command.new_oid()) {
                    tracing::debug!(error = %e, "per-object connectivity check failed");
                    command.reject("missing necessary objects");
                    missing_objects = true;
                }
            }

            if !missing_objects && command.is_update() && report_ff {
                command.set_status(
                    if checker.is_fast_forward(command.old_oid(), command.new_oid()) {
                        CommandStatus::FastForward
                    } else {
                        CommandStatus::NonFastForward
                    },
                );
            }
        }
    }

    /// Read the push-options block to its flush, counting the packets. The
    /// values themselves are not consumed here.
    fn drain_push_options(&mut self) -> crate::Result<i64> {
        let mut reader = PacketReader::new();
        let mut count = 0;
        loop {
            match reader.read(&mut self.input) {
                Ok(Some(Packet::Flush)) => return Ok(count),
                Ok(Some(Packet::Heartbeat)) => continue,
                Ok(Some(Packet::Data(_))) => count += 1,
                Ok(None) => {
                    return Err(Error::Protocol(
                        "error reading push-options: unexpected EOF".to_owned(),
                    ))
                }
                Err(e) => return Err(Error::Protocol(format!("error reading push-options: {e}"))),
            }
        }
    }

    fn hide_rules(&self) -> HideRules {
        let mut raw: Vec<String> = self
            .config
            .get_all("receive.hiderefs")
            .into_iter()
            .map(str::to_owned)
            .collect();
        raw.extend(
            self.config
                .get_all("transfer.hiderefs")
                .into_iter()
                .map(str::to_owned),
        );
        HideRules::new(raw)
    }

    /// Remove the quarantine directory; called on every failure path so no
    /// received objects survive a rejected push.
    pub fn remove_quarantine(&mut self) {
        self.quarantine.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entries: &[(&str, &str)]) -> Config {
        let mut raw = Vec::new();
        for (key, value) in entries {
            raw.extend_from_slice(key.as_bytes());
            raw.push(b'\n');
            raw.extend_from_slice(value.as_bytes());
            raw.push(0);
        }
        Config::from_list_output(&raw).unwrap()
    }

    #[test]
    fn capability_line_baseline() {
        let line = capability_line(ObjectFormat::Sha1, "0.3.0", &config(&[]), "");
        assert_eq!(
            line,
            "report-status report-status-v2 delete-refs side-band-64k ofs-delta atomic \
             object-format=sha1 quiet agent=github/spokes-receive-pack-0.3.0"
        );
    }

    #[test]
    fn capability_line_reflects_the_object_format() {
        let line = capability_line(ObjectFormat::Sha256, "0.3.0", &config(&[]), "");
        assert!(line.contains("object-format=sha256"));
    }

    #[test]
    fn safe_request_ids_become_the_session_id() {
        let line = capability_line(ObjectFormat::Sha1, "0.3.0", &config(&[]), "AAAA:BBBB");
        assert!(line.ends_with(" session-id=AAAA:BBBB"));
    }

    #[test]
    fn unsafe_request_ids_are_not_advertised() {
        let line = capability_line(ObjectFormat::Sha1, "0.3.0", &config(&[]), "two words");
        assert!(!line.contains("session-id"));
    }

    #[test]
    fn push_options_are_advertised_when_configured() {
        let cfg = config(&[("receive.advertisepushoptions", "true")]);
        let line = capability_line(ObjectFormat::Sha1, "0.3.0", &cfg, "");
        assert!(line.ends_with(" push-options"));

        let off = config(&[("receive.advertisepushoptions", "false")]);
        assert!(!capability_line(ObjectFormat::Sha1, "0.3.0", &off, "").contains("push-options"));
    }

    #[test]
    fn hide_rules_concatenate_receive_then_transfer() {
        let cfg = config(&[
            ("receive.hiderefs", "refs/pull/"),
            ("transfer.hiderefs", "refs/gh/"),
            ("receive.hiderefs", "refs/__gh__"),
        ]);
        let session = Session {
            repo_path: PathBuf::from("/nonexistent"),
            config: cfg,
            object_format: ObjectFormat::Sha1,
            stateless_rpc: true,
            advertise_refs: false,
            quarantine_id: "q".to_owned(),
            version: "0.3.0",
            cancel: CancellationFlag::new(),
            pack_stream: PackStream::Copy,
        };
        let rp = SpokesReceivePack::new(std::io::empty(), Vec::<u8>::new(), session);
        let rules = rp.hide_rules();
        assert_eq!(
            rules.exclude_patterns().collect::<Vec<_>>(),
            vec!["refs/pull/", "refs/__gh__", "refs/gh/"]
        );
    }
}
