//! Parsing of the client's reference-update commands.
//!
//! After the advertisement the client sends one pkt-line per command,
//! `<old-oid> <new-oid> <refname>`, optionally preceded by `shallow <oid>`
//! lines, terminated by a flush. The first command line carries the
//! client's capability list after a NUL (split off in the pkt-line layer).

use std::io::Read;

use bstr::{BString, ByteSlice};
use spokes_serve_core::{Capabilities, HideRules, Packet, PacketReader};

use crate::object_format::is_null_oid;
use crate::Error;

/// Rejection reason for pushes that target a hidden ref.
pub const HIDDEN_REF_REASON: &str = "deny updating a hidden ref";

/// The outcome recorded for one command, reported to the client at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    /// Not yet decided.
    Pending,
    Ok,
    /// The update was determined to be a fast-forward.
    FastForward,
    /// The update was determined not to be a fast-forward.
    NonFastForward,
    /// Refused, with the reason sent to the client.
    Rejected(String),
}

impl CommandStatus {
    pub fn is_rejected(&self) -> bool {
        matches!(self, CommandStatus::Rejected(_))
    }

    /// The status token used on a non-rejected report line.
    pub(crate) fn report_token(&self) -> &'static [u8] {
        match self {
            CommandStatus::FastForward => b"ff",
            CommandStatus::NonFastForward => b"nf",
            _ => b"ok",
        }
    }
}

/// One reference-update command as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    old_oid: String,
    new_oid: String,
    refname: BString,
    status: CommandStatus,
}

impl Command {
    pub fn old_oid(&self) -> &str {
        &self.old_oid
    }

    pub fn new_oid(&self) -> &str {
        &self.new_oid
    }

    pub fn refname(&self) -> &[u8] {
        &self.refname
    }

    pub fn status(&self) -> &CommandStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: CommandStatus) {
        self.status = status;
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = CommandStatus::Rejected(reason.into());
    }

    /// A delete sets the ref to the null object id.
    pub fn is_delete(&self) -> bool {
        is_null_oid(&self.new_oid)
    }

    /// An update moves the ref between two existing objects.
    pub fn is_update(&self) -> bool {
        !is_null_oid(&self.old_oid) && !is_null_oid(&self.new_oid)
    }

    /// Parse one command payload: two 40–64 digit lowercase hex ids and a
    /// non-empty refname, separated by single spaces. A trailing newline is
    /// tolerated.
    pub(crate) fn parse(payload: &[u8]) -> Option<Self> {
        let line = payload.strip_suffix(b"\n").unwrap_or(payload);
        let first = line.iter().position(|&b| b == b' ')?;
        let (old, rest) = (&line[..first], &line[first + 1..]);
        let second = rest.iter().position(|&b| b == b' ')?;
        let (new, refname) = (&rest[..second], &rest[second + 1..]);

        if !is_oid(old) || !is_oid(new) || refname.is_empty() || refname.contains(&b'\n') {
            return None;
        }

        Some(Command {
            // is_oid guarantees ASCII hex.
            old_oid: String::from_utf8_lossy(old).into_owned(),
            new_oid: String::from_utf8_lossy(new).into_owned(),
            refname: BString::from(refname),
            status: CommandStatus::Pending,
        })
    }
}

fn is_oid(hex: &[u8]) -> bool {
    (40..=64).contains(&hex.len())
        && hex.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Everything the command-read phase produced. The later phases take this
/// by value or reference, so a report cannot be written without it.
#[derive(Debug, Default)]
pub struct CommandSet {
    pub commands: Vec<Command>,
    /// Shallow boundaries announced by the client; collected, not consumed.
    pub shallow: Vec<String>,
    /// The capability set from the first command line.
    pub capabilities: Capabilities,
}

/// Read commands until the flush packet.
///
/// Commands that target a hidden ref are pre-rejected but still recorded so
/// they appear in the report. A positive `update_command_limit` caps the
/// number of commands; exceeding it fails the entire push.
pub fn read_commands<R: Read>(
    input: &mut R,
    hidden: &HideRules,
    update_command_limit: i64,
) -> crate::Result<CommandSet> {
    let mut reader = PacketReader::new();
    let mut set = CommandSet::default();
    let mut capabilities_seen = false;

    loop {
        let payload: Vec<u8> = match reader.read(input) {
            Ok(Some(Packet::Flush)) => break,
            Ok(Some(Packet::Heartbeat)) => continue,
            Ok(Some(Packet::Data(data))) => data.to_vec(),
            Ok(None) => {
                return Err(Error::Protocol(
                    "reading commands: unexpected EOF".to_owned(),
                ));
            }
            Err(e) => return Err(Error::Protocol(format!("reading commands: {e}"))),
        };

        if payload.starts_with(b"shallow") {
            let line = payload.strip_suffix(b"\n").unwrap_or(&payload);
            let mut parts = line.split_str(" ");
            match (parts.next(), parts.next(), parts.next()) {
                (Some(tag), Some(oid), None) if tag == b"shallow" && !oid.is_empty() => {
                    set.shallow.push(String::from_utf8_lossy(oid).into_owned());
                    continue;
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "wrong shallow structure: {}",
                        payload.as_bstr()
                    )));
                }
            }
        }

        if !capabilities_seen {
            capabilities_seen = true;
            if let Some(bytes) = reader.capability_bytes() {
                set.capabilities = Capabilities::parse(bytes)?;
            }
        }

        let Some(mut command) = Command::parse(&payload) else {
            return Err(Error::Protocol(format!(
                "bogus command: {}",
                payload.as_bstr()
            )));
        };
        if hidden.is_hidden(command.refname()) {
            command.reject(HIDDEN_REF_REASON);
        }
        set.commands.push(command);
    }

    if update_command_limit > 0 && set.commands.len() as i64 > update_command_limit {
        return Err(Error::Protocol(format!(
            "maximum ref updates exceeded: {} commands sent but max allowed is {}",
            set.commands.len(),
            update_command_limit
        )));
    }

    Ok(set)
}
