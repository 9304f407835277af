//! Capability-list parsing for the v0/v1 pack protocol.
//!
//! A capability list is the NUL-delimited tail of the first advertisement
//! line (server to client) or the first command line (client to server):
//! space-separated `name[=value]` tokens. Everything the protocol defines is
//! parsed; the receive side only acts on the subset it advertises, and the
//! legacy fetch capabilities are parsed but ignored.

use std::collections::BTreeMap;

// Well-known capability names.
pub const MULTI_ACK: &str = "multi_ack";
pub const MULTI_ACK_DETAILED: &str = "multi_ack_detailed";
pub const NO_DONE: &str = "no-done";
pub const THIN_PACK: &str = "thin-pack";
pub const SIDE_BAND: &str = "side-band";
pub const SIDE_BAND_64K: &str = "side-band-64k";
pub const OFS_DELTA: &str = "ofs-delta";
pub const AGENT: &str = "agent";
pub const OBJECT_FORMAT: &str = "object-format";
pub const SYMREF: &str = "symref";
pub const SHALLOW: &str = "shallow";
pub const DEEPEN_SINCE: &str = "deepen-since";
pub const DEEPEN_NOT: &str = "deepen-not";
pub const DEEPEN_RELATIVE: &str = "deepen-relative";
pub const NO_PROGRESS: &str = "no-progress";
pub const INCLUDE_TAG: &str = "include-tag";
pub const REPORT_STATUS: &str = "report-status";
pub const REPORT_STATUS_V2: &str = "report-status-v2";
pub const DELETE_REFS: &str = "delete-refs";
pub const QUIET: &str = "quiet";
pub const ATOMIC: &str = "atomic";
pub const PUSH_OPTIONS: &str = "push-options";
pub const ALLOW_TIP_SHA1_IN_WANT: &str = "allow-tip-sha1-in-want";
pub const ALLOW_REACHABLE_SHA1_IN_WANT: &str = "allow-reachable-sha1-in-want";
pub const PUSH_CERT: &str = "push-cert";
pub const FILTER: &str = "filter";
pub const SESSION_ID: &str = "session-id";

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// A token contained more than one `=` or was not valid ASCII text.
    #[error("unexpected capability format {0:?}")]
    Malformed(String),
}

/// The set of capabilities a peer announced, as a name → value mapping.
///
/// Tokens without `=` map to an empty value; `get` distinguishes "absent"
/// from "present with empty value" by returning `Option`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    caps: BTreeMap<String, String>,
}

impl Capabilities {
    /// Parse a capability list as received on the wire. A trailing `\n` is
    /// stripped; tokens are split on single spaces.
    pub fn parse(bytes: &[u8]) -> Result<Self, CapabilityError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| CapabilityError::Malformed(String::from_utf8_lossy(bytes).into_owned()))?;
        let text = text.strip_suffix('\n').unwrap_or(text);

        let mut caps = BTreeMap::new();
        for token in text.split(' ').filter(|t| !t.is_empty()) {
            let mut parts = token.splitn(3, '=');
            let name = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            if parts.next().is_some() {
                return Err(CapabilityError::Malformed(token.to_owned()));
            }
            caps.insert(name.to_owned(), value.to_owned());
        }

        Ok(Self { caps })
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.caps.contains_key(name)
    }

    /// The value announced for `name`, or `None` if the capability is absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.caps.get(name).map(String::as_str)
    }

    /// All announced capability names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.caps.keys().map(String::as_str).collect()
    }

    pub fn report_status(&self) -> bool {
        self.is_defined(REPORT_STATUS)
    }

    pub fn report_status_v2(&self) -> bool {
        self.is_defined(REPORT_STATUS_V2)
    }

    pub fn quiet(&self) -> bool {
        self.is_defined(QUIET)
    }

    pub fn atomic(&self) -> bool {
        self.is_defined(ATOMIC)
    }

    pub fn push_options(&self) -> bool {
        self.is_defined(PUSH_OPTIONS)
    }

    pub fn agent(&self) -> Option<&str> {
        self.get(AGENT)
    }

    pub fn object_format(&self) -> Option<&str> {
        self.get(OBJECT_FORMAT)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.get(SESSION_ID)
    }

    /// True if the client negotiated either side-band flavor.
    pub fn use_side_band(&self) -> bool {
        self.is_defined(SIDE_BAND) || self.is_defined(SIDE_BAND_64K)
    }

    /// The negotiated side-band packet budget.
    pub fn side_band_packet_max(&self) -> usize {
        if self.is_defined(SIDE_BAND_64K) {
            crate::sideband::WIDE_PACKET_MAX
        } else {
            crate::sideband::NARROW_PACKET_MAX
        }
    }
}

/// A capability value is safe to put on an advertisement line only if it
/// cannot break the line or token framing.
pub fn is_safe_capability_value(value: &str) -> bool {
    !value.bytes().any(|b| matches!(b, b' ' | b'\r' | b'\n' | b'\t'))
}
