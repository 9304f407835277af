//! A read-once snapshot of the repository configuration.
//!
//! The snapshot is produced by a single `git config --list -z` run, so
//! `GIT_CONFIG_PARAMETERS` and all the usual file layers are honored without
//! this crate knowing anything about them.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading git configuration: {0}")]
    Exec(std::io::Error),
    #[error("reading git configuration: git config exited with {0}")]
    Failed(std::process::ExitStatus),
    #[error("invalid output from 'git config'")]
    InvalidOutput,
    #[error("invalid size value {0:?}")]
    InvalidSize(String),
}

/// One configuration entry as reported by `git config --list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

/// The configuration entries of one repository, in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    entries: Vec<ConfigEntry>,
}

impl Config {
    /// Snapshot the configuration of the repository at `repo`.
    pub fn read(repo: &Path) -> Result<Self, ConfigError> {
        let output = Command::new("git")
            .args(["config", "--list", "-z"])
            .current_dir(repo)
            .output()
            .map_err(ConfigError::Exec)?;
        if !output.status.success() {
            return Err(ConfigError::Failed(output.status));
        }
        Self::from_list_output(&output.stdout)
    }

    /// Parse the `key\nvalue\0` stream emitted by `git config --list -z`.
    pub fn from_list_output(mut data: &[u8]) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        while !data.is_empty() {
            let key_end = data
                .iter()
                .position(|&b| b == b'\n')
                .ok_or(ConfigError::InvalidOutput)?;
            let key = String::from_utf8_lossy(&data[..key_end]).into_owned();
            data = &data[key_end + 1..];

            let value_end = data
                .iter()
                .position(|&b| b == 0)
                .ok_or(ConfigError::InvalidOutput)?;
            let value = String::from_utf8_lossy(&data[..value_end]).into_owned();
            data = &data[value_end + 1..];

            entries.push(ConfigEntry { key, value });
        }
        Ok(Self { entries })
    }

    /// The last value recorded for `key`, or `None`. Keys compare
    /// ASCII-case-insensitively, matching git's own semantics.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value.as_str())
    }

    /// Every value recorded for `key`, in listing order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value.as_str())
            .collect()
    }

    /// All entries whose key starts with `prefix`, as a map from the key
    /// remainder to the values recorded for it, in listing order.
    pub fn get_prefix(&self, prefix: &str) -> BTreeMap<&str, Vec<&str>> {
        let mut result: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for entry in &self.entries {
            if entry.key.len() >= prefix.len()
                && entry.key.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
                && entry.key.is_char_boundary(prefix.len())
            {
                result
                    .entry(&entry.key[prefix.len()..])
                    .or_default()
                    .push(entry.value.as_str());
            }
        }
        result
    }

    /// The value of `key` run through [`parse_signed`], or `None` when the
    /// key is absent or empty.
    pub fn get_signed(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.get(key) {
            None | Some("") => Ok(None),
            Some(value) => parse_signed(value).map(Some),
        }
    }
}

/// Parse a signed integer with an optional `k`/`m`/`g` suffix standing for
/// 2^10, 2^20 and 2^30.
pub fn parse_signed(s: &str) -> Result<i64, ConfigError> {
    let invalid = || ConfigError::InvalidSize(s.to_owned());
    let (digits, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1i64 << 10),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1i64 << 20),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1i64 << 30),
        _ => (s, 1),
    };
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}
