//! Detection of the repository's object-id hash family.

use std::path::Path;
use std::process::Command;

/// The all-zeros SHA-1 object id.
pub const NULL_OID_SHA1: &str = "0000000000000000000000000000000000000000";

/// The all-zeros SHA-256 object id.
pub const NULL_OID_SHA256: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, thiserror::Error)]
pub enum ObjectFormatError {
    #[error("reading git object format: {0}")]
    Exec(std::io::Error),
    #[error("reading git object format: git rev-parse exited with {0}")]
    Failed(std::process::ExitStatus),
    #[error("unknown object format: {0}")]
    Unknown(String),
}

/// The hash family a repository stores objects under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Sha1,
    Sha256,
}

impl ObjectFormat {
    /// Ask `git rev-parse --show-object-format` for the repository at `repo`.
    pub fn detect(repo: &Path) -> Result<Self, ObjectFormatError> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-object-format"])
            .current_dir(repo)
            .output()
            .map_err(ObjectFormatError::Exec)?;
        if !output.status.success() {
            return Err(ObjectFormatError::Failed(output.status));
        }
        String::from_utf8_lossy(&output.stdout).trim().parse()
    }

    /// The all-zeros object id of this format's length.
    pub fn null_oid(self) -> &'static str {
        match self {
            ObjectFormat::Sha1 => NULL_OID_SHA1,
            ObjectFormat::Sha256 => NULL_OID_SHA256,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectFormat::Sha1 => "sha1",
            ObjectFormat::Sha256 => "sha256",
        }
    }
}

impl std::str::FromStr for ObjectFormat {
    type Err = ObjectFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(ObjectFormat::Sha1),
            "sha256" => Ok(ObjectFormat::Sha256),
            other => Err(ObjectFormatError::Unknown(other.to_owned())),
        }
    }
}

impl std::fmt::Display for ObjectFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `oid` is the null object id of either supported format.
pub fn is_null_oid(oid: &str) -> bool {
    oid == NULL_OID_SHA1 || oid == NULL_OID_SHA256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_formats_parse() {
        assert_eq!("sha1".parse::<ObjectFormat>().unwrap(), ObjectFormat::Sha1);
        assert_eq!("sha256".parse::<ObjectFormat>().unwrap(), ObjectFormat::Sha256);
        assert!(matches!(
            "sha512".parse::<ObjectFormat>(),
            Err(ObjectFormatError::Unknown(_))
        ));
    }

    #[test]
    fn null_oids_have_the_right_lengths() {
        assert_eq!(ObjectFormat::Sha1.null_oid().len(), 40);
        assert_eq!(ObjectFormat::Sha256.null_oid().len(), 64);
        assert!(ObjectFormat::Sha1.null_oid().bytes().all(|b| b == b'0'));
    }

    #[test]
    fn null_oid_predicate_accepts_both_lengths() {
        assert!(is_null_oid(NULL_OID_SHA1));
        assert!(is_null_oid(NULL_OID_SHA256));
        assert!(!is_null_oid("6a9ee41101de417acd4db5b7a18b66a5e1b54496"));
        assert!(!is_null_oid("0000"));
    }
}
