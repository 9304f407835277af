/*!
Server side of the push protocol for spokes-hosted repositories.

This crate implements the receive half of the v0/v1 smart transport against
a bare repository: it advertises references (honoring hide/unhide rules and
fork alternates), reads the client's reference-update commands, stages the
incoming pack into a quarantine object directory via `git index-pack`,
verifies reachability with `git rev-list`, and reports per-reference
outcomes, optionally multiplexed over the side-band.

The object store itself is deliberately a black box: everything goes through
child `git` processes (`for-each-ref`, `index-pack`, `rev-list`,
`merge-base`, `rev-parse`, `config`). The surrounding pieces — configuration
snapshot, sockstat environment, the governor resource-scheduling handshake —
live in their own modules and are composed by [`protocol::SpokesReceivePack`].
*/

pub mod config;
pub mod connectivity;
pub mod fallback;
pub mod governor;
pub mod interrupt;
pub mod object_format;
pub mod pack;
pub mod process;
pub mod protocol;
pub mod quarantine;
pub mod sockstat;

use spokes_serve_core::{CapabilityError, PacketError};

/// Errors that abort a push outright.
///
/// Per-command outcomes are never surfaced this way; they are collected on
/// the commands themselves so the report can still be emitted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-contract client input.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Capabilities(#[from] CapabilityError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    ObjectFormat(#[from] object_format::ObjectFormatError),
    #[error("missing required sockstat var {0}")]
    MissingSockstatVar(&'static str),
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    /// A child process could not be run or exited unsuccessfully.
    #[error("{context}: {detail}")]
    Child { context: String, detail: String },
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn child(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Child {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
