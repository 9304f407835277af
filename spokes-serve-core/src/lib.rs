/*!
Transport-level building blocks shared by spokes smart-protocol servers.

This crate owns the pieces of the v0/v1 pack protocol that are independent of
any particular service: pkt-line framing, capability-list parsing, side-band
channel framing, and the hide/unhide visibility rules applied to reference
advertisements. The receive side (`spokes-receive-pack`) composes these into
the push state machine.

Design principles
- Zero I/O in constructors and configuration APIs.
- Payloads are opaque bytes; nothing here assumes UTF-8 refnames.
- Typed errors per concern, aggregated by the caller.
*/

#![forbid(unsafe_code)]

pub mod capabilities;
pub mod pktline;
pub mod sideband;
pub mod visibility;

pub use capabilities::{is_safe_capability_value, Capabilities, CapabilityError};
pub use pktline::{Packet, PacketError, PacketReader, PacketWriter};
pub use sideband::Band;
pub use visibility::HideRules;
