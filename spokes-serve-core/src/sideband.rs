//! Side-band channel framing.
//!
//! A side-band packet is an ordinary pkt-line whose first payload byte names
//! the channel: `\x01` carries the primary stream, `\x02` progress and
//! diagnostics, `\x03` a fatal error message.

/// A side-band channel tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Band {
    Primary = 1,
    Progress = 2,
    Fatal = 3,
}

/// Packet budget negotiated by the plain `side-band` capability.
pub const NARROW_PACKET_MAX: usize = 999;

/// Packet budget negotiated by `side-band-64k`.
pub const WIDE_PACKET_MAX: usize = 65519;

/// How many content bytes fit in one band packet for the given budget.
///
/// The 5 reserved bytes cover the length header and the channel tag, so a
/// band packet never exceeds the pkt-line payload maximum.
pub fn chunk_limit(packet_max: usize) -> usize {
    packet_max.saturating_sub(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_limit_reserves_header_and_tag() {
        assert_eq!(chunk_limit(NARROW_PACKET_MAX), 994);
        assert_eq!(chunk_limit(WIDE_PACKET_MAX), 65514);
    }

    #[test]
    fn band_tags_match_the_wire() {
        assert_eq!(Band::Primary as u8, 1);
        assert_eq!(Band::Progress as u8, 2);
        assert_eq!(Band::Fatal as u8, 3);
    }
}
