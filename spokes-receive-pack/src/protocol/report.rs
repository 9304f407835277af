//! The final status report sent back to the client.
//!
//! The report is `unpack ok` or `unpack index-pack failed`, one line per
//! command in the order the commands arrived, and a flush. When the client
//! negotiated a side-band, the whole report (including its flush) is
//! chunked into band-1 packets followed by a top-level flush.

use std::io::Write;

use spokes_serve_core::{sideband, Band, Capabilities, PacketWriter};

use super::commands::{Command, CommandStatus};
use crate::Error;

/// Render the report packets into a buffer.
pub(crate) fn render_report(unpack_ok: bool, commands: &[Command]) -> crate::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut writer = PacketWriter::new(&mut buf);

    writer.write_packet(if unpack_ok {
        b"unpack ok\n"
    } else {
        b"unpack index-pack failed\n"
    })?;

    for command in commands {
        let mut line = Vec::with_capacity(command.refname().len() + 8);
        match command.status() {
            CommandStatus::Rejected(reason) => {
                line.extend_from_slice(b"ng ");
                line.extend_from_slice(command.refname());
                line.push(b' ');
                line.extend_from_slice(reason.as_bytes());
            }
            status => {
                line.extend_from_slice(status.report_token());
                line.push(b' ');
                line.extend_from_slice(command.refname());
            }
        }
        line.push(b'\n');
        writer.write_packet(&line)?;
    }

    writer.write_flush()?;
    Ok(buf)
}

/// Write the report to the client, framed per the negotiated capabilities.
pub(crate) fn send_report(
    out: &mut dyn Write,
    capabilities: &Capabilities,
    unpack_ok: bool,
    commands: &[Command],
) -> crate::Result<()> {
    let report = render_report(unpack_ok, commands)?;

    if !capabilities.use_side_band() {
        out.write_all(&report)
            .map_err(|e| Error::io("writing report to client", e))?;
        return Ok(());
    }

    let mut writer = PacketWriter::new(out);
    let limit = sideband::chunk_limit(capabilities.side_band_packet_max());
    for chunk in report.chunks(limit) {
        writer.write_band(Band::Primary, chunk)?;
    }
    writer.write_flush()?;
    Ok(())
}
