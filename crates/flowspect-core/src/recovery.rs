//! Disorder phase tracking: from the first SACK block after a clean
//! scoreboard until the scoreboard drains with a cumulative ACK advance.
//! Fast retransmits, RTOs and spurious retransmits within the phase are
//! counted by the retransmission bookkeeping and collected here on exit.

use crate::connection::{Connection, DisorderPhase};
use crate::packet::Packet;
use log::debug;

/// Called after new SACK blocks landed on a previously empty scoreboard.
/// Outside an active RTO this starts a disorder phase and captures the
/// recovery point and flightsize for relative-extent calculations.
pub fn check_start(con: &mut Connection, half: Option<&Connection>, pkt: &Packet, newly_sacked: u32) {
    if con.sblocks.is_empty() {
        return;
    }
    con.sacked = newly_sacked;
    if con.interr_rexmits == 0 {
        // No SACK blocks so far, now there are new incoming: disorder begins.
        con.disorder = pkt.ts;
        if let Some(half) = half
            && half.high > 0
        {
            con.recovery_point = half.high.wrapping_add(half.high_len);
            con.flightsize = i64::from(con.recovery_point) - i64::from(pkt.ack);
        }
        debug!(
            "disorder begin (new SACK blocks) {:?} at {:.6}, recovery point {}, flightsize {}",
            pkt.opts.sack_blocks, pkt.ts, con.recovery_point, con.flightsize
        );
    }
}

/// Closes the disorder phase once the scoreboard is empty and the cumulative
/// ACK advanced (the bare empty scoreboard is not sufficient for RTOs).
pub fn check_end(con: &mut Connection, pkt: &Packet) {
    if con.sblocks.is_empty() && con.disorder > 0.0 && pkt.ack > con.acked {
        let spurious = con.disorder_spurrexmit == con.disorder_fret;

        con.disorder_phases.push(DisorderPhase {
            start: con.disorder,
            end: pkt.ts,
            frets: con.disorder_fret,
            rtos: con.disorder_rto,
            spurious,
            spurious_rexmits: con.disorder_spurrexmit,
        });

        con.disorder = 0.0;
        con.disorder_fret = 0;
        con.disorder_rto = 0;
        con.sacked = 0;
        con.disorder_spurrexmit = 0;
        con.flightsize = 0;
        con.recovery_point = 0;

        debug!("disorder end at {:.6}", pkt.ts);
    }
}
