//! Reordering detection. Four detectors run against scoreboard transitions,
//! cumulative-ACK advances, DSACK notifications and retransmission metadata:
//!
//! - [`detection_sack`]: a scoreboard hole closed by a cumulative ACK without
//!   any retransmission covering it means the "lost" segment arrived late.
//! - [`detection_dsack`]: a DSACK for a retransmitted segment whose echoed
//!   timestamp predates the retransmission means the original arrived after
//!   all (catches reordering beyond one RTT).
//! - [`detection_retrans`]: a cumulative ACK covering a retransmitted segment
//!   while echoing a timestamp older than the retransmission's TSval means
//!   the original, not the retransmit, was acknowledged.
//! - [`reorder_sack`]: holes closed by scoreboard merges, classified the same
//!   way at merge time.
//!
//! All detectors are no-ops while the reverse half is unknown; without it
//! there is no retransmission table to test against.

use crate::connection::{Connection, DsackReorderExtent, Hole, ReorderExtent, ReorderReason};
use crate::packet::Packet;
use log::{debug, warn};

/// Records one reordering extent on `con`. Zero offsets are not events.
pub(crate) fn add_reor_extent(
    con: &mut Connection,
    ts: f64,
    seq: u32,
    offset: i64,
    reason: ReorderReason,
) {
    if offset == 0 {
        return;
    }

    let extent_rel = if con.flightsize > 0 {
        offset as f64 / con.flightsize as f64
    } else {
        warn!("rel. reordering: no flightsize {seq}");
        -1.0
    };

    let hole_ts = con.sack_hole_ts(seq);
    let reor_delay = if hole_ts > -1.0 {
        ts - hole_ts
    } else {
        warn!("reor delay failed {seq}");
        -1.0
    };

    debug!(
        "addReorExtent: {} {} {:.2} {:?} at {ts:.6} delay {reor_delay}",
        offset, con.flightsize, extent_rel, reason
    );
    con.reor_extents.push(ReorderExtent { ts, extent_abs: offset, extent_rel, reason, reor_delay, hole_ts });
}

/// D1: holes cleared by a cumulative ACK advance. Walks every hole now being
/// covered; if the hole's first byte was never retransmitted the whole hole
/// was reordered, otherwise the walk skips past the retransmitted segment and
/// checks the remainder.
pub fn detection_sack(con: &mut Connection, half: Option<&mut Connection>, pkt: &Packet) {
    let Some(half) = half else { return };
    if con.sblocks.is_empty() || pkt.ack <= con.acked {
        return;
    }

    let mut holes: Vec<(u32, u32)> = Vec::new();
    if pkt.ack >= con.sblocks[0].left && con.acked < con.sblocks[0].left {
        holes.push((con.acked, con.sblocks[0].left));
    }
    for pair in con.sblocks.windows(2) {
        if pair[1].left <= pkt.ack {
            holes.push((pair[0].right, pair[1].left));
        }
    }
    if pkt.ack == half.high {
        let last = con.sblocks[con.sblocks.len() - 1];
        if half.high > last.right {
            holes.push((last.right, half.high));
        }
    }

    for (mut lo, hi) in holes {
        while lo != hi && con.disorder_rto == 0 {
            match half.rexmit.get(&lo) {
                None => {
                    // First byte of the hole was never retransmitted: the
                    // whole hole arrived late.
                    let offset = i64::from(con.sacked) - i64::from(lo);
                    debug!("reor hole [{lo}, {hi}) at {:.6}", pkt.ts);
                    add_reor_extent(con, pkt.ts, lo, offset, ReorderReason::SackHole);
                    con.reorder += 1;
                    break;
                }
                Some(rx) => {
                    lo = lo.wrapping_add(rx.len);
                }
            }
        }
    }
}

/// D2: DSACK-based detection, for reordering beyond one RTT. Also attributes
/// the spurious retransmit to the disorder phase containing the hole, marking
/// the phase spurious when all of its fast retransmits were.
pub fn detection_dsack(con: &mut Connection, half: Option<&mut Connection>, pkt: &Packet) {
    let Some(half) = half else { return };
    if !pkt.opts.dsack || !con.ts_opt || pkt.opts.sack_blocks.len() < 2 {
        return;
    }

    let dsack1 = pkt.opts.sack_blocks[0];
    let dsack2 = pkt.opts.sack_blocks[1];
    let Some(rx) = half.rexmit.get(&dsack1) else { return };
    // Only normal recovery counts, and only if this retransmission was not
    // already classified.
    if rx.rto || rx.reordered {
        return;
    }

    con.dreorder += 1;

    let extent_abs = i64::from(con.acked.max(con.sacked)) - i64::from(dsack2);
    let extent_rel = if rx.flightsize > 0 {
        extent_abs as f64 / rx.flightsize as f64
    } else {
        warn!("DSACK rel. reordering: no flightsize {dsack1}");
        -1.0
    };
    let reor_delay = if rx.hole_ts > -1.0 {
        pkt.ts - rx.hole_ts
    } else {
        warn!("DSACK reor delay failed {dsack1}");
        -1.0
    };

    debug!("reor DSACK {dsack1} {extent_abs} {extent_rel} {reor_delay} at {:.6}", pkt.ts);
    con.dreor_extents.push(DsackReorderExtent {
        ts: pkt.ts,
        extent_abs,
        extent_rel,
        reor_delay,
        hole_ts: rx.hole_ts,
    });

    // The retransmit was spurious; charge it to the phase it happened in.
    let hole_ts = rx.hole_ts;
    for phase in con.disorder_phases.iter_mut() {
        if hole_ts >= phase.start && hole_ts <= phase.end {
            phase.spurious_rexmits += 1;
            if phase.spurious_rexmits == phase.frets {
                phase.spurious = true;
            }
        }
    }
}

/// D3: a cumulative ACK covering a retransmitted segment. If the echoed
/// timestamp predates the retransmission's TSval, the receiver acknowledged
/// the original copy: reordered, not lost. The entry is marked acked either
/// way.
pub fn detection_retrans(con: &mut Connection, half: Option<&mut Connection>, pkt: &Packet) {
    let Some(half) = half else { return };
    if pkt.ack <= con.acked || pkt.opts.tsecr == 0 || con.disorder == 0.0 || con.disorder_rto != 0 {
        return;
    }

    for (&rseq, rx) in half.rexmit.iter_mut() {
        if rseq >= con.acked && rseq < pkt.ack {
            if pkt.opts.tsecr < rx.tsval && !rx.acked {
                let offset = i64::from(pkt.ack.max(con.sacked)) - i64::from(rseq);
                debug!("reor rexmit {rseq}, disorder since {:.6}", con.disorder);
                add_reor_extent(con, pkt.ts, rseq, offset, ReorderReason::Rexmit);
                con.reorder_rexmit += 1;
                con.disorder_spurrexmit += 1;
                rx.reordered = true;
            }
            rx.acked = true;
        }
    }
}

/// D4: a hole closed during a scoreboard merge. Called with the left edge of
/// the closed gap and the highest newly SACKed byte.
pub fn reorder_sack(
    save_hole: u32,
    newly_sacked: u32,
    con: &mut Connection,
    half: Option<&mut Connection>,
    pkt: &Packet,
) {
    let Some(half) = half else { return };

    let max_acked = con.sacked.max(newly_sacked);

    if save_hole == 0 || save_hole >= con.sacked || con.disorder_rto != 0 {
        return;
    }
    match half.rexmit.get_mut(&save_hole) {
        None => {
            let offset = i64::from(max_acked) - i64::from(save_hole);
            debug!("reor closed hole {save_hole}");
            add_reor_extent(con, pkt.ts, save_hole, offset, ReorderReason::SackHole);
            con.reorder += 1;
        }
        Some(rx) => {
            // The hole was retransmitted and is now SACKed.
            if pkt.opts.tsecr < rx.tsval && !rx.acked {
                con.reorder_rexmit += 1;
                con.disorder_spurrexmit += 1;
                let offset = i64::from(max_acked) - i64::from(save_hole);
                debug!("reor rexmit via SACK {save_hole}, disorder since {:.6}", con.disorder);
                rx.reordered = true;
                add_reor_extent(con, pkt.ts, save_hole, offset, ReorderReason::Rexmit);
            }
            rx.acked = true;
        }
    }
}

/// Marks retransmissions whose ranges were newly SACKed as acknowledged.
pub fn sack_retrans(newly_acked: &[u32], half: Option<&mut Connection>) {
    let Some(half) = half else { return };
    for seq in newly_acked {
        if let Some(rx) = half.rexmit.get_mut(seq) {
            // Retransmission ACKed by SACK.
            rx.acked = true;
        }
    }
}

/// Keeps the list of past scoreboard gaps current: drops holes below the
/// cumulative ACK and records newly observed gaps with their first-seen
/// timestamp. Runs on the ACK path after the scoreboard was updated.
pub fn maintain_sack_holes(con: &mut Connection, pkt: &Packet) {
    con.reor_holes.retain(|h| h.right > pkt.ack);

    for i in 0..con.sblocks.len() {
        let hole = if i == 0 {
            (pkt.ack, con.sblocks[i].left)
        } else {
            (con.sblocks[i - 1].right, con.sblocks[i].left)
        };

        let exists = con.reor_holes.iter().any(|h| hole.0 >= h.left && hole.1 <= h.right);
        if !exists {
            con.reor_holes.push(Hole { left: hole.0, right: hole.1, first_seen: pkt.ts });
        }
    }
}

/// Refreshes the recovery point and flightsize while a scoreboard is open and
/// the ACK has moved past the captured recovery point.
pub fn update_flightsize(con: &mut Connection, half: Option<&Connection>, pkt: &Packet) {
    let Some(half) = half else { return };
    if !con.sblocks.is_empty() && pkt.ack > con.recovery_point && half.high > 0 {
        con.recovery_point = half.high.wrapping_add(con.high_len);
        con.flightsize = i64::from(con.recovery_point) - i64::from(pkt.ack);
    }
}
