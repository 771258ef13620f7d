//! SACK scoreboard maintenance. Merges incoming SACK blocks into the sorted,
//! disjoint set of already-SACKed ranges, purges ranges below the cumulative
//! ACK, and signals closed holes to the reordering engine at the exact point
//! a merge reveals them.
//!
//! Detection is interleaved with the structural updates on purpose: the
//! classification of a closed hole depends on the scoreboard state at the
//! moment of the merge, before coalescing rewrites it.

use crate::connection::{Connection, SackBlock};
use crate::packet::Packet;
use crate::recovery;
use crate::reorder;

/// Applies the SACK information of `pkt` to `con`'s scoreboard.
pub fn update(con: &mut Connection, mut half: Option<&mut Connection>, pkt: &Packet) {
    let ack = pkt.ack;
    let blocks = &pkt.opts.sack_blocks;

    // Purge: ranges at or below the cumulative ACK are no longer SACK state.
    con.sblocks.retain(|b| b.right > ack);

    let newly_sacked = blocks.iter().copied().max().unwrap_or(0);

    if !con.sblocks.is_empty() {
        // Merge each new block, in wire order, against the existing board.
        for new in blocks.chunks_exact(2) {
            let (nl, nr) = (new[0], new[1]);
            let mut done = false;
            let existing = con.sblocks.len();
            for i in 0..existing {
                if nr <= ack {
                    // DSACK reflection of already-acked data.
                    done = true;
                    break;
                }
                if nl >= con.sblocks[i].left && nr <= con.sblocks[i].right {
                    // Block already known.
                    done = true;
                    break;
                }

                let mut save_hole = 0u32;
                let mut newly_acked: Vec<u32> = Vec::new();

                if nl == con.sblocks[i].left && nr > con.sblocks[i].right {
                    // Extends upward. The old right edge closed a hole only
                    // if a block follows; past the last block there is no
                    // hole to close.
                    if i < existing - 1 {
                        save_hole = con.sblocks[i].right;
                    }
                    newly_acked.push(con.sblocks[i].right);
                    con.sblocks[i].right = nr;
                    done = true;
                } else if nl < con.sblocks[i].left && nr == con.sblocks[i].right && !done {
                    // Extends downward.
                    save_hole = nl;
                    newly_acked.push(nl);
                    con.sblocks[i].left = nl;
                    done = true;
                } else if nl < con.sblocks[i].left && nr > con.sblocks[i].right && !done {
                    // Extends both ways (lost ACKs); no single closed hole to
                    // attribute.
                    newly_acked.push(nl);
                    newly_acked.push(con.sblocks[i].left);
                    con.sblocks[i].left = nl;
                    con.sblocks[i].right = nr;
                    done = true;
                }

                reorder::reorder_sack(save_hole, newly_sacked, con, half.as_deref_mut(), pkt);
                reorder::sack_retrans(&newly_acked, half.as_deref_mut());
            }

            // No existing block matched: insert in sort order. Landing
            // between two blocks closes the hole at the new left edge.
            if !done && !con.sblocks.is_empty() {
                let mut inserted = false;
                for j in 0..con.sblocks.len() {
                    if con.sblocks[j].left >= nr {
                        con.sblocks.insert(j, SackBlock { left: nl, right: nr });
                        reorder::reorder_sack(nl, newly_sacked, con, half.as_deref_mut(), pkt);
                        reorder::sack_retrans(&[nl], half.as_deref_mut());
                        inserted = true;
                        break;
                    }
                }
                if !inserted {
                    let last = con.sblocks[con.sblocks.len() - 1].right;
                    if last < nl {
                        // Starts after the last block; nothing closed.
                        con.sblocks.push(SackBlock { left: nl, right: nr });
                    }
                }
            }
        }
    } else {
        // Empty board: take every block above the ACK state, then let the
        // recovery engine decide whether a disorder phase starts.
        for new in blocks.chunks_exact(2) {
            let (nl, nr) = (new[0], new[1]);
            if nl <= ack.max(con.acked) {
                continue;
            }
            let pos = con.sblocks.iter().position(|b| b.left >= nl).unwrap_or(con.sblocks.len());
            con.sblocks.insert(pos, SackBlock { left: nl, right: nr });
        }
        recovery::check_start(con, half.as_deref(), pkt, newly_sacked);
    }

    if newly_sacked > con.sacked {
        con.sacked = newly_sacked;
    }

    coalesce(&mut con.sblocks);
}

/// Repeatedly merges overlapping or touching neighbours until the board is
/// disjoint again. Restarts from the front after every structural change;
/// indices are stale once a block is removed.
fn coalesce(sblocks: &mut Vec<SackBlock>) {
    let mut done = false;
    while !done {
        done = true;
        let mut i = 0;
        while i + 1 < sblocks.len() {
            let (a, b) = (sblocks[i], sblocks[i + 1]);
            if a.left <= b.left && a.right >= b.right {
                // First includes second.
                sblocks.remove(i + 1);
                done = false;
                break;
            }
            if a.left >= b.left && a.right <= b.right {
                // Second includes first.
                sblocks.remove(i);
                done = false;
                break;
            }
            if a.right >= b.left {
                // Touching or overlapping edges.
                sblocks[i].right = b.right;
                sblocks.remove(i + 1);
                done = false;
                break;
            }
            i += 1;
        }
    }
}
