//! Per-segment RTT sampling. Send timestamps are recorded by sequence number
//! on the sending direction; samples are emitted when the reverse direction's
//! ACKs cover them, either cumulatively or through the SACK scoreboard.
//! Retransmitted segments are never sampled (Karn's principle).

use crate::connection::{Connection, RttSample};
use crate::packet::Packet;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct RttSampler {
    /// Send timestamp per outstanding sequence number.
    sent: BTreeMap<u32, f64>,
}

impl RttSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly sent data segment.
    pub fn add_packet(&mut self, pkt: &Packet) {
        self.sent.insert(pkt.seq, pkt.ts);
    }

    /// Drops the record for a retransmitted segment. Its RTT can no longer be
    /// attributed to a single transmission.
    pub fn rexmit(&mut self, pkt: &Packet) {
        self.sent.remove(&pkt.seq);
    }

    /// Emits one sample per segment newly covered by `pkt`, walking stored
    /// sequences in ascending order. `con` is the connection the ACK arrived
    /// on; its scoreboard covers the data this sampler tracks.
    pub fn check_ack(&mut self, con: &mut Connection, pkt: &Packet) {
        let con_acked = con.acked.max(pkt.ack);
        let limit = con_acked.max(con.sacked);

        let candidates: Vec<(u32, f64)> =
            self.sent.range(..=limit).map(|(&seq, &ts)| (seq, ts)).collect();

        for (seq, sent_ts) in candidates {
            let sacked = con.sblocks.iter().any(|b| seq >= b.left && seq < b.right);
            if sacked || seq < pkt.ack {
                con.rtt_samples.push(RttSample { ts: pkt.ts, rtt: pkt.ts - sent_ts });
                self.sent.remove(&seq);
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> Vec<u32> {
        self.sent.keys().copied().collect()
    }
}
