//! Fixed-interval throughput sampling: bytes newly acknowledged (cumulative
//! plus SACKed) and bytes newly sent by the reverse half, per time bucket.
//! Intervals with no ACK activity are emitted zero-filled so the sample list
//! covers the whole observation span.

use crate::connection::{SackBlock, TputSample};
use crate::packet::Packet;

#[derive(Debug)]
pub struct TputSampler {
    interval: f64,
    start_time: f64,
    /// ACK pointer at the start of the current interval.
    start_ack: u32,
    /// Reverse half's highest sent sequence at the start of the interval.
    high_sent: u32,
    initialized: bool,
}

impl TputSampler {
    pub fn new(interval: f64) -> Self {
        Self { interval, start_time: 0.0, start_ack: 0, high_sent: 0, initialized: false }
    }

    /// Advances the sampler to `pkt.ts`, emitting completed buckets into
    /// `out`. `acked` is the connection's cumulative ACK, `sblocks` its
    /// scoreboard, `half_high` the reverse half's highest sent sequence.
    pub fn check(
        &mut self,
        acked: u32,
        sblocks: &[SackBlock],
        half_high: Option<u32>,
        pkt: &Packet,
        out: &mut Vec<TputSample>,
    ) {
        if !self.initialized {
            self.start_time = pkt.ts;
            self.start_ack = acked.max(pkt.ack);
            self.high_sent = half_high.unwrap_or(0);
            self.initialized = true;
        }

        if pkt.ts - self.start_time <= self.interval {
            return;
        }

        // Newly acknowledged bytes: cumulative ACK advance plus the SACKed
        // ranges above the interval's ACK pointer.
        let mut max_acked = acked;
        let mut sacked_bytes = 0u64;
        for b in sblocks {
            if b.right > self.start_ack {
                sacked_bytes += u64::from(b.right - self.start_ack.max(b.left));
            }
            if b.right > max_acked {
                max_acked = b.right;
            }
        }
        let acked_bytes = u64::from(acked.saturating_sub(self.start_ack));
        self.start_ack = self.start_ack.max(max_acked);

        let sent = match half_high {
            Some(high) => {
                let sent = u64::from(high.saturating_sub(self.high_sent));
                self.high_sent = high;
                sent
            }
            None => 0,
        };

        out.push(TputSample {
            start: self.start_time,
            end: self.start_time + self.interval,
            acked: acked_bytes + sacked_bytes,
            sent,
        });
        self.start_time += self.interval;

        // Catch up over quiet spans with zero-filled buckets.
        while pkt.ts - self.start_time > self.interval {
            out.push(TputSample {
                start: self.start_time,
                end: self.start_time + self.interval,
                acked: 0,
                sent: 0,
            });
            self.start_time += self.interval;
        }
    }
}
