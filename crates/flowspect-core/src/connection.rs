//! Per-direction connection state and the table that owns it.
//!
//! A `Connection` tracks one direction of a TCP flow (exact 4-tuple). The
//! reverse direction is its "half", resolved lazily and referenced by table
//! index; the table owns both, so no ownership cycle exists.

use crate::packet::Packet;
use crate::samples::{RttSampler, TputSampler};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::Ipv4Addr;

/// Exact 4-tuple identifying one direction of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
}

impl FlowKey {
    pub fn of(pkt: &Packet) -> Self {
        Self { src: pkt.src, dst: pkt.dst, sport: pkt.sport, dport: pkt.dport }
    }

    /// The key of the reverse direction.
    pub fn reversed(&self) -> Self {
        Self { src: self.dst, dst: self.src, sport: self.dport, dport: self.sport }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}:{}", self.src, self.sport, self.dst, self.dport)
    }
}

/// One SACKed byte range `[left, right)` on the scoreboard. Blocks are kept
/// sorted by `left` and pairwise disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub left: u32,
    pub right: u32,
}

/// A past gap in the scoreboard, kept to compute reordering delay. The
/// first-seen timestamp never changes once recorded.
#[derive(Debug, Clone, Copy)]
pub struct Hole {
    pub left: u32,
    pub right: u32,
    pub first_seen: f64,
}

/// Bookkeeping for one retransmitted segment, keyed by its original sequence
/// number. Entries live for the lifetime of the connection; only the flags
/// are ever mutated.
#[derive(Debug, Clone, Copy)]
pub struct Rexmit {
    pub len: u32,
    /// TSval carried by the retransmission.
    pub tsval: u32,
    pub acked: bool,
    pub rto: bool,
    /// First-seen timestamp of the hole the segment fell in, -1 if unknown.
    pub hole_ts: f64,
    /// Flightsize at the time of the retransmission, -1 if unknown.
    pub flightsize: i64,
    pub reordered: bool,
}

/// Candidate connection interruption: the gap between two processed ACKs.
/// The reporter filters these by minimum duration.
#[derive(Debug, Clone, Copy)]
pub struct Interruption {
    pub start: f64,
    pub end: f64,
    pub rtos: u32,
    pub spurious: bool,
}

/// A completed disorder phase: from the first SACK block after a clean
/// scoreboard until the scoreboard drained with a cumulative ACK advance.
#[derive(Debug, Clone, Copy)]
pub struct DisorderPhase {
    pub start: f64,
    pub end: f64,
    pub frets: u32,
    pub rtos: u32,
    pub spurious: bool,
    pub spurious_rexmits: u32,
}

/// What evidence produced a reordering extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReorderReason {
    #[serde(rename = "sackHole")]
    SackHole,
    #[serde(rename = "rexmit")]
    Rexmit,
}

/// A detected reordering event with its quantitative extent.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReorderExtent {
    pub ts: f64,
    #[serde(rename = "extentAbs")]
    pub extent_abs: i64,
    /// Extent relative to flightsize, -1 when flightsize was unknown.
    #[serde(rename = "extentRel")]
    pub extent_rel: f64,
    pub reason: ReorderReason,
    /// Time from first observation of the hole, -1 when no hole was stored.
    #[serde(rename = "reorDelay")]
    pub reor_delay: f64,
    #[serde(skip)]
    pub hole_ts: f64,
}

/// A reordering event detected through DSACK and timestamps.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DsackReorderExtent {
    pub ts: f64,
    #[serde(rename = "extentAbs")]
    pub extent_abs: i64,
    #[serde(rename = "extentRel")]
    pub extent_rel: f64,
    #[serde(rename = "reorDelay")]
    pub reor_delay: f64,
    #[serde(skip)]
    pub hole_ts: f64,
}

/// One RTT measurement, stamped with the ACK that produced it.
#[derive(Debug, Clone, Copy)]
pub struct RttSample {
    pub ts: f64,
    pub rtt: f64,
}

/// One fixed-width throughput bucket.
#[derive(Debug, Clone, Copy)]
pub struct TputSample {
    pub start: f64,
    pub end: f64,
    /// Bytes newly acknowledged in the bucket (cumulative + SACKed).
    pub acked: u64,
    /// Bytes newly sent by the reverse half in the bucket.
    pub sent: u64,
}

/// Advertised receive window after scaling, recorded on change.
#[derive(Debug, Clone, Copy)]
pub struct WindowSample {
    pub ts: f64,
    pub window: u64,
}

/// All mutable state for one direction of a connection.
#[derive(Debug)]
pub struct Connection {
    pub key: FlowKey,
    /// Table index of the reverse direction, resolved lazily.
    pub half: Option<usize>,

    pub con_start: f64,
    /// Timestamp of the last processed segment.
    pub last_ts: f64,

    // Counters
    /// Segments with payload.
    pub all: u64,
    /// Payload bytes.
    pub bytes: u64,
    /// Largest payload seen.
    pub mss: u32,
    /// Segments carrying SACK.
    pub sack: u64,
    /// Segments carrying DSACK.
    pub dsack: u64,
    /// Seen any timestamp option.
    pub ts_opt: bool,
    pub rst: bool,
    pub fin: bool,
    pub syn: bool,
    /// Window scale from the SYN, -1 when absent.
    pub rcv_wscale: i8,

    /// Cumulative ACK carried by segments of this direction.
    pub acked: u32,
    /// Highest byte ever SACKed; reset when a disorder phase closes.
    pub sacked: u32,
    /// Highest sequence sent in this direction and its payload length.
    pub high: u32,
    pub high_len: u32,

    /// Retransmissions of this direction's data, keyed by original sequence.
    pub rexmit: BTreeMap<u32, Rexmit>,
    /// SACK scoreboard for the reverse direction's data.
    pub sblocks: Vec<SackBlock>,
    /// Past scoreboard gaps, for reordering delay.
    pub reor_holes: Vec<Hole>,

    // Reordering counters
    /// Reorderings found through closed SACK holes.
    pub reorder: u64,
    /// Reordered retransmissions (TSval tested).
    pub reorder_rexmit: u64,
    /// DSACK+TS detected reorderings.
    pub dreorder: u64,

    // Disorder phase state, captured at entry
    pub disorder: f64,
    pub recovery_point: u32,
    pub flightsize: i64,
    pub disorder_fret: u32,
    pub disorder_rto: u32,
    pub disorder_spurrexmit: u32,

    // Interruption state
    pub interr_rexmits: u32,
    /// TSval of the first RTO during the current interruption.
    pub interr_rto_tsval: u32,

    // Event lists, all growing monotonically
    pub interruptions: Vec<Interruption>,
    pub disorder_phases: Vec<DisorderPhase>,
    pub reor_extents: Vec<ReorderExtent>,
    pub dreor_extents: Vec<DsackReorderExtent>,

    // Samples
    pub tput_samples: Vec<TputSample>,
    pub rtt_samples: Vec<RttSample>,
    pub rcv_win: Vec<WindowSample>,

    // Sampling engines
    pub rtt: RttSampler,
    pub tput: TputSampler,
}

impl Connection {
    /// Creates a connection seeded from its first observed packet.
    pub fn new(pkt: &Packet, tput_interval: f64) -> Self {
        let mut con = Self {
            key: FlowKey::of(pkt),
            half: None,
            con_start: pkt.ts,
            last_ts: pkt.ts,
            all: 0,
            bytes: 0,
            mss: 0,
            sack: 0,
            dsack: 0,
            ts_opt: pkt.opts.tsval != 0,
            rst: false,
            fin: false,
            syn: pkt.flags.syn,
            rcv_wscale: pkt.opts.wscale,
            acked: pkt.ack,
            sacked: 0,
            high: 0,
            high_len: 0,
            rexmit: BTreeMap::new(),
            sblocks: Vec::new(),
            reor_holes: Vec::new(),
            reorder: 0,
            reorder_rexmit: 0,
            dreorder: 0,
            disorder: 0.0,
            recovery_point: 0,
            flightsize: 0,
            disorder_fret: 0,
            disorder_rto: 0,
            disorder_spurrexmit: 0,
            interr_rexmits: 0,
            interr_rto_tsval: 0,
            interruptions: Vec::new(),
            disorder_phases: Vec::new(),
            reor_extents: Vec::new(),
            dreor_extents: Vec::new(),
            tput_samples: Vec::new(),
            rtt_samples: Vec::new(),
            rcv_win: Vec::new(),
            rtt: RttSampler::new(),
            tput: TputSampler::new(tput_interval),
        };

        if pkt.opts.sack {
            con.sack = 1;
            con.sacked = pkt.opts.sack_blocks.iter().copied().max().unwrap_or(0);
        }
        if pkt.opts.dsack {
            con.dsack = 1;
        }
        if pkt.carries_data {
            con.all = 1;
            con.bytes = u64::from(pkt.tcp_data_len);
            con.high = pkt.seq;
            con.high_len = pkt.tcp_data_len;
            con.mss = pkt.tcp_data_len;
            con.rtt.add_packet(pkt);
        }
        for pair in pkt.opts.sack_blocks.chunks_exact(2) {
            con.sblocks.push(SackBlock { left: pair[0], right: pair[1] });
            con.disorder = pkt.ts;
        }
        con
    }

    /// First-seen timestamp of the stored hole containing `seq`, -1 if none.
    pub fn sack_hole_ts(&self, seq: u32) -> f64 {
        for h in &self.reor_holes {
            if seq >= h.left && seq < h.right {
                return h.first_seen;
            }
        }
        -1.0
    }
}

/// Table of all connection directions, indexed by exact 4-tuple.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    cons: Vec<Connection>,
    index: HashMap<FlowKey, usize>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    pub fn find(&self, key: &FlowKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Looks up the reverse-direction connection for `key`.
    pub fn find_half(&self, key: &FlowKey) -> Option<usize> {
        self.index.get(&key.reversed()).copied()
    }

    pub fn insert(&mut self, con: Connection) -> usize {
        let idx = self.cons.len();
        self.index.insert(con.key, idx);
        self.cons.push(con);
        idx
    }

    pub fn get(&self, idx: usize) -> &Connection {
        &self.cons[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Connection {
        &mut self.cons[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.cons.iter()
    }

    /// Mutable access to a connection and its half at once. The two indices
    /// are distinct by construction (a key never equals its reverse here).
    pub fn pair_mut(&mut self, idx: usize, half: usize) -> (&mut Connection, &mut Connection) {
        debug_assert_ne!(idx, half);
        if idx < half {
            let (lo, hi) = self.cons.split_at_mut(half);
            (&mut lo[idx], &mut hi[0])
        } else {
            let (lo, hi) = self.cons.split_at_mut(idx);
            (&mut hi[0], &mut lo[half])
        }
    }
}
