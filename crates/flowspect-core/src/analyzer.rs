//! The per-packet dispatcher. Binds each decoded packet to its connection,
//! applies the exit conditions, and routes to the data or ACK handling with
//! the detector call order the reordering heuristics depend on.

use crate::connection::{Connection, ConnectionTable, FlowKey, Rexmit, WindowSample};
use crate::interruption;
use crate::packet::Packet;
use crate::recovery;
use crate::reorder;
use crate::scoreboard;
use log::{debug, warn};

/// Process-wide analysis settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Per-connection analysis window in seconds; 0 analyzes the whole trace.
    pub timelimit: f64,
    /// Select connections by the Netradar server ports instead of by data.
    pub netradar: bool,
    /// Throughput bucket width in seconds.
    pub interval: f64,
    /// Minimum reported interruption duration in seconds.
    pub min_interruption: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self { timelimit: 0.0, netradar: false, interval: 0.050, min_interruption: 0.1 }
    }
}

/// Consumes packets in arrival order and accumulates per-connection state.
/// Single-threaded: every handler runs to completion before the next packet,
/// so replaying a trace reproduces the output exactly.
#[derive(Debug)]
pub struct Analyzer {
    cfg: AnalyzerConfig,
    table: ConnectionTable,
}

impl Analyzer {
    pub fn new(cfg: AnalyzerConfig) -> Self {
        Self { cfg, table: ConnectionTable::new() }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.cfg
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.table
    }

    /// Decodes and processes one captured frame. Per-frame problems are
    /// reported and the frame dropped; the analysis continues.
    pub fn process_frame(&mut self, ts: f64, frame: &[u8]) {
        match Packet::decode(ts, frame) {
            Ok(Some(pkt)) => self.process_packet(pkt),
            Ok(None) => {} // not IPv4/TCP
            Err(e) => {
                let preview = hex::encode(&frame[..frame.len().min(24)]);
                warn!("dropping undecodable frame at {ts:.6}: {e} ({preview}...)");
            }
        }
    }

    /// Processes one decoded packet.
    pub fn process_packet(&mut self, pkt: Packet) {
        let key = FlowKey::of(&pkt);
        let Some(idx) = self.table.find(&key) else {
            debug!("new connection {key}");
            self.table.insert(Connection::new(&pkt, self.cfg.interval));
            return;
        };

        // Resolve the reverse half lazily; keep looking until it appears.
        if self.table.get(idx).half.is_none() {
            let found = self.table.find_half(&key);
            self.table.get_mut(idx).half = found;
        }
        let half_idx = self.table.get(idx).half;
        let (con_start, con_acked) = {
            let con = self.table.get(idx);
            (con.con_start, con.acked)
        };

        // An old ACK below the cumulative ACK is ACK reordering; drop it.
        if !pkt.carries_data && pkt.ack < con_acked {
            return;
        }

        // Past the per-connection analysis window only the disorder
        // end-check still runs, on the side that owns the phase.
        if self.cfg.timelimit > 0.0 && pkt.ts > con_start + self.cfg.timelimit {
            if pkt.carries_data {
                if let Some(h) = half_idx {
                    recovery::check_end(self.table.get_mut(h), &pkt);
                }
            } else {
                recovery::check_end(self.table.get_mut(idx), &pkt);
            }
            return;
        }

        match half_idx {
            Some(h) => {
                let (con, half) = self.table.pair_mut(idx, h);
                if pkt.carries_data {
                    process_data(con, Some(half), &pkt);
                } else {
                    process_ack(con, Some(half), &pkt);
                }
                process_general(con, &pkt);
            }
            None => {
                let con = self.table.get_mut(idx);
                if pkt.carries_data {
                    process_data(con, None, &pkt);
                } else {
                    process_ack(con, None, &pkt);
                }
                process_general(con, &pkt);
            }
        }
    }
}

/// Data path: new data advances the send frontier, everything else is a
/// retransmission to classify (fast retransmit vs timeout) and to remember
/// for the reordering detectors on the reverse half.
fn process_data(con: &mut Connection, mut half: Option<&mut Connection>, pkt: &Packet) {
    if pkt.seq > con.high {
        con.high = pkt.seq;
        con.high_len = pkt.tcp_data_len;
        con.rtt.add_packet(pkt);
        return;
    }

    // Not new data. A retransmitted segment can no longer yield an RTT
    // sample (Karn).
    con.rtt.rexmit(pkt);
    let seq = pkt.seq;

    if !con.rexmit.contains_key(&seq) {
        let (hole_ts, flightsize) = match half.as_deref() {
            Some(h) => (h.sack_hole_ts(seq), h.flightsize),
            None => (-1.0, -1),
        };
        let mut rto = match half.as_deref() {
            Some(h) => h.interr_rexmits > 0 || h.disorder_rto > 0,
            None => false,
        };
        // A timeout after only a handful of SACKed segments retransmits from
        // at or above the SACK frontier.
        if let Some(h) = half.as_deref()
            && h.sacked > 0
            && seq >= h.sacked
        {
            rto = true;
        }

        con.rexmit.insert(
            seq,
            Rexmit {
                len: pkt.tcp_data_len,
                tsval: pkt.opts.tsval,
                acked: false,
                rto,
                hole_ts,
                flightsize,
                reordered: false,
            },
        );

        if let Some(h) = half.as_deref_mut() {
            if h.disorder > 0.0 {
                if h.disorder_rto == 0 {
                    h.disorder_fret += 1;
                } else {
                    h.disorder_rto += 1;
                }
            } else {
                // Retransmission outside disorder: a timeout.
                h.interr_rexmits += 1;
                if h.interr_rto_tsval == 0 {
                    h.interr_rto_tsval = pkt.opts.tsval;
                }
                if let Some(rx) = con.rexmit.get_mut(&seq) {
                    rx.rto = true;
                }
                debug!("RTO (timeout) at {:.6}", pkt.ts);
            }
        }
    } else {
        // The segment was already retransmitted once: a timeout by
        // definition.
        debug!("RTO (2nd rexmit) at {:.6}", pkt.ts);
        if let Some(rx) = con.rexmit.get_mut(&seq) {
            rx.rto = true;
        }
        if let Some(h) = half.as_deref_mut() {
            if h.disorder > 0.0 {
                h.disorder_rto += 1;
            } else {
                h.interr_rexmits += 1;
            }
        }
    }
}

/// ACK path. The call order is load-bearing: hole detection against the old
/// scoreboard, DSACK detection, scoreboard merge (which signals closed holes
/// itself), retransmission coverage, then hole bookkeeping, sampling,
/// interruption and phase end.
fn process_ack(con: &mut Connection, mut half: Option<&mut Connection>, pkt: &Packet) {
    reorder::detection_sack(con, half.as_deref_mut(), pkt);
    reorder::detection_dsack(con, half.as_deref_mut(), pkt);
    scoreboard::update(con, half.as_deref_mut(), pkt);
    reorder::detection_retrans(con, half.as_deref_mut(), pkt);
    reorder::maintain_sack_holes(con, pkt);

    if let Some(h) = half.as_deref_mut() {
        h.rtt.check_ack(con, pkt);
    }
    let half_high = half.as_deref().map(|h| h.high);
    con.tput.check(con.acked, &con.sblocks, half_high, pkt, &mut con.tput_samples);

    interruption::detect(con, pkt);
    recovery::check_end(con, pkt);
    reorder::update_flightsize(con, half.as_deref(), pkt);
}

/// Runs for every non-dropped packet after the routed handling: counters,
/// flag latching, receive-window sampling, and the cumulative ACK advance.
fn process_general(con: &mut Connection, pkt: &Packet) {
    if pkt.opts.sack {
        con.sack += 1;
    }
    if pkt.opts.dsack {
        con.dsack += 1;
    }

    if pkt.carries_data {
        con.all += 1;
        con.bytes += u64::from(pkt.tcp_data_len);
        if pkt.tcp_data_len > con.mss {
            con.mss = pkt.tcp_data_len;
        }
    } else if con.rcv_wscale >= 0 {
        let window = u64::from(pkt.win) << con.rcv_wscale as u32;
        if con.rcv_win.last().map(|w| w.window) != Some(window) {
            con.rcv_win.push(WindowSample { ts: pkt.ts, window });
        }
    }

    if pkt.flags.rst {
        con.rst = true;
    }
    if pkt.flags.fin {
        con.fin = true;
    }
    if pkt.opts.tsval != 0 {
        con.ts_opt = true;
    }

    con.last_ts = pkt.ts;
    if pkt.ack > con.acked {
        con.acked = pkt.ack;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{TcpFlags, TcpOptions};
    use std::net::Ipv4Addr;

    const SENDER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const RECEIVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    /// Data segment from the sender, 100 bytes unless stated otherwise.
    fn data(ts: f64, seq: u32, len: u32, tsval: u32) -> Packet {
        Packet {
            ts,
            src: SENDER,
            dst: RECEIVER,
            sport: 40000,
            dport: 6007,
            seq,
            ack: 0,
            win: 1000,
            tcp_data_len: len,
            carries_data: true,
            flags: TcpFlags { ack: true, psh: true, ..Default::default() },
            opts: TcpOptions { wscale: -1, tsval, tsecr: 1, ..Default::default() },
        }
    }

    /// Pure ACK from the receiver, optionally with SACK blocks.
    fn ack(ts: f64, ackno: u32, blocks: &[(u32, u32)], tsval: u32, tsecr: u32) -> Packet {
        let mut sack_blocks = Vec::new();
        for &(l, r) in blocks {
            sack_blocks.push(l);
            sack_blocks.push(r);
        }
        let mut opts = TcpOptions {
            wscale: -1,
            tsval,
            tsecr,
            sack: !sack_blocks.is_empty(),
            sack_blocks,
            ..Default::default()
        };
        // Same inference the frame decoder applies.
        if opts.sack && opts.sack_blocks.len() >= 2 && ackno >= opts.sack_blocks[1] {
            opts.dsack = true;
        }
        Packet {
            ts,
            src: RECEIVER,
            dst: SENDER,
            sport: 6007,
            dport: 40000,
            seq: 0,
            ack: ackno,
            win: 1000,
            tcp_data_len: 0,
            carries_data: false,
            flags: TcpFlags { ack: true, ..Default::default() },
            opts,
        }
    }

    fn sender_con<'a>(an: &'a Analyzer) -> &'a Connection {
        let key = FlowKey::of(&data(0.0, 0, 100, 0));
        an.connections().get(an.connections().find(&key).unwrap())
    }

    fn receiver_con<'a>(an: &'a Analyzer) -> &'a Connection {
        let key = FlowKey::of(&ack(0.0, 0, &[], 0, 0));
        an.connections().get(an.connections().find(&key).unwrap())
    }

    /// Clean transfer: ten segments, cumulative ACKs, nothing to report.
    #[test]
    fn test_clean_connection_no_loss() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        for i in 0..10u32 {
            an.process_packet(data(f64::from(i) * 0.01, i * 100, 100, 100 + i));
        }
        for i in 1..=10u32 {
            an.process_packet(ack(0.1 + f64::from(i) * 0.01, i * 100, &[], 500 + i, 100 + i - 1));
        }

        let snd = sender_con(&an);
        assert_eq!(snd.all, 10);
        assert_eq!(snd.bytes, 1000);
        assert_eq!(snd.high, 900);
        assert!(snd.rexmit.is_empty());

        let rcv = receiver_con(&an);
        assert!(rcv.reor_extents.is_empty());
        assert!(rcv.dreor_extents.is_empty());
        assert!(rcv.disorder_phases.is_empty());
        assert_eq!(rcv.reorder, 0);
        assert_eq!(rcv.acked, 1000);
        assert_eq!(rcv.rtt_samples.len(), 10);
        // The inter-ACK candidates are all far below a real interruption.
        assert!(rcv.interruptions.iter().all(|i| i.end - i.start < 0.1));
    }

    /// Fast retransmit: dup-ACKs with growing SACK blocks, one retransmit,
    /// recovery closes with the cumulative ACK.
    fn run_fast_retransmit(an: &mut Analyzer) {
        for i in 0..10u32 {
            an.process_packet(data(f64::from(i) * 0.01, i * 100, 100, 100 + i));
        }
        an.process_packet(ack(0.20, 100, &[(200, 300)], 500, 102));
        an.process_packet(ack(0.21, 100, &[(200, 400)], 501, 103));
        an.process_packet(ack(0.22, 100, &[(200, 500)], 502, 104));
        an.process_packet(data(0.25, 100, 100, 250)); // retransmit
    }

    #[test]
    fn test_fast_retransmit_phase() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        run_fast_retransmit(&mut an);
        an.process_packet(ack(0.30, 500, &[], 503, 250));

        let snd = sender_con(&an);
        let rx = snd.rexmit.get(&100).expect("retransmission recorded");
        assert!(rx.acked);
        assert!(!rx.rto);
        assert!(!rx.reordered);

        let rcv = receiver_con(&an);
        assert_eq!(rcv.disorder_phases.len(), 1);
        let phase = rcv.disorder_phases[0];
        assert_eq!(phase.start, 0.20);
        assert_eq!(phase.end, 0.30);
        assert_eq!(phase.frets, 1);
        assert_eq!(phase.rtos, 0);
        assert!(!phase.spurious);
        // The hole had a retransmission, so no SACK-hole reordering.
        assert!(rcv.reor_extents.is_empty());
        assert_eq!(rcv.reorder, 0);
        assert_eq!(rcv.reorder_rexmit, 0);
    }

    /// The retransmitted hole is reported through DSACK: the original copy
    /// of seq 100 arrived after the retransmit.
    #[test]
    fn test_reordering_detected_by_dsack() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        run_fast_retransmit(&mut an);
        // Receiver got both copies: cumulative ACK plus DSACK for [100,200).
        an.process_packet(ack(0.32, 500, &[(100, 200)], 503, 250));

        let rcv = receiver_con(&an);
        assert_eq!(rcv.dreorder, 1);
        assert_eq!(rcv.dreor_extents.len(), 1);
        let d = rcv.dreor_extents[0];
        // max(acked, sacked) - dsack right edge = 500 - 200.
        assert_eq!(d.extent_abs, 300);
        // Flightsize was captured on the half when the retransmit happened.
        assert!((d.extent_rel - 300.0 / 800.0).abs() < 1e-9);
        // The hole [100,200) was first seen on the second dup-ACK at 0.21.
        assert!((d.reor_delay - (0.32 - 0.21)).abs() < 1e-9);
        // TSecr matched the retransmission, so the rexmit detector stays out.
        assert_eq!(rcv.reorder_rexmit, 0);

        let snd = sender_con(&an);
        assert!(snd.rexmit.get(&100).unwrap().acked);
    }

    /// The cumulative ACK covers the retransmitted segment but echoes a
    /// timestamp older than the retransmission: the original arrived, the
    /// retransmit was spurious.
    #[test]
    fn test_reordering_detected_by_retransmit_timestamps() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        run_fast_retransmit(&mut an);
        // TSecr 101 is the original transmission of seq 100, not the 250 of
        // the retransmission.
        an.process_packet(ack(0.30, 500, &[], 503, 101));

        let rcv = receiver_con(&an);
        assert_eq!(rcv.reorder_rexmit, 1);
        assert_eq!(rcv.reor_extents.len(), 1);
        let e = rcv.reor_extents[0];
        assert_eq!(e.reason, crate::connection::ReorderReason::Rexmit);
        // max(ack, sacked) - rseq = 500 - 100.
        assert_eq!(e.extent_abs, 400);

        let snd = sender_con(&an);
        let rx = snd.rexmit.get(&100).unwrap();
        assert!(rx.acked);
        assert!(rx.reordered);

        // The phase carries the spurious retransmit and is marked spurious
        // since its only fret was spurious.
        let phase = rcv.disorder_phases[0];
        assert_eq!(phase.frets, 1);
        assert_eq!(phase.spurious_rexmits, 1);
        assert!(phase.spurious);
    }

    /// A SACK hole closed by the cumulative ACK without any retransmission:
    /// the "lost" segment arrived late.
    #[test]
    fn test_sack_hole_closed_without_retransmission() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        for i in 0..4u32 {
            an.process_packet(data(f64::from(i) * 0.01, i * 100, 100, 100 + i));
        }
        an.process_packet(ack(0.10, 100, &[(200, 300)], 500, 101));
        an.process_packet(ack(0.12, 100, &[(200, 400)], 501, 102));
        // Seq 100 arrives late at the receiver; the ACK jumps to 400.
        an.process_packet(ack(0.20, 400, &[], 502, 103));

        let rcv = receiver_con(&an);
        assert_eq!(rcv.reorder, 1);
        assert_eq!(rcv.reor_extents.len(), 1);
        let e = rcv.reor_extents[0];
        assert_eq!(e.reason, crate::connection::ReorderReason::SackHole);
        // sacked - hole left edge = 400 - 100.
        assert_eq!(e.extent_abs, 300);
        assert!((e.reor_delay - (0.20 - 0.12)).abs() < 1e-9);

        let snd = sender_con(&an);
        assert!(snd.rexmit.is_empty());
        // The phase closed without retransmits; the reporter counts it as
        // reordering without retransmission.
        assert_eq!(rcv.disorder_phases.len(), 1);
        assert_eq!(rcv.disorder_phases[0].frets, 0);
    }

    /// A retransmission timeout bridges a silent gap; the interruption
    /// carries the RTO count.
    #[test]
    fn test_interruption_with_rto() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        an.process_packet(ack(0.0, 0, &[], 10, 0));
        an.process_packet(data(0.0, 0, 100, 100));
        an.process_packet(data(1.0, 0, 100, 1000)); // RTO retransmit
        an.process_packet(ack(1.2, 100, &[], 11, 1000));

        let snd = sender_con(&an);
        let rx = snd.rexmit.get(&0).unwrap();
        assert!(rx.rto);

        let rcv = receiver_con(&an);
        assert_eq!(rcv.interruptions.len(), 1);
        let i = rcv.interruptions[0];
        assert_eq!(i.start, 0.0);
        assert_eq!(i.end, 1.2);
        assert_eq!(i.rtos, 1);
        assert!(!i.spurious);
        assert_eq!(rcv.interr_rexmits, 0);
        assert_eq!(rcv.interr_rto_tsval, 0);
        // Karn: the retransmitted segment must not produce an RTT sample.
        assert!(rcv.rtt_samples.is_empty());
    }

    /// Same timeout, but the ACK echoes a timestamp older than the RTO's
    /// TSval: the retransmission was unnecessary.
    #[test]
    fn test_spurious_rto_interruption() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        an.process_packet(ack(0.0, 0, &[], 10, 0));
        an.process_packet(data(0.0, 0, 100, 100));
        an.process_packet(data(1.0, 0, 100, 1000)); // RTO retransmit
        an.process_packet(ack(1.2, 100, &[], 11, 900));

        let rcv = receiver_con(&an);
        assert_eq!(rcv.interruptions.len(), 1);
        assert!(rcv.interruptions[0].spurious);
    }

    #[test]
    fn test_old_ack_dropped_as_ack_reordering() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        an.process_packet(data(0.0, 0, 100, 100));
        an.process_packet(ack(0.1, 100, &[], 10, 100));
        an.process_packet(ack(0.2, 100, &[], 11, 100));
        let before = receiver_con(&an).interruptions.len();

        // This ACK is older than the connection's cumulative ACK.
        an.process_packet(ack(0.3, 50, &[], 12, 100));
        let rcv = receiver_con(&an);
        assert_eq!(rcv.acked, 100);
        assert_eq!(rcv.interruptions.len(), before);
        assert_eq!(rcv.last_ts, 0.2);
    }

    #[test]
    fn test_second_retransmission_counts_as_rto_in_disorder() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        run_fast_retransmit(&mut an);
        // Retransmit seq 100 again before recovery closes.
        an.process_packet(data(0.28, 100, 100, 280));

        let snd = sender_con(&an);
        assert!(snd.rexmit.get(&100).unwrap().rto);
        let rcv = receiver_con(&an);
        assert_eq!(rcv.disorder_fret, 1);
        assert_eq!(rcv.disorder_rto, 1);
    }

    #[test]
    fn test_timelimit_stops_per_connection_processing() {
        let mut an = Analyzer::new(AnalyzerConfig { timelimit: 0.5, ..Default::default() });
        an.process_packet(data(0.0, 0, 100, 100));
        an.process_packet(ack(0.1, 100, &[], 10, 100));
        an.process_packet(data(0.2, 100, 100, 101));
        // Both directions are past their windows now.
        an.process_packet(data(0.9, 200, 100, 102));
        an.process_packet(ack(1.0, 300, &[], 11, 102));

        let snd = sender_con(&an);
        assert_eq!(snd.high, 100);
        assert_eq!(snd.all, 2);
        let rcv = receiver_con(&an);
        assert_eq!(rcv.acked, 100);
    }

    #[test]
    fn test_receive_window_sampled_on_change() {
        let mut an = Analyzer::new(AnalyzerConfig::default());
        an.process_packet(data(0.0, 0, 100, 100));
        let mut syn_ack = ack(0.01, 0, &[], 1, 0);
        syn_ack.flags.syn = true;
        syn_ack.opts.wscale = 2;
        an.process_packet(syn_ack);

        let mut a1 = ack(0.1, 100, &[], 2, 100);
        a1.win = 500;
        an.process_packet(a1);
        let mut a2 = ack(0.2, 100, &[], 3, 100);
        a2.win = 500;
        an.process_packet(a2);
        let mut a3 = ack(0.3, 100, &[], 4, 100);
        a3.win = 600;
        an.process_packet(a3);

        let rcv = receiver_con(&an);
        assert_eq!(rcv.rcv_wscale, 2);
        let windows: Vec<u64> = rcv.rcv_win.iter().map(|w| w.window).collect();
        assert_eq!(windows, vec![2000, 2400]);
    }
}
