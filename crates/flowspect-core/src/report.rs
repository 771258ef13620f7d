//! Report construction: one record per qualifying bidirectional connection,
//! serializable to JSON or printable as a human summary. The raw event lists
//! on the connections are filtered and aggregated here; detection never
//! depends on reporting.

use crate::analyzer::AnalyzerConfig;
use crate::connection::{ConnectionTable, DsackReorderExtent, ReorderExtent};
use log::warn;
use serde::Serialize;
use std::io;

/// Ports of the Netradar measurement servers.
const NETRADAR_PORTS: [u16; 2] = [6007, 6078];
const KILO: f64 = 1024.0;

#[derive(Debug, Serialize)]
pub struct OptionFlags {
    pub sack: u8,
    pub dsack: u8,
    pub ts: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptionInfo {
    pub start: f64,
    pub duration: f64,
    pub rtos: u32,
    pub spurious: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptionSummary {
    pub min_interruption: f64,
    /// Total interrupted time above the reporting threshold.
    pub time: f64,
    pub number: u32,
    pub with_rto: u32,
    pub spurious: u32,
    pub infos: Vec<InterruptionInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseInfo {
    pub start: f64,
    pub duration: f64,
    pub rexmits: u32,
    pub rtos: u32,
    pub spurious: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FastRecoverySummary {
    pub time: f64,
    pub number: u32,
    pub spurious: u32,
    pub with_rto: u32,
    pub total_frets: u32,
    pub infos: Vec<PhaseInfo>,
}

#[derive(Debug, Serialize)]
pub struct ReorderSummary {
    /// Disorder phases that closed without a single retransmission.
    #[serde(rename = "woRexmit")]
    pub wo_rexmit: u32,
    #[serde(rename = "sackHoles")]
    pub sack_holes: u64,
    pub rexmit: u64,
    pub extents: Vec<ReorderExtent>,
    #[serde(rename = "dsackts")]
    pub dsack_ts: u64,
    pub dextents: Vec<DsackReorderExtent>,
}

/// The per-connection output record. Serializes with the tool's stable JSON
/// key spelling.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub start: f64,
    pub duration: f64,
    /// Goodput in kbit/s over the whole duration.
    pub goodput: f64,
    /// Goodput scaled as if the interruption time did not exist.
    #[serde(rename = "goodputInterr")]
    pub goodput_wo_interruptions: f64,
    pub options: OptionFlags,
    pub interruptions: InterruptionSummary,
    #[serde(rename = "fastRecovery")]
    pub fast_recovery: FastRecoverySummary,
    pub reorder: ReorderSummary,

    // Only used by the human formatter.
    #[serde(skip)]
    pub segments: u64,
    #[serde(skip)]
    pub mss: u32,
}

/// Builds the report records. A connection qualifies when its reverse half
/// exists and either the half transmitted data (default) or the destination
/// port is a Netradar server port (netradar mode).
pub fn build(table: &ConnectionTable, cfg: &AnalyzerConfig) -> Vec<ConnectionReport> {
    let mut reports = Vec::new();

    for con in table.iter() {
        let Some(half_idx) = con.half else {
            warn!("no two way connection ({})", con.key);
            continue;
        };
        let half = table.get(half_idx);

        let selected = if cfg.netradar {
            NETRADAR_PORTS.contains(&con.key.dport)
        } else {
            half.all > 0
        };
        if !selected {
            continue;
        }

        let duration = if cfg.timelimit > 0.0 {
            cfg.timelimit
        } else {
            half.last_ts - half.con_start
        };
        if duration <= 0.0 {
            warn!("no duration ({})", con.key);
            continue;
        }

        let goodput = half.bytes as f64 * 8.0 / (duration * KILO);

        // Interruptions above the reporting threshold.
        let mut interr = InterruptionSummary {
            min_interruption: cfg.min_interruption,
            time: 0.0,
            number: 0,
            with_rto: 0,
            spurious: 0,
            infos: Vec::new(),
        };
        for entry in &con.interruptions {
            let gap = entry.end - entry.start;
            if gap > cfg.min_interruption {
                interr.infos.push(InterruptionInfo {
                    start: entry.start,
                    duration: gap,
                    rtos: entry.rtos,
                    spurious: entry.spurious,
                });
                interr.time += gap;
                interr.number += 1;
                if entry.rtos > 0 {
                    interr.with_rto += 1;
                }
                if entry.spurious {
                    interr.spurious += 1;
                }
            }
        }
        let goodput_wo_interruptions = if interr.time < duration {
            goodput * duration / (duration - interr.time)
        } else {
            goodput
        };

        // Fast recovery phases: only phases with retransmits count as
        // recovery; the rest are reordering the sender never reacted to.
        let mut recovery = FastRecoverySummary {
            time: 0.0,
            number: 0,
            spurious: 0,
            with_rto: 0,
            total_frets: 0,
            infos: Vec::new(),
        };
        let mut wo_rexmit = 0u32;
        for phase in &con.disorder_phases {
            if phase.frets > 0 {
                recovery.time += phase.end - phase.start;
                recovery.total_frets += phase.frets;
                recovery.number += 1;
                if phase.rtos > 0 {
                    recovery.with_rto += 1;
                }
                if phase.spurious {
                    recovery.spurious += 1;
                }
                recovery.infos.push(PhaseInfo {
                    start: phase.start,
                    duration: phase.end - phase.start,
                    rexmits: phase.frets,
                    rtos: phase.rtos,
                    spurious: phase.spurious,
                });
            } else {
                wo_rexmit += 1;
            }
        }

        reports.push(ConnectionReport {
            src_ip: con.key.src.to_string(),
            dst_ip: con.key.dst.to_string(),
            src_port: con.key.sport,
            dst_port: con.key.dport,
            start: con.con_start,
            duration,
            goodput,
            goodput_wo_interruptions,
            options: OptionFlags {
                sack: u8::from(con.sack > 0),
                dsack: u8::from(con.dsack > 0),
                ts: u8::from(con.ts_opt),
            },
            interruptions: interr,
            fast_recovery: recovery,
            reorder: ReorderSummary {
                wo_rexmit,
                sack_holes: con.reorder,
                rexmit: con.reorder_rexmit,
                extents: con.reor_extents.clone(),
                dsack_ts: con.dreorder,
                dextents: con.dreor_extents.clone(),
            },
            segments: half.all,
            mss: half.mss,
        });
    }

    reports
}

/// Writes the human-readable summary block for one connection.
pub fn write_text<W: io::Write>(out: &mut W, report: &ConnectionReport) -> io::Result<()> {
    writeln!(
        out,
        "{}:{} - {}:{} --> {} pkts in {:.2} s, MSS = {}, {:.2} kbit/s",
        report.src_ip,
        report.src_port,
        report.dst_ip,
        report.dst_port,
        report.segments,
        report.duration,
        report.mss,
        report.goodput
    )?;
    writeln!(
        out,
        "Options: SACK = {}, DSACK = {}, TS = {}",
        report.options.sack, report.options.dsack, report.options.ts
    )?;
    writeln!(
        out,
        "Connection interruption time: {:.2} s ( {} interruptions, {} with RTOs, {} spurious ) --> {:.2} kbit/s",
        report.interruptions.time,
        report.interruptions.number,
        report.interruptions.with_rto,
        report.interruptions.spurious,
        report.goodput_wo_interruptions
    )?;
    writeln!(
        out,
        "Fast recovery time: {:.2} s ( {} phases, {} spurious, {} with RTOs, {} total frets )",
        report.fast_recovery.time,
        report.fast_recovery.number,
        report.fast_recovery.spurious,
        report.fast_recovery.with_rto,
        report.fast_recovery.total_frets
    )?;
    writeln!(
        out,
        "Reorder: w/o retransmit = {} , closed SACK holes = {} , rexmits (TSval tested) = {} , DSACK+TS = {}",
        report.reorder.wo_rexmit,
        report.reorder.sack_holes,
        report.reorder.rexmit,
        report.reorder.dsack_ts
    )?;
    writeln!(out)
}
