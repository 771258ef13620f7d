use clap::Parser;
use flowspect_core::report;
use flowspect_core::{Analyzer, AnalyzerConfig, Capture};
use flowspect_log::FlowspectLogger;
use log::{Level, error, info, logger};
use std::io::Write;
use std::path::PathBuf;

pub mod config;

// Records queued to the log writer; the logger blocks rather than drops
// when a warning burst outruns the writer.
const LOG_BUFFER: usize = 4096;

/// Parses capture files and extracts information from TCP connections about
/// connection interruptions, recovery phases and reordering.
#[derive(Parser, Debug)]
#[command(name = "flowspect", version)]
struct Args {
    /// Capture file to analyse (classic pcap, Ethernet).
    pcapfile: PathBuf,

    /// Output in JSON format.
    #[arg(short, long)]
    json: bool,

    /// Analyse only the first TIMELIMIT seconds of each connection
    /// (0 = analyse all).
    #[arg(short, long, default_value_t = 0.0)]
    timelimit: f64,

    /// Use the Netradar server ports to select connections.
    #[arg(short, long)]
    netradar: bool,

    /// Optional TOML tuning file (sampling interval, interruption threshold).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Decrease output verbosity.
    #[arg(short, long)]
    quiet: bool,

    /// Debug message output.
    #[arg(short, long, conflicts_with = "quiet")]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.debug {
        Level::Debug
    } else if args.quiet {
        Level::Warn
    } else {
        Level::Info
    };
    FlowspectLogger::init(level, LOG_BUFFER).expect("logger already installed");

    let config = match config::handle(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            logger().flush();
            std::process::exit(1);
        }
    };

    let analyzer_config = AnalyzerConfig {
        timelimit: args.timelimit,
        netradar: args.netradar,
        interval: config.analysis.interval,
        min_interruption: config.analysis.min_interruption,
    };

    let mut capture = match Capture::open(&args.pcapfile) {
        Ok(capture) => capture,
        Err(e) => {
            error!("Cannot open capture {}: {e}", args.pcapfile.display());
            logger().flush();
            std::process::exit(1);
        }
    };

    let mut analyzer = Analyzer::new(analyzer_config);
    let mut frames = 0u64;
    while let Some(record) = capture.next_record() {
        analyzer.process_frame(record.ts, &record.frame);
        frames += 1;
    }
    info!(
        "{} frames processed, {} connection directions",
        frames,
        analyzer.connections().len()
    );

    let reports = report::build(analyzer.connections(), analyzer.config());

    let mut stdout = std::io::stdout().lock();
    for entry in &reports {
        let result = if args.json {
            match serde_json::to_string_pretty(entry) {
                Ok(json) => writeln!(stdout, "{json}"),
                Err(e) => {
                    error!("Failed to serialize report: {e}");
                    continue;
                }
            }
        } else {
            report::write_text(&mut stdout, entry)
        };
        if let Err(e) = result {
            error!("Failed to write report: {e}");
            break;
        }
    }

    logger().flush();
}
