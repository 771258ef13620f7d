use chrono::Local;
use log::{Level, Log, Metadata, Record, SetLoggerError, set_boxed_logger, set_max_level};
use std::io::{BufWriter, Write, stderr};
use std::sync::mpsc;
use std::thread;

/// Messages handed to the writer thread.
pub enum LogCommand {
    Record(String),
    Flush,
    Terminate,
}

/// Logger for the trace analyzer.
///
/// The per-packet error policy of the analysis (warn and continue) only works
/// if the warnings actually reach the user, so delivery is lossless: records
/// are formatted on the calling thread and handed to the writer thread over a
/// bounded channel with a *blocking* send. A pathological trace that floods
/// the channel with per-frame warnings stalls the analysis loop on the
/// channel instead of losing diagnostics.
///
/// The writer drains each burst in one go and flushes between bursts, so
/// warnings show up on the terminal while the run is still going, without a
/// syscall per record. Output goes to stderr; stdout carries the report.
pub struct FlowspectLogger {
    max_level: Level,
    sender: mpsc::SyncSender<LogCommand>,
}

impl FlowspectLogger {
    pub fn new(max_level: Level, buffer_size: usize) -> (Self, mpsc::Receiver<LogCommand>) {
        let (sender, receiver) = mpsc::sync_channel(buffer_size);

        let logger = FlowspectLogger { max_level, sender };
        (logger, receiver)
    }

    pub fn init(max_level: Level, buffer_size: usize) -> Result<(), SetLoggerError> {
        let (logger, receiver) = FlowspectLogger::new(max_level, buffer_size);

        let _handle = thread::Builder::new()
            .name("flowspect-log-writer".into())
            .spawn(move || writer_loop(receiver))
            .expect("Failed to spawn logger thread");

        set_boxed_logger(Box::new(logger))?;
        set_max_level(max_level.to_level_filter());
        Ok(())
    }

    /// Detector debug lines carry their module so a `--debug` run can be
    /// traced back to the component that spoke; the user-facing levels stay
    /// short. Time of day is enough context for an offline run.
    fn format(&self, record: &Record) -> String {
        let now = Local::now().format("%H:%M:%S%.3f");
        if record.level() >= Level::Debug {
            format!("{now} {} [{}] {}\n", record.level(), record.target(), record.args())
        } else {
            format!("{now} {} {}\n", record.level(), record.args())
        }
    }
}

impl Log for FlowspectLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = self.format(record);
            // Blocks when the writer is behind; diagnostics are never
            // dropped.
            if self.sender.send(LogCommand::Record(message)).is_err() {
                eprintln!("[FlowspectLogger] writer thread gone: {}", record.args());
            }
        }
    }

    fn flush(&self) {
        let _ = self.sender.send(LogCommand::Flush);
    }
}

fn writer_loop(receiver: mpsc::Receiver<LogCommand>) {
    let mut writer = BufWriter::new(stderr());

    'sleep: while let Ok(first) = receiver.recv() {
        // A wakeup usually means a burst; take everything that is already
        // queued before paying for a flush.
        let mut command = first;
        loop {
            match command {
                LogCommand::Record(message) => {
                    if let Err(e) = writer.write_all(message.as_bytes()) {
                        eprintln!("[FlowspectLogger] Failed to write log record: {e}");
                    }
                }
                LogCommand::Flush => break,
                LogCommand::Terminate => break 'sleep,
            }
            match receiver.try_recv() {
                Ok(next) => command = next,
                Err(_) => break,
            }
        }
        if let Err(e) = writer.flush() {
            eprintln!("[FlowspectLogger] Failed to flush log: {e}");
        }
    }

    // Channel closed or termination requested.
    let _ = writer.flush();
}
