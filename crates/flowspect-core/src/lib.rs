//! # Flowspect Core
//!
//! Offline TCP loss-recovery analysis: consumes a captured packet trace and
//! characterizes, per bidirectional connection, fast-recovery phases,
//! connection interruptions, retransmission timeouts and segment reordering
//! with quantitative extent and delay.
//!
//! The analyzer is a passive observer. It infers peer state from wire
//! evidence only and never reassembles payload or simulates an endpoint.

pub mod analyzer;
pub mod capture;
pub mod connection;
pub mod error;
pub mod interruption;
pub mod packet;
pub mod recovery;
pub mod reorder;
pub mod report;
pub mod samples;
pub mod scoreboard;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use capture::Capture;
pub use connection::{Connection, ConnectionTable};
pub use error::{CaptureError, DecodeError};
pub use packet::Packet;
pub use report::ConnectionReport;
