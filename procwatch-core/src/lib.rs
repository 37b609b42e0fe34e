//! Core capture, boundary-detection, dissection, and credential/vulnerability
//! scanning engine for the process-stream observability probe.
//!
//! `procwatch-cli` is the only intended consumer: it wires `ProbeOptions`
//! from the command line, drives a `Supervisor`, and hands emitted
//! `Record`s to the log writer and terminal view.

pub mod boundary;
pub mod capture;
pub mod config;
pub mod dissect;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod model;
pub mod ring;
pub mod scanner;
pub mod supervisor;
pub mod vuln;

pub use config::ProbeOptions;
pub use engine::{CaptureEngine, Record};
pub use error::{ProbeError, ProbeResult};
pub use model::Target;
pub use supervisor::Supervisor;
