//! Minimal terminal activity view: consumes core-emitted `Record`s and
//! prints them. Deliberately not a curses-style redraw: one line per
//! record, colored by severity, in the order records arrive.

use colored::{ColoredString, Colorize};
use procwatch_core::model::Severity;
use procwatch_core::Record;

pub struct TerminalView;

impl TerminalView {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&mut self, record: &Record) {
        match record {
            Record::Start { target, timestamp, .. } => {
                println!(
                    "{} pid {} ({}) at {}",
                    "attached".green().bold(),
                    target.pid,
                    target.command_line,
                    timestamp.to_rfc3339(),
                );
            }
            Record::Activity {
                stream,
                preview,
                byte_count,
                ..
            } => {
                println!(
                    "{} [{:?}] {}B: {}",
                    "activity".dimmed(),
                    stream,
                    byte_count,
                    preview
                );
            }
            Record::Vulnerability { vulnerability, .. } => {
                let label = format!(
                    "{}/{}",
                    vulnerability.kind.vuln_type, vulnerability.kind.subtype
                );
                let line = format!(
                    "[{:?}] {} — {}",
                    vulnerability.severity, label, vulnerability.evidence
                );
                println!("{}", colorize_by_severity(vulnerability.severity, &line));
            }
            Record::Error { message, .. } => {
                println!("{} {}", "error".red().bold(), message);
            }
            Record::Stop { reason, stats, .. } => {
                println!(
                    "{} ({}) — frames={} vulnerabilities={} dropped_in={} dropped_out={}",
                    "stopped".yellow().bold(),
                    reason,
                    stats.frames_emitted,
                    stats.vulnerabilities_found,
                    stats.bytes_dropped.input,
                    stats.bytes_dropped.output,
                );
            }
        }
    }
}

impl Default for TerminalView {
    fn default() -> Self {
        Self::new()
    }
}

fn colorize_by_severity(severity: Severity, line: &str) -> ColoredString {
    match severity {
        Severity::Critical => line.red().bold(),
        Severity::High => line.red(),
        Severity::Medium => line.yellow(),
        Severity::Low => line.normal(),
    }
}
