//! Supervisor: locates targets, spawns one `CaptureEngine` per match,
//! enforces the operator's duration limit, and aggregates stats at
//! shutdown.
//!
//! Orchestration style follows `cognitod::main` (resolve configuration,
//! spawn one task per watched entity, drive them under a shared
//! cancellation signal) generalized from "one daemon, many kprobes" to
//! "one supervisor, many capture engines".

use crate::capture::DirectFdSource;
use crate::config::ProbeOptions;
use crate::engine::{CaptureEngine, Record};
use crate::error::{ProbeError, ProbeResult};
use crate::model::{CaptureStatsSnapshot, Target};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// How long the Supervisor waits for engines to drain on their own after
/// cancellation before forcing shutdown.
const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct Supervisor {
    options: ProbeOptions,
}

impl Supervisor {
    pub fn new(options: ProbeOptions) -> Self {
        Self { options }
    }

    /// Resolves the configured target string into live process designators:
    /// a valid pid is used directly; otherwise every process in the table
    /// whose name or command line contains the string is matched.
    pub fn resolve_targets(&self) -> ProbeResult<Vec<Target>> {
        if let Ok(pid) = self.options.target.parse::<i32>() {
            return match procfs::process::Process::new(pid) {
                Ok(p) => Ok(vec![Target::new(pid, command_line_of(&p))]),
                Err(_) => Err(ProbeError::NoMatchingTarget(self.options.target.clone())),
            };
        }

        let needle = self.options.target.as_str();
        let processes = procfs::process::all_processes()
            .map_err(|e| ProbeError::Config(format!("failed to scan process table: {e}")))?;

        let mut matched = Vec::new();
        for proc in processes.flatten() {
            let cmdline = command_line_of(&proc);
            let comm = proc.stat().map(|s| s.comm).unwrap_or_default();
            if cmdline.contains(needle) || comm.contains(needle) {
                matched.push(Target::new(proc.pid, cmdline));
            }
        }

        if matched.is_empty() {
            return Err(ProbeError::NoMatchingTarget(needle.to_string()));
        }
        Ok(matched)
    }

    /// Runs capture against every resolved target until the duration
    /// deadline passes or `external_cancel` fires, then drains engines and
    /// returns one stats snapshot per pid.
    pub async fn run(
        &self,
        output_tx: mpsc::Sender<Record>,
        mut external_cancel: watch::Receiver<bool>,
    ) -> ProbeResult<HashMap<i32, CaptureStatsSnapshot>> {
        let targets = self.resolve_targets()?;
        let (engine_cancel_tx, engine_cancel_rx) = watch::channel(false);

        let mut engines = JoinSet::new();
        for target in targets {
            let pid = target.pid;
            let engine = CaptureEngine::new(target, self.options.clone(), output_tx.clone())?;
            let cancel_rx = engine_cancel_rx.clone();
            engines.spawn(async move {
                let stats = engine.run(Box::new(DirectFdSource::new()), cancel_rx).await;
                (pid, stats)
            });
        }

        let deadline_sleep = async {
            match self.options.duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_sleep);

        tokio::select! {
            _ = &mut deadline_sleep => {}
            _ = external_cancel.changed() => {}
        }

        let _ = engine_cancel_tx.send(true);

        let mut stats = HashMap::new();
        let drained = tokio::time::timeout(SHUTDOWN_DRAIN_GRACE, async {
            while let Some(result) = engines.join_next().await {
                if let Ok((pid, snapshot)) = result {
                    stats.insert(pid, snapshot);
                }
            }
        })
        .await;

        if drained.is_err() {
            // Grace period elapsed with engines still draining: force
            // shutdown. Whatever stats already landed above are kept;
            // anything still running is aborted and its last-known
            // snapshot is simply absent from the result (the stop record
            // for that target, already emitted or not, is the source of
            // truth from here on).
            engines.shutdown().await;
        }

        Ok(stats)
    }
}

fn command_line_of(proc: &procfs::process::Process) -> String {
    match proc.cmdline() {
        Ok(parts) if !parts.is_empty() => parts.join(" "),
        _ => proc
            .stat()
            .map(|s| s.comm)
            .unwrap_or_else(|_| "<unknown>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolving_a_pid_that_does_not_exist_is_no_matching_target() {
        let options = ProbeOptions::new((i32::MAX - 1).to_string());
        let supervisor = Supervisor::new(options);
        let result = supervisor.resolve_targets();
        assert!(matches!(result, Err(ProbeError::NoMatchingTarget(_))));
    }

    #[test]
    fn resolving_an_unmatched_name_is_no_matching_target() {
        let options =
            ProbeOptions::new("definitely-not-a-running-process-name-zzz-9183475");
        let supervisor = Supervisor::new(options);
        let result = supervisor.resolve_targets();
        assert!(matches!(result, Err(ProbeError::NoMatchingTarget(_))));
    }
}
