use std::fmt::Write;

use crate::models::{DeviceStatus, RunOutcome, RunResult};

/// Plain-text summary of a run for the terminal
pub fn render_summary(result: &RunResult) -> String {
    let mut out = String::new();
    let elapsed = result.finished_at - result.started_at;

    let _ = writeln!(out, "Run {} on project '{}'", result.run_id, result.project);
    match &result.outcome {
        RunOutcome::Done => {
            let _ = writeln!(out, "Outcome: done in {}s", elapsed.num_seconds());
        }
        RunOutcome::Aborted { stage, error } => {
            let _ = writeln!(out, "Outcome: ABORTED during {} after {}s: {}", stage.as_str(), elapsed.num_seconds(), error);
        }
    }

    let _ = writeln!(out, "\nDevices:");
    for device in &result.devices {
        let detail = match &device.status {
            DeviceStatus::Failed { reason } | DeviceStatus::SkippedDegraded { reason } => format!("  ({})", reason),
            _ => String::new(),
        };
        let _ = writeln!(
            out,
            "  {:<10} {:<7} {}{}",
            device.name,
            device.role.as_str(),
            device.status.label(),
            detail
        );
    }

    if !result.provisioning_errors.is_empty() {
        let _ = writeln!(out, "\nProvisioning errors:");
        for err in &result.provisioning_errors {
            let _ = writeln!(out, "  - {}", err);
        }
    }

    if !result.probes.is_empty() {
        let _ = writeln!(out, "\nProbes:");
        for probe in &result.probes {
            let mark = if probe.verdict.needs_confirmation() { "  <- confirm manually" } else { "" };
            let source = match result.device(&probe.source).map(|d| &d.status) {
                Some(status) if *status != DeviceStatus::Applied => format!(" (source {})", status.label()),
                _ => String::new(),
            };
            let _ = writeln!(
                out,
                "  {:<10} -> {:<16} {}{}{}",
                probe.source,
                probe.destination,
                probe.verdict.as_str(),
                source,
                mark
            );
        }
    }

    let _ = write!(
        out,
        "\n{} applied, {} failed, {} degraded, {} not attempted",
        result.count_status("applied"),
        result.count_status("failed"),
        result.count_status("skipped-degraded"),
        result.count_status("not-attempted"),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceOutcome, NodeRole, ProbeOutcome, RunStage, Verdict};
    use chrono::Utc;

    fn result(outcome: RunOutcome) -> RunResult {
        let now = Utc::now();
        RunResult {
            run_id: "run-1".into(),
            project: "VLAN_Lab".into(),
            started_at: now,
            finished_at: now,
            outcome,
            devices: vec![
                DeviceOutcome {
                    name: "R1".into(),
                    role: NodeRole::Router,
                    status: DeviceStatus::Applied,
                    transcript: None,
                },
                DeviceOutcome {
                    name: "PC6".into(),
                    role: NodeRole::Host,
                    status: DeviceStatus::SkippedDegraded {
                        reason: "console 127.0.0.1:5006 not accepting connections".into(),
                    },
                    transcript: None,
                },
            ],
            probes: vec![
                ProbeOutcome {
                    source: "PC1".into(),
                    destination: "10.0.0.65".into(),
                    verdict: Verdict::Unreachable,
                    transcript: None,
                },
                ProbeOutcome {
                    source: "PC6".into(),
                    destination: "10.0.0.190".into(),
                    verdict: Verdict::Indeterminate,
                    transcript: None,
                },
            ],
            provisioning_errors: vec![],
        }
    }

    #[test]
    fn test_summary_lists_every_device_and_probe() {
        let text = render_summary(&result(RunOutcome::Done));
        assert!(text.contains("Outcome: done"));
        assert!(text.contains("R1         router  applied"));
        assert!(text.contains("skipped-degraded  (console 127.0.0.1:5006"));
        assert!(text.contains("10.0.0.65        unreachable  <- confirm manually"));
        assert!(text.contains("indeterminate (source skipped-degraded)  <- confirm manually"));
        assert!(text.ends_with("1 applied, 0 failed, 1 degraded, 0 not attempted"));
        assert!(!text.contains("Provisioning errors"));
    }

    #[test]
    fn test_summary_of_aborted_run() {
        let text = render_summary(&result(RunOutcome::Aborted {
            stage: RunStage::Provisioning,
            error: "lab service unreachable: connection refused".into(),
        }));
        assert!(text.contains("ABORTED during provisioning"));
        assert!(text.contains("connection refused"));
    }
}
