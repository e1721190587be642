//! Storage probes.

use crate::catalog::issue;
use crate::config::Thresholds;
use crate::model::{Finding, NodeSpec, RawPayload};

pub fn gpfs_command(thresholds: &Thresholds) -> String {
    format!(
        "if [ -d '{path}' ]; then echo 'mounted'; else echo 'not_mounted'; fi",
        path = thresholds.gpfs_mount_path
    )
}

pub fn parse_gpfs(payload: &RawPayload, _node: &NodeSpec, thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[GPFS] Command execution failed: {}", payload.error),
        );
    }

    match payload.output.trim() {
        "mounted" => Finding::pass([issue::GPFS, issue::SHUTDOWN]),
        "not_mounted" => Finding::fail(
            issue::GPFS,
            format!(
                "GPFS directory '{}' is not mounted.",
                thresholds.gpfs_mount_path
            ),
        ),
        other => Finding::fail(
            issue::UNKNOWN,
            format!("[GPFS] Unexpected output from check command: '{other}'"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeSpec {
        NodeSpec {
            host: "10.0.0.1".to_string(),
            hostname: None,
            port: 22,
            username: "ops".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn mounted_passes_and_covers_shutdown() {
        let finding = parse_gpfs(&RawPayload::ok("mounted\n"), &node(), &Thresholds::default());
        assert_eq!(finding, Finding::pass([issue::GPFS, issue::SHUTDOWN]));
    }

    #[test]
    fn not_mounted_raises_gpfs() {
        let finding = parse_gpfs(
            &RawPayload::ok("not_mounted\n"),
            &node(),
            &Thresholds::default(),
        );
        assert_eq!(
            finding,
            Finding::fail(issue::GPFS, "GPFS directory '/gpfs/pvc' is not mounted.")
        );
    }

    #[test]
    fn unexpected_output_is_unknown() {
        let finding = parse_gpfs(&RawPayload::ok("maybe?\n"), &node(), &Thresholds::default());
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, issue::UNKNOWN),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn command_embeds_configured_mount_path() {
        let mut thresholds = Thresholds::default();
        thresholds.gpfs_mount_path = "/mnt/shared".to_string();
        assert!(gpfs_command(&thresholds).contains("/mnt/shared"));
    }
}
