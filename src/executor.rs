//! Batch executor: runs a selected probe set against one live session.
//!
//! Per-probe execution mode: each probe command runs as its own remote exec
//! with its own timeout. The executor never errors out of the pipeline — a
//! probe that could not execute still yields a payload with
//! `success = false`, and the parser decides what that means.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Thresholds;
use crate::model::{Finding, NodeSpec};
use crate::probes;
use crate::session::NodeSession;

pub async fn run_probes(
    session: &dyn NodeSession,
    node: &NodeSpec,
    thresholds: &Thresholds,
    probe_names: &[String],
    command_timeout: Duration,
) -> Vec<(&'static str, Finding)> {
    let mut results = Vec::with_capacity(probe_names.len());
    for name in probe_names {
        let Some(probe) = probes::get(name) else {
            warn!(
                node = %node.display(),
                probe = %name,
                "probe is not defined in the registry, skipping"
            );
            continue;
        };

        let command = probe.command(thresholds);
        debug!(node = %node.display(), probe = probe.name, "executing probe");
        let payload = session.exec(&command, command_timeout).await;
        let finding = probe.parse(&payload, node, thresholds);
        results.push((probe.name, finding));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::catalog::issue;
    use crate::model::RawPayload;

    struct ScriptedSession {
        responses: Vec<(&'static str, RawPayload)>,
    }

    #[async_trait]
    impl NodeSession for ScriptedSession {
        async fn exec(&self, command: &str, _timeout: Duration) -> RawPayload {
            for (pattern, payload) in &self.responses {
                if command.contains(pattern) {
                    return payload.clone();
                }
            }
            RawPayload::err("command not scripted")
        }
    }

    fn node() -> NodeSpec {
        NodeSpec {
            host: "10.0.0.1".to_string(),
            hostname: Some("gpu-node-01".to_string()),
            port: 22,
            username: "ops".to_string(),
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn runs_selected_probes_in_order() {
        let session = ScriptedSession {
            responses: vec![
                ("gpu_uuid", RawPayload::ok("8\n")),
                ("temperature.gpu", RawPayload::ok("60\n61\n")),
            ],
        };
        let names = vec!["gpu.count".to_string(), "gpu.temperature".to_string()];

        let results = run_probes(
            &session,
            &node(),
            &Thresholds::default(),
            &names,
            Duration::from_secs(15),
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "gpu.count");
        assert!(results[0].1.is_pass());
        assert_eq!(results[1].0, "gpu.temperature");
        assert!(results[1].1.is_pass());
    }

    #[tokio::test]
    async fn unknown_probe_names_are_skipped() {
        let session = ScriptedSession {
            responses: vec![("gpu_uuid", RawPayload::ok("8\n"))],
        };
        let names = vec!["gpu.count".to_string(), "gpu.figment".to_string()];

        let results = run_probes(
            &session,
            &node(),
            &Thresholds::default(),
            &names,
            Duration::from_secs(15),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "gpu.count");
    }

    #[tokio::test]
    async fn timed_out_probe_yields_a_typed_failure() {
        let session = ScriptedSession {
            responses: vec![("gpu_uuid", RawPayload::err("timeout"))],
        };
        let names = vec!["gpu.count".to_string()];

        let results = run_probes(
            &session,
            &node(),
            &Thresholds::default(),
            &names,
            Duration::from_secs(15),
        )
        .await;

        match &results[0].1 {
            Finding::Fail { issue, detail } => {
                assert_eq!(*issue, issue::SMI_CMD_ERROR);
                assert!(detail.contains("timeout"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
