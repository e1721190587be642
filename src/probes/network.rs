//! Network fabric probes.

use crate::catalog::issue;
use crate::config::Thresholds;
use crate::model::{Finding, NodeSpec, RawPayload};

// --- Route status ---

pub fn route_command(_thresholds: &Thresholds) -> String {
    r#"
    for table in $(ip rule list | grep -i 'static' | awk '{for(i=1;i<=NF;i++) if($i=="lookup") print $(i+1)}'); do
        if [ -z "$(ip route show table $table)" ]; then
            echo "$table"
        fi
    done
    "#
    .to_string()
}

pub fn parse_route(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[Route] Command execution failed: {}", payload.error),
        );
    }

    let output = payload.output.trim();
    if !output.is_empty() {
        let empty_tables: Vec<&str> = output.split_whitespace().collect();
        return Finding::fail(
            issue::ROUTE,
            format!(
                "Found empty static route tables: {}",
                empty_tables.join(", ")
            ),
        );
    }

    // A node that answers routing queries is up, so a clean run also clears
    // the unreachable class.
    Finding::pass([issue::ROUTE, issue::IP_RULE, issue::SHUTDOWN])
}

// --- InfiniBand device status ---

pub fn ib_status_command(_thresholds: &Thresholds) -> String {
    // grep exits 1 when every link is up; that is the healthy case.
    "ibdev2netdev -v | grep -i 'link_state: down' || true".to_string()
}

pub fn parse_ib_status(payload: &RawPayload, _node: &NodeSpec, _thresholds: &Thresholds) -> Finding {
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[IB Status] Command execution failed: {}", payload.error),
        );
    }

    let output = payload.output.trim();
    if !output.is_empty() {
        return Finding::fail(
            issue::IB_DEVICE,
            format!("One or more InfiniBand devices are down: {output}"),
        );
    }
    Finding::pass([issue::IB_DEVICE, issue::SHUTDOWN])
}

// --- InfiniBand device count ---

pub fn ib_count_command(_thresholds: &Thresholds) -> String {
    "ibdev2netdev | wc -l".to_string()
}

pub fn parse_ib_count(payload: &RawPayload, _node: &NodeSpec, thresholds: &Thresholds) -> Finding {
    let expected = thresholds.expected_ibdev_count;
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[IB Count] Command execution failed: {}", payload.error),
        );
    }

    match payload.output.trim().parse::<i64>() {
        Ok(count) if count != expected => Finding::fail(
            issue::IB_DEVICE_COUNT,
            format!("Expected {expected} IB devices, but found {count}."),
        ),
        Ok(_) => Finding::pass([issue::IB_DEVICE_COUNT, issue::SHUTDOWN]),
        Err(_) => Finding::fail(
            issue::UNKNOWN,
            format!(
                "[IB Count] Failed to parse count from output: '{}'",
                payload.output
            ),
        ),
    }
}

// --- IP rule count ---

pub fn ip_rule_command(_thresholds: &Thresholds) -> String {
    "ip rule list | wc -l".to_string()
}

pub fn parse_ip_rule(payload: &RawPayload, _node: &NodeSpec, thresholds: &Thresholds) -> Finding {
    let expected = thresholds.expected_ip_rule_count;
    if !payload.success {
        return Finding::fail(
            issue::UNKNOWN,
            format!("[IP Rule] Command execution failed: {}", payload.error),
        );
    }

    match payload.output.trim().parse::<i64>() {
        Ok(count) if count != expected => Finding::fail(
            issue::IP_RULE,
            format!("Expected {expected} IP rules, but found {count}."),
        ),
        Ok(_) => Finding::pass([issue::IP_RULE, issue::SHUTDOWN]),
        Err(_) => Finding::fail(
            issue::UNKNOWN,
            format!(
                "[IP Rule] Failed to parse count from output: '{}'",
                payload.output
            ),
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
    fn clean_route_output_covers_route_ip_rule_and_shutdown() {
        let finding = parse_route(&RawPayload::ok(""), &node(), &Thresholds::default());
        assert_eq!(
            finding,
            Finding::pass([issue::ROUTE, issue::IP_RULE, issue::SHUTDOWN])
        );
    }

    #[test]
    fn empty_route_tables_raise() {
        let finding = parse_route(&RawPayload::ok("101 102\n"), &node(), &Thresholds::default());
        assert_eq!(
            finding,
            Finding::fail(issue::ROUTE, "Found empty static route tables: 101, 102")
        );
    }

    #[test]
    fn down_links_raise_ib_device() {
        let output = "mlx5_2 port 1 ==> ib2 (Down) link_state: down\n";
        let finding = parse_ib_status(&RawPayload::ok(output), &node(), &Thresholds::default());
        match finding {
            Finding::Fail { issue, .. } => assert_eq!(issue, issue::IB_DEVICE),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn all_links_up_passes() {
        let finding = parse_ib_status(&RawPayload::ok(""), &node(), &Thresholds::default());
        assert_eq!(finding, Finding::pass([issue::IB_DEVICE, issue::SHUTDOWN]));
    }

    #[test]
    fn ib_count_mismatch_raises() {
        let finding = parse_ib_count(&RawPayload::ok("6\n"), &node(), &Thresholds::default());
        assert_eq!(
            finding,
            Finding::fail(
                issue::IB_DEVICE_COUNT,
                "Expected 8 IB devices, but found 6."
            )
        );
    }

    #[test]
    fn ip_rule_count_mismatch_raises() {
        let finding = parse_ip_rule(&RawPayload::ok("17\n"), &node(), &Thresholds::default());
        assert_eq!(
            finding,
            Finding::fail(issue::IP_RULE, "Expected 19 IP rules, but found 17.")
        );
    }

    #[test]
    fn ip_rule_count_match_passes() {
        let finding = parse_ip_rule(&RawPayload::ok("19\n"), &node(), &Thresholds::default());
        assert_eq!(finding, Finding::pass([issue::IP_RULE, issue::SHUTDOWN]));
    }
}
