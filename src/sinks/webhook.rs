//! Chat-webhook notifier.
//!
//! Builds the rich-text "post" payload the chat service expects and routes
//! it to the webhook of the issue's alert group. A fourth, optional webhook
//! receives every full failure alert as a flat record for spreadsheet sync.
//! Dispatch never raises: failures are logged and swallowed, and every call
//! is bounded by a timeout.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::catalog::{AlertGroup, Priority};
use crate::config::WebhookSettings;

const ALERT_TIMEOUT: Duration = Duration::from_secs(10);
const TABLE_SYNC_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything the notifier needs to render one alert.
#[derive(Debug, Clone)]
pub struct AlertNotice {
    pub host: String,
    pub hostname: String,
    pub issue_type: String,
    pub detail: String,
    pub priority: Priority,
    pub group: AlertGroup,
    pub title: &'static str,
    /// Wall-clock time rendered in the configured offset.
    pub timestamp: String,
}

pub struct Notifier {
    client: Client,
    settings: WebhookSettings,
}

impl Notifier {
    pub fn new(settings: WebhookSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    pub async fn send_standard(&self, notice: &AlertNotice) {
        let title = format!(
            "【{}】{} - {}",
            notice.priority.label(),
            notice.title,
            notice.hostname
        );

        let mut description_row = vec![json!({
            "tag": "text",
            "text": format!("Description: {} ", notice.detail),
        })];
        if notice.priority.pages_everyone() {
            description_row.push(json!({"tag": "at", "user_id": "all"}));
        }

        let content = vec![
            text_row(format!("Node: {}", notice.hostname)),
            text_row(format!("IP: {}", notice.host)),
            text_row(format!("Priority: {}", notice.priority.label())),
            text_row(format!("Type: {}", notice.issue_type)),
            description_row,
            text_row(format!("Time: {}", notice.timestamp)),
        ];

        self.post_to_group(notice.group, &title, content).await;
    }

    pub async fn send_recovery(&self, notice: &AlertNotice) {
        let title = format!("【RECOVERED】{} - {}", notice.title, notice.hostname);
        let content = vec![
            text_row(format!("Node: {}", notice.hostname)),
            text_row(format!("IP: {}", notice.host)),
            text_row(format!("Priority: {}", notice.priority.label())),
            text_row(format!("Resolved issue type: {}", notice.issue_type)),
            text_row(format!("Recovery time: {}", notice.timestamp)),
        ];
        self.post_to_group(notice.group, &title, content).await;
    }

    pub async fn send_duplicate(&self, notice: &AlertNotice) {
        let title = format!("【DUPLICATE】{} - {}", notice.title, notice.hostname);
        let content = vec![
            text_row(format!("Node: {}", notice.hostname)),
            text_row(format!("IP: {}", notice.host)),
            text_row(format!("Priority: {}", notice.priority.label())),
            text_row(format!("Type: {} (duplicate alert)", notice.issue_type)),
            text_row(format!("Description: {}", notice.detail)),
        ];
        self.post_to_group(notice.group, &title, content).await;
    }

    /// Daily digest and heartbeat go to the analytics group.
    pub async fn send_digest(&self, title: &str, content: Vec<Vec<Value>>) {
        self.post_to_group(AlertGroup::Analytics, title, content)
            .await;
    }

    /// Flat-record copy of a failure alert for external spreadsheet logging.
    pub async fn send_table_sync(&self, notice: &AlertNotice) {
        let Some(url) = self.settings.table_sync_webhook.as_deref() else {
            debug!("table sync webhook not configured, skipping");
            return;
        };

        let payload = json!({
            "host": notice.host,
            "hostname": notice.hostname,
            "priority": notice.priority.label(),
            "type": notice.issue_type,
            "extra": notice.detail,
            "success": "False",
            "time": notice.timestamp,
        });

        let response = self
            .client
            .post(url)
            .timeout(TABLE_SYNC_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                info!(
                    hostname = %notice.hostname,
                    issue_type = %notice.issue_type,
                    "alert synced to table webhook"
                );
            }
            Ok(response) => {
                warn!(status = %response.status(), "table sync webhook returned an error status");
            }
            Err(err) => {
                error!(error = %err, "table sync webhook request failed");
            }
        }
    }

    async fn post_to_group(&self, group: AlertGroup, title: &str, content: Vec<Vec<Value>>) {
        let Some(url) = self.settings.url_for(group) else {
            error!(
                group = group.as_str(),
                "no webhook url configured for alert group"
            );
            return;
        };

        let body = json!({
            "msg_type": "post",
            "content": {"post": {"zh_cn": {"title": title, "content": content}}},
        });

        let result = self
            .client
            .post(url)
            .timeout(ALERT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        match result {
            Ok(_) => info!(group = group.as_str(), title, "notification sent"),
            Err(err) => error!(group = group.as_str(), error = %err, "notification failed"),
        }
    }
}

pub(crate) fn text_row(text: String) -> Vec<Value> {
    vec![json!({"tag": "text", "text": text})]
}

#[cfg(test)]
mod tests {
    use super::*;

    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notice(priority: Priority, group: AlertGroup) -> AlertNotice {
        AlertNotice {
            host: "10.0.0.1".to_string(),
            hostname: "gpu-node-01".to_string(),
            issue_type: "gpu.count".to_string(),
            detail: "Expected 8 GPUs, but found 7.".to_string(),
            priority,
            group,
            title: "Node GPU count mismatch",
            timestamp: "2026-08-01 09:00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn standard_alert_posts_the_post_payload_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hw"))
            .and(body_partial_json(json!({"msg_type": "post"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(WebhookSettings {
            hardware_group: Some(format!("{}/hw", server.uri())),
            ..WebhookSettings::default()
        });
        notifier
            .send_standard(&notice(Priority::P1, AlertGroup::Hardware))
            .await;

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let rows = &body["content"]["post"]["zh_cn"]["content"];
        assert_eq!(rows.as_array().unwrap().len(), 6);
        // P1 pages everyone: the description row carries an at-all fragment.
        let description = rows[4].as_array().unwrap();
        assert_eq!(description[1]["tag"], "at");
        assert_eq!(description[1]["user_id"], "all");
    }

    #[tokio::test]
    async fn p2_alert_has_no_at_all_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sw"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(WebhookSettings {
            software_group: Some(format!("{}/sw", server.uri())),
            ..WebhookSettings::default()
        });
        notifier
            .send_standard(&notice(Priority::P2, AlertGroup::Software))
            .await;

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let description =
            body["content"]["post"]["zh_cn"]["content"][4].as_array().unwrap().to_vec();
        assert_eq!(description.len(), 1);
    }

    #[tokio::test]
    async fn missing_group_url_is_swallowed() {
        let notifier = Notifier::new(WebhookSettings::default());
        // No configured URLs: must log and return, not panic.
        notifier
            .send_standard(&notice(Priority::P1, AlertGroup::Hardware))
            .await;
    }

    #[tokio::test]
    async fn table_sync_sends_the_flat_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/table"))
            .and(body_partial_json(json!({
                "type": "gpu.count",
                "success": "False",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(WebhookSettings {
            table_sync_webhook: Some(format!("{}/table", server.uri())),
            ..WebhookSettings::default()
        });
        notifier
            .send_table_sync(&notice(Priority::P1, AlertGroup::Hardware))
            .await;
    }

    #[tokio::test]
    async fn sink_errors_do_not_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hw"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(WebhookSettings {
            hardware_group: Some(format!("{}/hw", server.uri())),
            ..WebhookSettings::default()
        });
        // A 500 from the webhook is logged, not raised.
        notifier
            .send_standard(&notice(Priority::P1, AlertGroup::Hardware))
            .await;
    }
}
