//! Webhook adapter. Implements NotificationSink by POSTing JSON notices.

use super::message::{change_notice, timetable_notice, Notice};
use crate::domain::{Change, DomainError, ScheduleSnapshot};
use crate::ports::NotificationSink;
use reqwest::Client;
use std::time::Duration;

/// POSTs `{title, message, group?, date}` to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Notify(format!("http client: {}", e)))?;
        Ok(Self { client, url })
    }

    async fn post(&self, notice: &Notice) -> Result<(), DomainError> {
        let res = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| DomainError::Notify(format!("Request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(DomainError::Notify(format!(
                "Webhook error {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify_change(&self, change: &Change) -> Result<(), DomainError> {
        self.post(&change_notice(change)).await
    }

    async fn notify_new_timetable(&self, snapshot: &ScheduleSnapshot) -> Result<(), DomainError> {
        self.post(&timetable_notice(snapshot)).await
    }
}
