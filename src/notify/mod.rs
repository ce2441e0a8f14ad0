//! Fire-and-forget webhook notifications. Delivery failures are logged,
//! never escalated to job failure.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::env_nonempty;

/// Payload of a successful backup notification.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationData {
    pub file: String,
    pub backup_size: String,
    pub database: String,
    pub storage: String,
    pub backup_location: String,
    pub duration: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a NotificationData>,
}

fn webhook_url() -> Option<String> {
    env_nonempty("WEBHOOK_URL")
}

pub async fn notify_success(data: &NotificationData) {
    let Some(url) = webhook_url() else { return };
    let payload = WebhookPayload {
        event: "backup_success",
        message: None,
        data: Some(data),
    };
    match post(&url, &payload).await {
        Ok(()) => info!("Success notification has been sent"),
        Err(err) => warn!("Error could not send success notification: {err}"),
    }
}

pub async fn notify_error(message: &str) {
    let Some(url) = webhook_url() else { return };
    let payload = WebhookPayload {
        event: "backup_error",
        message: Some(message),
        data: None,
    };
    match post(&url, &payload).await {
        Ok(()) => info!("Error notification has been sent"),
        Err(err) => warn!("Error could not send error notification: {err}"),
    }
}

async fn post(url: &str, payload: &WebhookPayload<'_>) -> reqwest::Result<()> {
    reqwest::Client::new()
        .post(url)
        .json(payload)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
