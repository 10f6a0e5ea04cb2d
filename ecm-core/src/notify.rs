//! Notification / Alert Fanout (Component P): persists operator-facing
//! notifications and, when requested, fans them out to the enabled
//! external channels as independent fire-and-forget attempts.
//!
//! Grounded on the teacher's `channels/email.rs` (SMTP via
//! `AsyncSmtpTransport<Tokio1Executor>`) and `scheduler/webhook.rs`'s
//! `compute_hmac_signature` for the outbound payload-signing helper,
//! narrowed to the email/Discord/Telegram targets `spec.md` §4.P names.

use std::time::Duration;

use hmac::{Hmac, Mac};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::NotifySettings;
use crate::error::{EcmError, NotificationError};
use crate::store::models::{Notification, NotificationType};
use crate::store::Store;

/// Which channels an alert should attempt, mirroring `ScheduledTask`'s
/// `send_to_*` flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertChannels {
    pub email: bool,
    pub discord: bool,
    pub telegram: bool,
}

/// Per-dispatch timeout; a stuck SMTP/webhook call never blocks the
/// caller past this.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Persist a notification and, if `send_alerts`, fan it out to
/// `channels`. An invalid `notification_type_raw` degrades to `info`.
/// Each channel dispatch is independent; a failure on one channel is
/// logged and never surfaces to the caller or blocks the others.
#[allow(clippy::too_many_arguments)]
pub async fn create_notification(
    store: &dyn Store,
    notify: &NotifySettings,
    notification_type_raw: &str,
    title: Option<String>,
    message: String,
    source: String,
    source_id: Option<String>,
    extra_data: serde_json::Value,
    send_alerts: bool,
    channels: AlertChannels,
) -> Result<Notification, EcmError> {
    let notification = Notification {
        id: Uuid::new_v4(),
        notification_type: NotificationType::parse_or_info(notification_type_raw),
        title,
        message,
        source,
        source_id,
        action: None,
        extra_data,
        read: false,
        created_at: chrono::Utc::now(),
    };

    store.save_notification(notification.clone()).await?;

    if send_alerts {
        dispatch_alerts(&notification, notify, channels).await;
    }

    Ok(notification)
}

/// Re-point an in-progress notification (e.g. task progress) at a new
/// message: drop any prior rows for `(source, source_id)` and persist
/// a fresh one in their place.
pub async fn update_notification(
    store: &dyn Store,
    notify: &NotifySettings,
    source: &str,
    source_id: &str,
    notification_type_raw: &str,
    message: String,
    send_alerts: bool,
    channels: AlertChannels,
) -> Result<Notification, EcmError> {
    store.delete_notifications_by_source(source, source_id).await?;
    create_notification(
        store,
        notify,
        notification_type_raw,
        None,
        message,
        source.to_string(),
        Some(source_id.to_string()),
        serde_json::Value::Null,
        send_alerts,
        channels,
    )
    .await
}

pub async fn delete_by_source(store: &dyn Store, source: &str, source_id: &str) -> Result<(), EcmError> {
    store.delete_notifications_by_source(source, source_id).await?;
    Ok(())
}

async fn dispatch_alerts(notification: &Notification, notify: &NotifySettings, channels: AlertChannels) {
    let subject = notification
        .title
        .clone()
        .unwrap_or_else(|| format!("{:?}", notification.notification_type));
    let body = notification.message.clone();

    if channels.email {
        match tokio::time::timeout(DISPATCH_TIMEOUT, send_email(&subject, &body, &notify.smtp_recipients(), notify)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "notification email dispatch failed"),
            Err(_) => tracing::warn!("notification email dispatch timed out"),
        }
    }
    if channels.discord {
        if let Some(url) = notify.webhook.discord_url.clone() {
            match tokio::time::timeout(DISPATCH_TIMEOUT, send_discord(&subject, &body, &url)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "notification discord dispatch failed"),
                Err(_) => tracing::warn!("notification discord dispatch timed out"),
            }
        }
    }
    if channels.telegram {
        if let (Some(token), Some(chat_id)) =
            (notify.webhook.telegram_bot_token.clone(), notify.webhook.telegram_chat_id.clone())
        {
            match tokio::time::timeout(DISPATCH_TIMEOUT, send_telegram(&subject, &body, &token, &chat_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "notification telegram dispatch failed"),
                Err(_) => tracing::warn!("notification telegram dispatch timed out"),
            }
        }
    }
}

impl NotifySettings {
    fn smtp_recipients(&self) -> Vec<String> {
        // Component P has no dedicated recipient list in the data model;
        // it reuses the SMTP identity's own address as the sole operator
        // mailbox, distinct from the Digest Dispatcher's configurable list.
        if self.smtp.from_address.is_empty() {
            Vec::new()
        } else {
            vec![self.smtp.from_address.clone()]
        }
    }
}

async fn send_email(subject: &str, body: &str, recipients: &[String], notify: &NotifySettings) -> Result<(), NotificationError> {
    if recipients.is_empty() {
        return Err(NotificationError::NotConfigured { target: "email".into() });
    }
    let smtp = &notify.smtp;
    let from: Mailbox = smtp.from_address.parse().map_err(|_| NotificationError::Smtp {
        message: format!("invalid from address: {}", smtp.from_address),
    })?;
    let mut builder = Message::builder().from(from).subject(subject.to_string());
    for recipient in recipients {
        let to: Mailbox = recipient.parse().map_err(|_| NotificationError::Smtp {
            message: format!("invalid recipient address: {recipient}"),
        })?;
        builder = builder.to(to);
    }
    let message = builder.body(body.to_string()).map_err(|e| NotificationError::Smtp { message: e.to_string() })?;

    let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());
    let transport: AsyncSmtpTransport<Tokio1Executor> = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        .map_err(|e| NotificationError::Smtp { message: e.to_string() })?
        .port(smtp.port)
        .credentials(creds)
        .build();
    transport.send(message).await.map_err(|e| NotificationError::Smtp { message: e.to_string() })?;
    Ok(())
}

async fn send_discord(subject: &str, body: &str, webhook_url: &str) -> Result<(), NotificationError> {
    let client = reqwest::Client::new();
    let response = client
        .post(webhook_url)
        .json(&serde_json::json!({ "content": format!("**{subject}**\n{body}") }))
        .send()
        .await
        .map_err(|e| NotificationError::Webhook { message: e.to_string(), target: "discord".into() })?;
    if !response.status().is_success() {
        return Err(NotificationError::Webhook {
            message: format!("discord webhook returned {}", response.status()),
            target: "discord".into(),
        });
    }
    Ok(())
}

async fn send_telegram(subject: &str, body: &str, bot_token: &str, chat_id: &str) -> Result<(), NotificationError> {
    let client = reqwest::Client::new();
    let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
    let response = client
        .post(&url)
        .json(&serde_json::json!({ "chat_id": chat_id, "text": format!("*{subject}*\n{body}") , "parse_mode": "Markdown" }))
        .send()
        .await
        .map_err(|e| NotificationError::Webhook { message: e.to_string(), target: "telegram".into() })?;
    if !response.status().is_success() {
        return Err(NotificationError::Webhook {
            message: format!("telegram API returned {}", response.status()),
            target: "telegram".into(),
        });
    }
    Ok(())
}

/// HMAC-SHA256 signature for a generic outbound webhook payload, shared
/// shape with the teacher's `channels/webhook.rs`, used by external
/// integrations that want to verify payload authenticity.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex_encode(&mac.finalize().into_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn notify_settings() -> NotifySettings {
        NotifySettings::default()
    }

    #[tokio::test]
    async fn test_create_notification_persists_and_degrades_unknown_type() {
        let store = MemoryStore::new();
        let n = create_notification(
            &store,
            &notify_settings(),
            "not_a_real_type",
            None,
            "hello".into(),
            "probe".into(),
            None,
            serde_json::Value::Null,
            false,
            AlertChannels::default(),
        )
        .await
        .unwrap();
        assert_eq!(n.notification_type, NotificationType::Info);
        let all = store.list_notifications(10).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_update_notification_replaces_prior_rows() {
        let store = MemoryStore::new();
        create_notification(
            &store,
            &notify_settings(),
            "info",
            None,
            "starting".into(),
            "task:probe".into(),
            Some("run-1".into()),
            serde_json::Value::Null,
            false,
            AlertChannels::default(),
        )
        .await
        .unwrap();
        update_notification(
            &store,
            &notify_settings(),
            "task:probe",
            "run-1",
            "success",
            "done".into(),
            false,
            AlertChannels::default(),
        )
        .await
        .unwrap();
        let all = store.list_notifications(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "done");
    }

    #[test]
    fn test_sign_payload_is_deterministic() {
        let sig1 = sign_payload("secret", b"payload");
        let sig2 = sign_payload("secret", b"payload");
        assert_eq!(sig1, sig2);
        assert_ne!(sig1, sign_payload("other", b"payload"));
    }
}
