//! Built-in notification backends.
//!
//! Console and memory backends are always available; webhook and email are
//! feature-gated reference implementations of the backend capability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "webhook")]
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use oncore_core::ids::{AlertGroupId, UserId};
use oncore_core::incident::IncidentView;
use oncore_core::user::User;

use crate::backend::NotificationBackend;
use crate::error::{Error, Result};

/// Backend that prints notifications to stdout.
#[derive(Debug, Clone)]
pub struct ConsoleBackend {
    id: String,
}

impl ConsoleBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl NotificationBackend for ConsoleBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, user: &User, incident: &IncidentView) -> Result<()> {
        println!("=== NOTIFICATION ===");
        println!("To: {}", user.username);
        println!("Alert group: {}", incident.alert_group_id);
        println!("Title: {}", incident.title);
        println!("Message: {}", incident.message);
        println!("Integration: {}", incident.integration_id);
        println!("State: {}", incident.state);
        println!("====================");
        Ok(())
    }
}

/// In-memory backend for tests.
///
/// Records every delivery and can be switched into a failing mode to
/// exercise the dispatch error paths.
#[derive(Clone)]
pub struct MemoryBackend {
    id: String,
    sent: Arc<Mutex<Vec<(UserId, AlertGroupId)>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sent: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// All deliveries so far.
    pub fn sent(&self) -> Vec<(UserId, AlertGroupId)> {
        self.sent.lock().clone()
    }

    /// Number of deliveries.
    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Clear recorded deliveries.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Make subsequent notify calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationBackend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, user: &User, incident: &IncidentView) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::SendFailed(format!(
                "backend {} unavailable",
                self.id
            )));
        }
        self.sent
            .lock()
            .push((user.id.clone(), incident.alert_group_id.clone()));
        Ok(())
    }
}

/// Backend that POSTs the notification as JSON to a configured URL.
#[cfg(feature = "webhook")]
#[derive(Debug, Clone)]
pub struct WebhookBackend {
    id: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

#[cfg(feature = "webhook")]
impl WebhookBackend {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            headers: HashMap::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Add a header to the webhook request.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }
}

#[cfg(feature = "webhook")]
#[async_trait]
impl NotificationBackend for WebhookBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, user: &User, incident: &IncidentView) -> Result<()> {
        let payload = serde_json::json!({
            "user": {
                "id": user.id.to_string(),
                "username": user.username,
            },
            "alert_group": incident,
        });

        let mut request = self.client.post(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::SendFailed(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::SendFailed(format!(
                "Webhook returned error: {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Backend that delivers notifications via SMTP.
#[cfg(feature = "email")]
#[derive(Debug, Clone)]
pub struct EmailBackend {
    id: String,
    smtp_server: String,
    smtp_port: u16,
    username: String,
    password: String,
    from_address: String,
}

#[cfg(feature = "email")]
impl EmailBackend {
    pub fn new(
        id: impl Into<String>,
        smtp_server: String,
        smtp_port: u16,
        username: String,
        password: String,
        from_address: String,
    ) -> Self {
        Self {
            id: id.into(),
            smtp_server,
            smtp_port,
            username,
            password,
            from_address,
        }
    }
}

#[cfg(feature = "email")]
#[async_trait]
impl NotificationBackend for EmailBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn notify(&self, user: &User, incident: &IncidentView) -> Result<()> {
        let to_address = user
            .email
            .as_deref()
            .ok_or_else(|| Error::SendFailed(format!("user {} has no email address", user.id)))?;

        let from_mailbox: lettre::message::Mailbox = self
            .from_address
            .parse()
            .map_err(|e| Error::SendFailed(format!("Invalid from address: {}", e)))?;
        let to_mailbox: lettre::message::Mailbox = to_address
            .parse()
            .map_err(|e| Error::SendFailed(format!("Invalid to address: {}", e)))?;

        let subject = format!("[{}] {}", incident.state, incident.title);
        let body = format!("{}\n\n{}", incident.title, incident.message);

        let email = lettre::Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .body(body)
            .map_err(|e| Error::SendFailed(format!("Failed to build email: {}", e)))?;

        // Clone data for spawn_blocking
        let smtp_server = self.smtp_server.clone();
        let smtp_port = self.smtp_port;
        let username = self.username.clone();
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            let creds =
                lettre::transport::smtp::authentication::Credentials::new(username, password);
            let relay = format!("{}:{}", smtp_server, smtp_port);
            let mailer = lettre::SmtpTransport::relay(&relay)
                .map_err(|e| Error::SendFailed(format!("Invalid SMTP server: {}", e)))?
                .credentials(creds)
                .build();

            lettre::Transport::send(&mailer, &email)
                .map_err(|e| Error::SendFailed(format!("Failed to send email: {}", e)))?;

            Ok::<(), Error>(())
        })
        .await
        .map_err(|e| Error::SendFailed(format!("Task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident() -> IncidentView {
        IncidentView {
            alert_group_id: AlertGroupId::new(),
            title: "High CPU".to_string(),
            message: "CPU above 95%".to_string(),
            integration_id: "grafana".to_string(),
            state: "firing".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_backend_records() {
        let backend = MemoryBackend::new("memory");
        let user = User::new("alice");

        backend.notify(&user, &incident()).await.unwrap();
        assert_eq!(backend.count(), 1);
        assert_eq!(backend.sent()[0].0, user.id);

        backend.clear();
        assert_eq!(backend.count(), 0);
    }

    #[tokio::test]
    async fn test_memory_backend_failure_mode() {
        let backend = MemoryBackend::new("memory");
        backend.set_failing(true);

        let user = User::new("alice");
        assert!(backend.notify(&user, &incident()).await.is_err());
        assert_eq!(backend.count(), 0);
    }

    #[tokio::test]
    async fn test_console_backend() {
        let backend = ConsoleBackend::new("console");
        let user = User::new("alice");
        // Should not fail
        backend.notify(&user, &incident()).await.unwrap();
    }

    #[cfg(feature = "email")]
    #[tokio::test]
    async fn test_email_backend_requires_address() {
        let backend = EmailBackend::new(
            "email",
            "smtp.example.com".to_string(),
            587,
            "user".to_string(),
            "pass".to_string(),
            "oncore@example.com".to_string(),
        );
        let user = User::new("alice");
        let result = backend.notify(&user, &incident()).await;
        assert!(matches!(result, Err(Error::SendFailed(_))));
    }
}
