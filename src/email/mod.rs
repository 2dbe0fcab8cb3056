use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use log::warn;

use crate::config::SmtpConfig;

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    /// HTML body.
    pub body: String,
}

/// Outcome of a delivery attempt. Send failures are data, not panics: the
/// executor records them on the audit trail and keeps the run alive.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> SendOutcome;
}

pub struct SmtpChannel {
    config: SmtpConfig,
}

impl SmtpChannel {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_transport(&self) -> Result<SmtpTransport, String> {
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            let creds = Credentials::new(user.clone(), pass.clone());
            Ok(SmtpTransport::relay(&self.config.host)
                .map_err(|e| format!("SMTP relay error: {}", e))?
                .port(self.config.port)
                .credentials(creds)
                .build())
        } else {
            Ok(SmtpTransport::builder_dangerous(&self.config.host)
                .port(self.config.port)
                .build())
        }
    }
}

#[async_trait]
impl NotificationChannel for SmtpChannel {
    async fn send(&self, message: &EmailMessage) -> SendOutcome {
        let from = match self.config.from.parse() {
            Ok(addr) => addr,
            Err(e) => return SendOutcome::failed(format!("Invalid from address: {}", e)),
        };
        let to = match message.to.parse() {
            Ok(addr) => addr,
            Err(e) => return SendOutcome::failed(format!("Invalid to address: {}", e)),
        };

        let email = match Message::builder()
            .from(from)
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.body.clone())
        {
            Ok(email) => email,
            Err(e) => return SendOutcome::failed(format!("Failed to build email: {}", e)),
        };

        let mailer = match self.build_transport() {
            Ok(mailer) => mailer,
            Err(e) => return SendOutcome::failed(e),
        };

        match mailer.send(&email) {
            Ok(_) => SendOutcome::ok(),
            Err(e) => {
                warn!("SMTP delivery to {} failed: {}", message.to, e);
                SendOutcome::failed(format!("Failed to send email: {}", e))
            }
        }
    }
}
