//! SMTP email channel
//!
//! Sends notification emails through a transactional SMTP relay using
//! lettre's async transport.

use super::{ChannelError, EmailChannel, SendResult};
use crate::config::{SmtpConfig, SmtpSecurity};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

/// Email channel backed by an SMTP relay
pub struct SmtpEmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailChannel {
    /// Build the transport from the SMTP configuration
    pub fn new(config: &SmtpConfig) -> Result<Self, ChannelError> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                ChannelError::InvalidRecipient(format!("Invalid from address: {}", e))
            })?;

        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let mailer = match config.security {
            SmtpSecurity::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| ChannelError::Send(format!("SMTP transport: {}", e)))?
                .credentials(creds)
                .port(config.port)
                .build(),
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| ChannelError::Send(format!("SMTP transport: {}", e)))?
                    .credentials(creds)
                    .port(config.port)
                    .build()
            }
        };

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl EmailChannel for SmtpEmailChannel {
    async fn send(&self, to: &str, subject: &str, body_html: &str, body_text: &str) -> SendResult {
        let to: Mailbox = to.parse().map_err(|e: lettre::address::AddressError| {
            ChannelError::InvalidRecipient(format!("Invalid to address: {}", e))
        })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to.clone())
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body_text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(body_html.to_string()),
                    ),
            )
            .map_err(|e| ChannelError::Send(format!("Failed to build email: {}", e)))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| ChannelError::Send(format!("SMTP send failed: {}", e)))?;

        log::debug!("Notification email sent to {}", to);
        Ok(())
    }
}
