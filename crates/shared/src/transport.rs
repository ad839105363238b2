use std::time::Duration;

use lettre::message::{header::ContentType, Mailbox as LettreMailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::SmtpTransport as LettreSmtpTransport;
use lettre::Transport as LettreTransportTrait;

use crate::models::Mailbox;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid sender address: {0}")]
    InvalidSender(String),
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),
    #[error("failed to build smtp transport: {0}")]
    Build(String),
    #[error("smtp send failed: {0}")]
    Send(String),
}

/// A blocking, synchronous send contract. Callers invoke it via
/// `tokio::task::spawn_blocking` so the runtime is never blocked on a slow
/// socket.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        mailbox: &Mailbox,
        to_email: &str,
        subject: &str,
        html: &str,
    ) -> Result<(), TransportError>;
}

pub struct SmtpTransport {
    starttls: bool,
    timeout: Duration,
}

impl SmtpTransport {
    pub fn new(starttls: bool, timeout: Duration) -> Self {
        Self { starttls, timeout }
    }

    fn build_transport(&self, mailbox: &Mailbox) -> Result<LettreSmtpTransport, TransportError> {
        let tls = if self.starttls {
            let params = TlsParameters::new(mailbox.smtp_host.clone())
                .map_err(|e| TransportError::Build(e.to_string()))?;
            Tls::Required(params)
        } else {
            Tls::None
        };

        let transport = LettreSmtpTransport::builder_dangerous(&mailbox.smtp_host)
            .port(mailbox.smtp_port)
            .tls(tls)
            .timeout(Some(self.timeout))
            .credentials(Credentials::new(
                mailbox.smtp_username.clone(),
                mailbox.smtp_password.clone(),
            ))
            .build();
        Ok(transport)
    }
}

impl Transport for SmtpTransport {
    fn send(
        &self,
        mailbox: &Mailbox,
        to_email: &str,
        subject: &str,
        html: &str,
    ) -> Result<(), TransportError> {
        let from: LettreMailbox = mailbox
            .email
            .parse()
            .map_err(|_| TransportError::InvalidSender(mailbox.email.clone()))?;
        let to: LettreMailbox = to_email
            .parse()
            .map_err(|_| TransportError::InvalidRecipient(to_email.to_string()))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(String::new()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .map_err(|e| TransportError::Build(e.to_string()))?;

        let transport = self.build_transport(mailbox)?;
        transport
            .send(&message)
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MailboxStatus;

    fn mailbox() -> Mailbox {
        Mailbox {
            id: crate::id::Id::from("mailbox-1"),
            email: "sender@example.com".to_string(),
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_username: "sender@example.com".to_string(),
            smtp_password: "secret".to_string(),
            status: MailboxStatus::Active,
        }
    }

    #[test]
    fn rejects_invalid_recipient_before_touching_the_network() {
        let transport = SmtpTransport::new(true, Duration::from_secs(10));
        let result = transport.send(&mailbox(), "not-an-email", "Subject", "<p>hi</p>");
        assert!(matches!(result, Err(TransportError::InvalidRecipient(_))));
    }
}
