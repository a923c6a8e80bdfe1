use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

/// SMTP delivery timeout.
const SMTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    #[error("adresse invalide : {0}")]
    InvalidAddress(String),
    #[error("échec de construction du message : {0}")]
    Build(#[from] lettre::error::Error),
    #[error("échec de connexion SMTP : {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("tâche d'envoi interrompue")]
    TaskFailed,
}

/// Outbound SMTP sender. A fresh transport is built per send so a dropped
/// connection never poisons later deliveries.
#[derive(Clone)]
pub struct SmtpSender {
    host: String,
    port: u16,
    credentials: Credentials,
    from_header: String,
}

impl SmtpSender {
    pub fn new(
        host: String,
        port: u16,
        username: String,
        password: String,
        from_email: String,
        from_name: String,
    ) -> Self {
        Self {
            host,
            port,
            credentials: Credentials::new(username, password),
            from_header: format!("{} <{}>", from_name, from_email),
        }
    }

    fn build_transport(&self) -> Result<SmtpTransport, SmtpError> {
        Ok(SmtpTransport::relay(&self.host)?
            .port(self.port)
            .credentials(self.credentials.clone())
            .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECS)))
            .build())
    }

    /// Deliver a plain-text message, optionally with a Reply-To header.
    /// The blocking lettre transport runs on the blocking thread pool.
    pub async fn send(
        &self,
        to: &str,
        reply_to: Option<&str>,
        subject: &str,
        body: String,
    ) -> Result<(), SmtpError> {
        let mut builder = Message::builder()
            .from(
                self.from_header
                    .parse()
                    .map_err(|_| SmtpError::InvalidAddress(self.from_header.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| SmtpError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);

        if let Some(reply_to) = reply_to {
            builder = builder.reply_to(
                reply_to
                    .parse()
                    .map_err(|_| SmtpError::InvalidAddress(reply_to.to_string()))?,
            );
        }

        let email = builder.body(body)?;
        let transport = self.build_transport()?;

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|_| SmtpError::TaskFailed)??;

        Ok(())
    }
}
