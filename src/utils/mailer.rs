//! Transactional email over SMTP. Delivery runs on a spawned task and a
//! failure is only logged: the operation that triggered the email stands.

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use thiserror::Error;
use tracing::{error, info};

use crate::utils::config::SmtpSettings;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build email: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Clone)]
pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Mailer {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, MailError> {
        if !settings.enabled {
            return Ok(Self::disabled(&settings.from));
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            .port(settings.port);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: Some(builder.build()),
            from: settings.from.clone(),
        })
    }

    /// A mailer that logs messages instead of sending them.
    pub fn disabled(from: &str) -> Self {
        Self {
            transport: None,
            from: from.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub fn build_message(&self, email: &Email) -> Result<Message, MailError> {
        let message = Message::builder()
            .from(self.from.parse::<Mailbox>()?)
            .to(email.to.parse::<Mailbox>()?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())?;
        Ok(message)
    }

    pub async fn send(&self, email: Email) -> Result<(), MailError> {
        let message = self.build_message(&email)?;
        match &self.transport {
            Some(transport) => {
                transport.send(message).await?;
                info!("Email '{}' sent to {}", email.subject, email.to);
            }
            None => info!("Email delivery disabled, skipped '{}' to {}", email.subject, email.to),
        }
        Ok(())
    }

    /// Sends in the background; errors are logged and swallowed.
    pub fn dispatch(&self, email: Email) {
        let mailer = self.clone();
        tokio::spawn(async move {
            let to = email.to.clone();
            if let Err(e) = mailer.send(email).await {
                error!("Failed to send email to {}: {}", to, e);
            }
        });
    }
}

pub fn invitation_email(to: &str, company_name: &str, role: &str, link: &str, ttl_hours: i64) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("You have been invited to join {company_name}"),
        body: format!(
            "You have been invited to join {company_name} as {role}.\n\n\
             Complete your signup here:\n{link}\n\n\
             This invitation expires in {ttl_hours} hours. If you did not expect it, ignore this email."
        ),
    }
}

pub fn otp_email(to: &str, code: &str, ttl_minutes: i64) -> Email {
    Email {
        to: to.to_string(),
        subject: "Your password reset code".to_string(),
        body: format!(
            "Your password reset code is {code}.\n\n\
             It expires in {ttl_minutes} minutes. If you did not request a reset, ignore this email."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invitation_email_contains_link() {
        let email = invitation_email(
            "new@acme.io",
            "Acme",
            "recruiter",
            "http://localhost:3000/accept-invitation?token=abc",
            72,
        );
        assert_eq!(email.subject, "You have been invited to join Acme");
        assert!(email.body.contains("accept-invitation?token=abc"));
        assert!(email.body.contains("as recruiter"));
    }

    #[test]
    fn test_build_message_rejects_bad_address() {
        let mailer = Mailer::disabled("no-reply@staffhub.local");
        let bad = otp_email("not-an-address", "123456", 10);
        assert!(matches!(mailer.build_message(&bad), Err(MailError::Address(_))));
        let good = otp_email("ana@acme.io", "123456", 10);
        assert!(mailer.build_message(&good).is_ok());
    }

    #[tokio::test]
    async fn test_disabled_mailer_skips_delivery() {
        let mailer = Mailer::disabled("no-reply@staffhub.local");
        assert!(!mailer.is_enabled());
        assert!(mailer.send(otp_email("ana@acme.io", "042042", 10)).await.is_ok());
    }
}
