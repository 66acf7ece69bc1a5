use crate::config::Settings;
use crate::delivery::{DeliveryChannel, ReportPayload};
use anyhow::Context;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

const DEFAULT_PORT: u16 = 587;

pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpChannel {
    /// `SMTP_TLS` selects `tls` (implicit), `starttls` (default) or `none`.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let host = settings.smtp_host.as_deref().context("SMTP_HOST is required")?;
        let from_addr = settings
            .email_from
            .as_deref()
            .context("EMAIL_FROM is required for SMTP delivery")?;
        let from: Mailbox = from_addr
            .parse()
            .with_context(|| format!("invalid EMAIL_FROM address: {from_addr}"))?;

        let port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let tls = std::env::var("SMTP_TLS").unwrap_or_else(|_| "starttls".to_string());

        let mut builder = match tls.to_ascii_lowercase().as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .context("failed to build SMTP relay")?,
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .context("failed to build SMTP STARTTLS relay")?,
        }
        .port(port);

        if let (Some(user), Some(pass)) = (&settings.smtp_username, &settings.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait::async_trait]
impl DeliveryChannel for SmtpChannel {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn deliver(&self, recipient: &str, report: &ReportPayload) -> anyhow::Result<()> {
        let to: Mailbox = recipient
            .parse()
            .with_context(|| format!("invalid recipient address: {recipient}"))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(report.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(report.render_text())
            .context("failed to build report email")?;

        self.transport
            .send(email)
            .await
            .context("failed to send report email")?;
        Ok(())
    }
}
