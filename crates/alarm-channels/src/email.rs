use crate::{ChannelAdapter, ChannelMessage};
use alarm_common::{AdapterOutcome, Channel, ErrorKind};
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_use_tls: bool,
    pub from_address: String,
}

pub struct EmailAdapter {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl EmailAdapter {
    pub fn new(config: &EmailConfig) -> Result<Self, String> {
        let builder = if config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| e.to_string())?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, message: &ChannelMessage) -> AdapterOutcome {
        let subject = message.rendered_subject.clone().unwrap_or_default();

        let email = match Message::builder()
            .from(match self.from_address.parse() {
                Ok(addr) => addr,
                Err(e) => return AdapterOutcome::failure("smtp", ErrorKind::Permanent, format!("invalid from address: {e}")),
            })
            .to(match message.recipient.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    return AdapterOutcome::failure(
                        "smtp",
                        ErrorKind::InvalidRecipient,
                        format!("invalid recipient address: {e}"),
                    )
                }
            })
            .subject(subject)
            .body(message.rendered_body.clone())
        {
            Ok(m) => m,
            Err(e) => return AdapterOutcome::failure("smtp", ErrorKind::Permanent, e.to_string()),
        };

        match self.transport.send(email).await {
            Ok(response) => {
                let mut outcome = AdapterOutcome::success("smtp", None);
                outcome.response = Some(format!("{:?}", response.code()));
                outcome
            }
            Err(e) => {
                let kind = classify_smtp_error(&e);
                AdapterOutcome::failure("smtp", kind, e.to_string())
            }
        }
    }
}

fn classify_smtp_error(error: &lettre::transport::smtp::Error) -> ErrorKind {
    if error.is_permanent() {
        ErrorKind::Permanent
    } else if error.is_transient() {
        ErrorKind::Retryable
    } else {
        ErrorKind::Retryable
    }
}
