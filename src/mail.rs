use crate::error::Result;
use log::info;

#[derive(Debug, Clone, PartialEq)]
pub struct ContactMessage {
    pub from: String,
    pub subject: String,
    pub message: String,
}

/// Outbound delivery of contact-form messages.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &ContactMessage) -> Result<()>;
}

/// Hands messages to the log instead of a mail server.
pub struct LogMailer {
    recipient: String,
}

impl LogMailer {
    pub fn new(recipient: String) -> Self {
        LogMailer { recipient }
    }
}

impl Mailer for LogMailer {
    fn send(&self, message: &ContactMessage) -> Result<()> {
        info!(
            "contact message for {} from {}: {:?}\n{}",
            self.recipient, message.from, message.subject, message.message
        );
        Ok(())
    }
}
