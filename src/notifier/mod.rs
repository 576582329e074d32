//! # Email price alerts
//!
//! This module delivers price alerts by email over SMTP. Each alert becomes a
//! short plain-text message telling the recipient which product reached their
//! target and at what price.
//!
//! ## Message Format
//!
//! - **Subject**: `Alert: {product} dropped to ${current}!`
//! - **Body**: product name, current price, target price and the product link
//!
//! ## Delivery Semantics
//!
//! A send either returns `Ok(())`, meaning the SMTP server accepted the
//! message, or a [`NotificationError`]. The target notifier job only marks an
//! item notified after `Ok(())`, so every error leaves the alert pending for
//! the next run.
//!
//! ## Environment Configuration
//!
//! Set `SMTP_HOST` and `SMTP_FROM_ADDRESS` to enable delivery. Without a host
//! the notifier starts disabled: it logs a warning once and every send fails
//! with [`NotificationError::Disabled`], so alerts accumulate instead of being
//! marked as sent.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use crate::error::NotificationError;
use crate::models::PriceAlert;
use crate::traits::Notifier;

/// SMTP connection settings.
///
/// The password is kept out of `Debug` output.
#[derive(Clone)]
pub struct SmtpSettings {
    /// SMTP server hostname (e.g. `smtp.gmail.com`).
    pub host: String,
    /// Server port; 587 for STARTTLS.
    pub port: u16,
    /// Optional login; used only together with `password`.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Envelope and header sender address.
    pub from_address: String,
    /// Display name shown next to the sender address.
    pub from_name: String,
    /// Upgrade the connection with STARTTLS. Disable only for local relays.
    pub use_tls: bool,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// Email notifier for price alerts.
///
/// Holds a pooled async SMTP transport and the sender mailbox. Both are
/// `None` when SMTP is not configured, in which case every alert fails with
/// [`NotificationError::Disabled`].
///
/// ## Thread Safety
///
/// The transport pools its connections internally and is safe to share across
/// tasks; the notifier is used behind an `Arc<dyn Notifier>`.
pub struct EmailNotifier {
    transport: Option<(AsyncSmtpTransport<Tokio1Executor>, Mailbox)>,
}

impl EmailNotifier {
    /// Builds a notifier from optional SMTP settings.
    ///
    /// No connection is made here; the transport connects lazily on the first
    /// send.
    ///
    /// ## Errors
    ///
    /// - [`NotificationError::Address`] if the sender address does not parse
    /// - [`NotificationError::Delivery`] if the TLS relay cannot be set up
    pub fn new(settings: Option<SmtpSettings>) -> Result<Self, NotificationError> {
        let Some(settings) = settings else {
            warn!("SMTP_HOST not set - price alerts will stay pending until email is configured");
            return Ok(Self { transport: None });
        };

        let sender = format!("{} <{}>", settings.from_name, settings.from_address);
        let from: Mailbox = sender.parse().map_err(|e| NotificationError::Address {
            address: sender.clone(),
            reason: format!("{e}"),
        })?;

        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| NotificationError::Delivery(format!("{e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        let mut builder = builder.port(settings.port);
        if let (Some(username), Some(password)) = (settings.username, settings.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        debug!("SMTP notifier configured for {}:{}", settings.host, settings.port);

        Ok(Self {
            transport: Some((builder.build(), from)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    /// Sends one alert email.
    ///
    /// ## Errors
    ///
    /// - [`NotificationError::Disabled`] when SMTP is not configured
    /// - [`NotificationError::Address`] when the recipient does not parse
    /// - [`NotificationError::Message`] when the message cannot be assembled
    /// - [`NotificationError::Delivery`] when the server rejects or the
    ///   connection fails
    async fn notify(&self, alert: &PriceAlert) -> Result<(), NotificationError> {
        let Some((transport, from)) = &self.transport else {
            return Err(NotificationError::Disabled);
        };

        let message = build_message(from.clone(), alert)?;

        transport
            .send(message)
            .await
            .map_err(|e| NotificationError::Delivery(format!("{e}")))?;

        info!("Price alert sent to {} for {}", alert.recipient, alert.product_name);
        Ok(())
    }
}

/// Subject line for an alert.
pub fn alert_subject(alert: &PriceAlert) -> String {
    format!(
        "Alert: {} dropped to ${}!",
        alert.product_name, alert.current_price
    )
}

/// Plain-text body for an alert.
pub fn alert_body(alert: &PriceAlert) -> String {
    format!(
        "Hi,\n\n\
         Great news! {name} has dropped to your target price of ${target}.\n\n\
         Current Price: ${current}\n\
         Target Price: ${target}\n\n\
         {url}\n\n\
         Check it out before it runs out!\n\n\
         Best regards,\n\
         Price Tracker Team\n",
        name = alert.product_name,
        target = alert.target_price,
        current = alert.current_price,
        url = alert.product_url,
    )
}

fn build_message(from: Mailbox, alert: &PriceAlert) -> Result<Message, NotificationError> {
    let to: Mailbox = alert
        .recipient
        .parse()
        .map_err(|e| NotificationError::Address {
            address: alert.recipient.clone(),
            reason: format!("{e}"),
        })?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(alert_subject(alert))
        .header(ContentType::TEXT_PLAIN)
        .body(alert_body(alert))
        .map_err(|e| NotificationError::Message(format!("{e}")))
}
