//! Purchase notification mailers.
//!
//! - [`HttpMailer`]: posts to a transactional email API (JSON body, bearer
//!   token, proof attached as base64 JPEG)
//! - [`LogMailer`]: logs the notification; used when no API key is set

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use raffle_core::environment::Mailer;
use raffle_core::error::NotifyError;
use raffle_core::types::Purchase;
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Subject line of the operator notification
pub const SUBJECT: &str = "Compra recibida";
/// File name of the attached proof
pub const ATTACHMENT_NAME: &str = "Capture.jpg";

#[derive(Debug, Serialize)]
struct Address<'a> {
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    file_name: &'a str,
    content_type: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    from: Address<'a>,
    to: Vec<Address<'a>>,
    subject: &'a str,
    html: String,
    attachments: Vec<Attachment<'a>>,
}

/// HTML body listing the purchase details an operator needs to verify it.
#[must_use]
pub fn render_body(purchase: &Purchase) -> String {
    format!(
        "<h1>Nueva compra</h1>\
         <p>Una compra requiere verificación.</p>\
         <ul>\
         <li><strong>Compra:</strong> {id}</li>\
         <li><strong>Usuario:</strong> {user}</li>\
         <li><strong>Fecha:</strong> {date}</li>\
         <li><strong>Boletos:</strong> {quantity}</li>\
         <li><strong>Monto USD:</strong> ${usd:.2}</li>\
         <li><strong>Monto Bs:</strong> {bs:.2} Bs</li>\
         <li><strong>Método de pago:</strong> {method}</li>\
         <li><strong>Referencia:</strong> {reference}</li>\
         </ul>",
        id = purchase.id,
        user = purchase.user_id,
        date = purchase.created_at.format("%d %b %Y %H:%M"),
        quantity = purchase.quantity,
        usd = purchase.payment.amount_usd,
        bs = purchase.payment.amount_bs,
        method = escape(&purchase.payment.method),
        reference = escape(&purchase.payment.reference_digits),
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Email API client.
#[derive(Clone)]
pub struct HttpMailer {
    client: Client,
    api_key: String,
    sender: String,
    recipient: String,
    url: String,
}

impl HttpMailer {
    /// Create a mailer posting to `url`.
    ///
    /// `timeout` bounds each HTTP request; the notification queue applies its
    /// own deadline on top.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            url: url.into(),
        })
    }

    fn payload<'a>(&'a self, purchase: &Purchase) -> EmailPayload<'a> {
        EmailPayload {
            from: Address {
                address: &self.sender,
                display_name: Some("Compras"),
            },
            to: vec![Address {
                address: &self.recipient,
                display_name: None,
            }],
            subject: SUBJECT,
            html: render_body(purchase),
            attachments: vec![Attachment {
                file_name: ATTACHMENT_NAME,
                content_type: "image/jpeg",
                content: STANDARD.encode(&purchase.payment_proof),
            }],
        }
    }
}

impl std::fmt::Debug for HttpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMailer")
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Mailer for HttpMailer {
    fn notify<'a>(&'a self, purchase: &'a Purchase) -> NotifyFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&self.payload(purchase))
                .send()
                .await
                .map_err(|e| {
                    if e.is_builder() {
                        NotifyError::Payload(e.to_string())
                    } else {
                        NotifyError::Transport(e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                tracing::debug!(status = status.as_u16(), detail = %detail, "Email API rejected notification");
                return Err(NotifyError::Rejected {
                    status: status.as_u16(),
                });
            }

            Ok(())
        })
    }
}

/// Mailer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn notify<'a>(&'a self, purchase: &'a Purchase) -> NotifyFuture<'a> {
        Box::pin(async move {
            tracing::info!(
                purchase_id = %purchase.id,
                user_id = %purchase.user_id,
                quantity = purchase.quantity,
                "New purchase awaiting verification"
            );
            Ok(())
        })
    }
}
