//! Event fan-out and transactional email.
//!
//! Domain events go to NATS on `sparepartshub.events.<kind>`. Events that
//! concern a customer are also rendered to an [`EmailMessage`] and handed to
//! the mail worker on `sparepartshub.email`. Without a NATS connection the
//! email is only previewed in the log.

use serde::Serialize;

use crate::domain::aggregates::{ComplaintStatus, OrderStatus, PaymentMethod};
use crate::domain::events::{ComplaintEvent, DomainEvent, EventLine, OrderEvent};
use crate::domain::value_objects::Money;

pub const EVENT_SUBJECT_PREFIX: &str = "sparepartshub.events";
pub const EMAIL_SUBJECT: &str = "sparepartshub.email";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html: String,
}

#[derive(Clone)]
pub struct Notifier {
    nats: Option<async_nats::Client>,
    mail_from: String,
}

impl Notifier {
    pub fn new(nats: Option<async_nats::Client>, mail_from: impl Into<String>) -> Self {
        Self { nats, mail_from: mail_from.into() }
    }

    /// Publishes `event` and, when a recipient is known, its email. Never fails.
    pub async fn dispatch(&self, event: &DomainEvent, recipient: Option<&str>) {
        let subject = format!("{EVENT_SUBJECT_PREFIX}.{}", event.kind());
        self.publish(subject, event).await;

        let Some(to) = recipient else { return };
        let Some(email) = render_email(event, to, &self.mail_from) else { return };
        if self.nats.is_some() {
            self.publish(EMAIL_SUBJECT.to_string(), &email).await;
        } else {
            tracing::info!(to = %email.to, subject = %email.subject, "📧 [Email Preview]");
        }
    }

    async fn publish<T: Serialize>(&self, subject: String, payload: &T) {
        let Some(nats) = &self.nats else { return };
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(%subject, "failed to serialize payload: {}", e);
                return;
            }
        };
        if let Err(e) = nats.publish(subject.clone(), bytes.into()).await {
            tracing::warn!(%subject, "publish failed: {}", e);
        }
    }
}

/// Builds the customer email for an event, if the event warrants one.
pub fn render_email(event: &DomainEvent, to: &str, from: &str) -> Option<EmailMessage> {
    let (subject, html) = match event {
        DomainEvent::Order(OrderEvent::Placed { order_number, lines, total_amount, payment_method, .. }) => (
            format!("Order Confirmed — #{order_number}"),
            order_confirmation_html(order_number, lines, Money::inr(*total_amount), *payment_method),
        ),
        DomainEvent::Order(OrderEvent::StatusChanged { order_number, status, tracking_number, .. }) => (
            format!("Order #{order_number} — {}", status.as_str().to_uppercase()),
            status_update_html(order_number, *status, tracking_number.as_deref()),
        ),
        DomainEvent::Complaint(ComplaintEvent::Responded { subject, responder_name, message, status, .. }) => (
            format!("Complaint Update — {subject}"),
            complaint_response_html(subject, responder_name, message, *status),
        ),
        DomainEvent::Order(OrderEvent::Paid { .. }) | DomainEvent::Product(_) => return None,
    };
    Some(EmailMessage { to: to.to_string(), from: from.to_string(), subject, html })
}

fn layout(title: &str, body: &str, footer: &str) -> String {
    format!(
        r#"<div style="font-family:Arial,sans-serif;max-width:600px;margin:auto"><h2 style="color:#1e40af">🔧 SparePartsHub — {title}</h2>{body}<hr/><p style="color:#6b7280;font-size:12px">{footer}</p></div>"#
    )
}

fn order_confirmation_html(order_number: &str, lines: &[EventLine], total: Money, method: PaymentMethod) -> String {
    let items: String = lines
        .iter()
        .map(|l| format!("<li>{} × {} — {}</li>", escape(&l.name), l.quantity, Money::inr(l.line_total)))
        .collect();
    let body = format!(
        "<p>Hi! Your order <strong>#{order_number}</strong> has been placed successfully.</p><h3>Items:</h3><ul>{items}</ul><p><strong>Total: {total}</strong></p><p>Payment: {}</p>",
        method.label()
    );
    layout("Order Confirmation", &body, "Thank you for shopping with SparePartsHub!")
}

fn status_color(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Confirmed => "#16a34a",
        OrderStatus::Shipped => "#2563eb",
        OrderStatus::Delivered => "#059669",
        OrderStatus::Cancelled => "#dc2626",
        _ => "#374151",
    }
}

fn status_update_html(order_number: &str, status: OrderStatus, tracking_number: Option<&str>) -> String {
    let tracking = tracking_number
        .map(|t| format!("<p>Tracking: <strong>{}</strong></p>", escape(t)))
        .unwrap_or_default();
    let body = format!(
        r#"<p>Your order <strong>#{order_number}</strong> status has been updated:</p><p style="font-size:24px;color:{};font-weight:bold">{}</p>{tracking}"#,
        status_color(status),
        status.as_str().to_uppercase()
    );
    layout("Order Update", &body, "Thank you for shopping with SparePartsHub!")
}

fn complaint_response_html(subject: &str, responder: &str, message: &str, status: ComplaintStatus) -> String {
    let body = format!(
        r#"<p>Your complaint "<strong>{}</strong>" received a response from <strong>{}</strong>:</p><blockquote style="border-left:3px solid #1e40af;padding-left:12px;color:#374151">{}</blockquote><p>Status: <strong>{}</strong></p>"#,
        escape(subject),
        escape(responder),
        escape(message),
        status.as_str()
    );
    layout("Complaint Update", &body, "Thank you for your patience!")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
