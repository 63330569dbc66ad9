use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use std::time::Duration;

use crate::config::SmtpConfig;
use crate::models::DisasterReport;

/// Delivers disaster alerts to subscribers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_report_alert(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        report: &DisasterReport,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct EmailNotifier {
    mailer: SmtpTransport,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        let from = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| AppError::ConfigError(e.into()))?;

        tracing::info!(host = %config.host, port = config.port, "Email notifier initialized");

        Ok(Self { mailer, from })
    }
}

pub(crate) fn alert_subject(report: &DisasterReport) -> String {
    format!(
        "[{}] {} alert: {}",
        report.severity.as_str().to_uppercase(),
        report.disaster_type,
        report.location
    )
}

pub(crate) fn alert_body(to_name: Option<&str>, report: &DisasterReport) -> String {
    let mut body = format!("Hello {},\n\n", to_name.unwrap_or("there"));
    body.push_str("A disaster report matching your alert preferences has been verified.\n\n");
    body.push_str(&format!("Title: {}\n", report.title));
    body.push_str(&format!("Type: {}\n", report.disaster_type));
    body.push_str(&format!("Severity: {}\n", report.severity));
    body.push_str(&format!("Location: {}\n", report.location));
    if let (Some(lat), Some(lon)) = (report.latitude, report.longitude) {
        body.push_str(&format!("Coordinates: {:.5}, {:.5}\n", lat, lon));
    }
    body.push_str(&format!("\n{}\n", report.description));
    body.push_str("\nStay safe and follow guidance from local authorities.\n");
    body
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_report_alert(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        report: &DisasterReport,
    ) -> Result<(), AppError> {
        let to = to_email
            .parse()
            .map_err(|e: lettre::address::AddressError| AppError::EmailError(e.to_string()))?;

        let plain = alert_body(to_name, report);
        let html = format!(
            "<html><body style=\"font-family: Arial, sans-serif;\"><pre>{}</pre></body></html>",
            html_escape(&plain)
        );

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(alert_subject(report))
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html),
                    ),
            )?;

        // SmtpTransport is blocking.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, report_id = report.report_id, "Alert email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send alert email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Used when notifications are disabled; logs instead of sending.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_report_alert(
        &self,
        to_email: &str,
        _to_name: Option<&str>,
        report: &DisasterReport,
    ) -> Result<(), AppError> {
        tracing::info!(
            to = %to_email,
            report_id = report.report_id,
            "Notifications disabled, alert not sent"
        );
        Ok(())
    }
}

/// Records alerts in memory.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(String, i64)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(recipient, report_id)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, i64)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_report_alert(
        &self,
        to_email: &str,
        _to_name: Option<&str>,
        report: &DisasterReport,
    ) -> Result<(), AppError> {
        self.sent.lock().push((to_email.to_string(), report.report_id));
        Ok(())
    }
}
