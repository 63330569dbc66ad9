//! Fan-out of verified reports to matching subscribers.

use std::sync::Arc;

use crate::models::{DisasterReport, Subscriber};
use crate::services::{email::Notifier, Database};

/// Subscribers who should hear about `report`. The reporter is never
/// alerted about their own report.
pub fn recipients<'a>(subscribers: &'a [Subscriber], report: &DisasterReport) -> Vec<&'a Subscriber> {
    subscribers
        .iter()
        .filter(|s| s.subscription.email_enabled)
        .filter(|s| s.subscription.user_id != report.user_id)
        .filter(|s| s.subscription.matches(report))
        .collect()
}

/// Send one alert per recipient. Failures are logged and counted, never
/// propagated. Returns the number of alerts delivered.
pub async fn deliver(
    notifier: &dyn Notifier,
    recipients: &[&Subscriber],
    report: &DisasterReport,
) -> usize {
    let mut delivered = 0;
    for subscriber in recipients {
        match notifier
            .send_report_alert(&subscriber.email, subscriber.name.as_deref(), report)
            .await
        {
            Ok(()) => {
                delivered += 1;
                metrics::counter!("alerts_sent_total").increment(1);
            }
            Err(e) => {
                metrics::counter!("alerts_failed_total").increment(1);
                tracing::warn!(
                    error = %e,
                    user_id = subscriber.subscription.user_id,
                    report_id = report.report_id,
                    "Failed to deliver report alert"
                );
            }
        }
    }
    delivered
}

/// Look up matching subscribers and deliver in the background. Returns how
/// many alerts were queued.
pub async fn dispatch(
    db: &Database,
    notifier: Arc<dyn Notifier>,
    report: DisasterReport,
) -> usize {
    let subscribers = match db.email_subscribers().await {
        Ok(subscribers) => subscribers,
        Err(e) => {
            metrics::counter!("alerts_failed_total").increment(1);
            tracing::error!(error = %e, report_id = report.report_id, "Could not load subscribers");
            return 0;
        }
    };

    let selected: Vec<Subscriber> = recipients(&subscribers, &report)
        .into_iter()
        .cloned()
        .collect();
    let queued = selected.len();
    if queued == 0 {
        return 0;
    }

    tokio::spawn(async move {
        let refs: Vec<&Subscriber> = selected.iter().collect();
        let delivered = deliver(notifier.as_ref(), &refs, &report).await;
        tracing::info!(
            report_id = report.report_id,
            queued,
            delivered,
            "Report alerts processed"
        );
    });

    queued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReportStatus, Severity, Subscription};
    use crate::services::email::MockNotifier;
    use async_trait::async_trait;
    use chrono::Utc;
    use service_core::error::AppError;

    fn report() -> DisasterReport {
        DisasterReport {
            report_id: 77,
            user_id: 1,
            title: "Cyclone landfall".to_string(),
            description: "Winds above 150 km/h".to_string(),
            disaster_type: "cyclone".to_string(),
            location: "Puri, Odisha".to_string(),
            latitude: None,
            longitude: None,
            severity: Severity::Critical,
            status: ReportStatus::Verified,
            verified_by: Some(9),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn subscriber(user_id: i64, email: &str, region: Option<&str>, email_enabled: bool) -> Subscriber {
        Subscriber {
            subscription: Subscription {
                subscription_id: user_id,
                user_id,
                disaster_types: vec![],
                min_severity: Severity::High,
                region: region.map(str::to_string),
                email_enabled,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            email: email.to_string(),
            name: None,
        }
    }

    #[test]
    fn test_recipients_filtering() {
        let subscribers = vec![
            subscriber(1, "reporter@example.org", None, true),
            subscriber(2, "odisha@example.org", Some("odisha"), true),
            subscriber(3, "kerala@example.org", Some("kerala"), true),
            subscriber(4, "muted@example.org", None, false),
            subscriber(5, "everywhere@example.org", None, true),
        ];

        let emails: Vec<&str> = recipients(&subscribers, &report())
            .into_iter()
            .map(|s| s.email.as_str())
            .collect();
        assert_eq!(emails, vec!["odisha@example.org", "everywhere@example.org"]);
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send_report_alert(
            &self,
            _to_email: &str,
            _to_name: Option<&str>,
            _report: &DisasterReport,
        ) -> Result<(), AppError> {
            Err(AppError::EmailError("smtp down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_deliver_counts_successes_only() {
        let subscribers = vec![
            subscriber(2, "a@example.org", None, true),
            subscriber(3, "b@example.org", None, true),
        ];
        let refs: Vec<&Subscriber> = subscribers.iter().collect();

        let mock = MockNotifier::new();
        assert_eq!(deliver(&mock, &refs, &report()).await, 2);
        assert_eq!(
            mock.sent(),
            vec![("a@example.org".to_string(), 77), ("b@example.org".to_string(), 77)]
        );

        assert_eq!(deliver(&FailingNotifier, &refs, &report()).await, 0);
    }
}
