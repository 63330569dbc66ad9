use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::report::{DisasterReport, Severity};

/// Notification preferences; at most one row per user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub subscription_id: i64,
    pub user_id: i64,
    /// Empty means every type.
    pub disaster_types: Vec<String>,
    pub min_severity: Severity,
    /// Case-insensitive substring of the report location.
    pub region: Option<String>,
    pub email_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, report: &DisasterReport) -> bool {
        if report.severity < self.min_severity {
            return false;
        }

        if !self.disaster_types.is_empty()
            && !self
                .disaster_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&report.disaster_type))
        {
            return false;
        }

        match self.region.as_deref().map(str::trim) {
            Some(region) if !region.is_empty() => report
                .location
                .to_lowercase()
                .contains(&region.to_lowercase()),
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionInput {
    pub disaster_types: Vec<String>,
    pub min_severity: Severity,
    pub region: Option<String>,
    pub email_enabled: bool,
}

/// A subscription joined with the address to notify.
#[derive(Debug, Clone, FromRow)]
pub struct Subscriber {
    #[sqlx(flatten)]
    pub subscription: Subscription,
    pub email: String,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::report::ReportStatus;

    fn report(severity: Severity, disaster_type: &str, location: &str) -> DisasterReport {
        DisasterReport {
            report_id: 1,
            user_id: 7,
            title: "River breach".to_string(),
            description: "Water over the levee".to_string(),
            disaster_type: disaster_type.to_string(),
            location: location.to_string(),
            latitude: None,
            longitude: None,
            severity,
            status: ReportStatus::Verified,
            verified_by: Some(1),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn subscription(types: &[&str], min: Severity, region: Option<&str>) -> Subscription {
        Subscription {
            subscription_id: 1,
            user_id: 2,
            disaster_types: types.iter().map(|t| t.to_string()).collect(),
            min_severity: min,
            region: region.map(str::to_string),
            email_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_severity_threshold() {
        let sub = subscription(&[], Severity::High, None);
        assert!(!sub.matches(&report(Severity::Medium, "flood", "Chennai")));
        assert!(sub.matches(&report(Severity::High, "flood", "Chennai")));
        assert!(sub.matches(&report(Severity::Critical, "flood", "Chennai")));
    }

    #[test]
    fn test_type_filter_empty_means_all() {
        let all = subscription(&[], Severity::Low, None);
        assert!(all.matches(&report(Severity::Low, "wildfire", "Anywhere")));

        let floods = subscription(&["Flood", "cyclone"], Severity::Low, None);
        assert!(floods.matches(&report(Severity::Low, "flood", "Anywhere")));
        assert!(!floods.matches(&report(Severity::Low, "earthquake", "Anywhere")));
    }

    #[test]
    fn test_region_is_case_insensitive_substring() {
        let sub = subscription(&[], Severity::Low, Some("kerala"));
        assert!(sub.matches(&report(Severity::Low, "flood", "Kochi, Kerala")));
        assert!(!sub.matches(&report(Severity::Low, "flood", "Chennai, Tamil Nadu")));

        let blank = subscription(&[], Severity::Low, Some("  "));
        assert!(blank.matches(&report(Severity::Low, "flood", "Chennai")));
    }
}
