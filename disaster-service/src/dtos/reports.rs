use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::models::{DisasterReport, NewReport, ReportChanges, ReportStatus, Severity};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

fn validate_disaster_type(value: &str) -> Result<(), ValidationError> {
    let ok = !value.trim().is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::new("disaster_type"))
    }
}

fn normalize_type(value: &str) -> String {
    value.trim().to_lowercase()
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateReportRequest {
    #[validate(length(min = 3, max = 200, message = "Title must be 3 to 200 characters"))]
    #[schema(example = "River overflowing near the bridge")]
    pub title: String,

    #[validate(length(min = 1, max = 5000, message = "Description is required"))]
    pub description: String,

    #[validate(
        length(min = 2, max = 50),
        custom(function = "validate_disaster_type", message = "Invalid disaster type")
    )]
    #[schema(example = "flood")]
    pub disaster_type: String,

    #[validate(length(min = 2, max = 255, message = "Location is required"))]
    #[schema(example = "Kochi, Kerala")]
    pub location: String,

    #[validate(range(min = -90.0, max = 90.0, message = "Latitude out of range"))]
    pub latitude: Option<f64>,

    #[validate(range(min = -180.0, max = 180.0, message = "Longitude out of range"))]
    pub longitude: Option<f64>,

    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Medium
}

impl CreateReportRequest {
    pub fn into_new_report(self, user_id: i64) -> NewReport {
        NewReport {
            user_id,
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            disaster_type: normalize_type(&self.disaster_type),
            location: self.location.trim().to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            severity: self.severity,
        }
    }
}

fn validate_coordinate_edit(req: &UpdateReportRequest) -> Result<(), ValidationError> {
    if req.clear_coordinates && (req.latitude.is_some() || req.longitude.is_some()) {
        return Err(ValidationError::new("clear_coordinates"));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[validate(schema(
    function = "validate_coordinate_edit",
    message = "clear_coordinates cannot be combined with latitude or longitude"
))]
pub struct UpdateReportRequest {
    #[validate(length(min = 3, max = 200))]
    pub title: Option<String>,

    #[validate(length(min = 1, max = 5000))]
    pub description: Option<String>,

    #[validate(
        length(min = 2, max = 50),
        custom(function = "validate_disaster_type", message = "Invalid disaster type")
    )]
    pub disaster_type: Option<String>,

    #[validate(length(min = 2, max = 255))]
    pub location: Option<String>,

    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,

    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,

    pub severity: Option<Severity>,

    /// Remove both coordinates from the report.
    #[serde(default)]
    pub clear_coordinates: bool,
}

impl UpdateReportRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.disaster_type.is_none()
            && self.location.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.severity.is_none()
            && !self.clear_coordinates
    }

    pub fn into_changes(self) -> ReportChanges {
        ReportChanges {
            title: self.title.map(|t| t.trim().to_string()),
            description: self.description.map(|d| d.trim().to_string()),
            disaster_type: self.disaster_type.as_deref().map(normalize_type),
            location: self.location.map(|l| l.trim().to_string()),
            latitude: self.latitude,
            longitude: self.longitude,
            severity: self.severity,
            clear_coordinates: self.clear_coordinates,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateReportStatusRequest {
    pub status: ReportStatus,
}

#[derive(Debug, Default, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListReportsQuery {
    pub status: Option<ReportStatus>,
    pub severity: Option<Severity>,
    pub disaster_type: Option<String>,
    /// Only reports filed by the caller.
    #[serde(default)]
    pub mine: bool,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReportListResponse {
    pub reports: Vec<DisasterReport>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusChangeResponse {
    pub report: DisasterReport,
    /// Subscribers queued for an alert email.
    pub notifications_queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request() -> CreateReportRequest {
        CreateReportRequest {
            title: "  Bridge washed out ".to_string(),
            description: "Road closed".to_string(),
            disaster_type: " Flood ".to_string(),
            location: "Kochi".to_string(),
            latitude: Some(9.93),
            longitude: Some(76.26),
            severity: Severity::High,
        }
    }

    #[test]
    fn test_create_request_normalizes() {
        let request = create_request();
        assert!(request.validate().is_ok());

        let new_report = request.into_new_report(4);
        assert_eq!(new_report.user_id, 4);
        assert_eq!(new_report.title, "Bridge washed out");
        assert_eq!(new_report.disaster_type, "flood");
    }

    #[test]
    fn test_coordinates_are_range_checked() {
        let request = CreateReportRequest {
            latitude: Some(91.0),
            ..create_request()
        };
        assert!(request.validate().is_err());

        let request = CreateReportRequest {
            longitude: Some(-180.5),
            ..create_request()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_disaster_type_charset() {
        let request = CreateReportRequest {
            disaster_type: "flood; DROP TABLE".to_string(),
            ..create_request()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_severity_defaults_to_medium() {
        let request: CreateReportRequest = serde_json::from_value(serde_json::json!({
            "title": "Tremor felt",
            "description": "Short shaking downtown",
            "disaster_type": "earthquake",
            "location": "Kathmandu"
        }))
        .expect("deserialize");
        assert_eq!(request.severity, Severity::Medium);
    }

    #[test]
    fn test_empty_update() {
        assert!(UpdateReportRequest::default().is_empty());
        let update = UpdateReportRequest {
            severity: Some(Severity::Low),
            ..UpdateReportRequest::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_update_can_clear_coordinates() {
        let update: UpdateReportRequest =
            serde_json::from_value(serde_json::json!({ "clear_coordinates": true }))
                .expect("deserialize");
        assert!(update.validate().is_ok());
        assert!(!update.is_empty());

        let changes = update.into_changes();
        assert!(changes.clear_coordinates);
        assert_eq!(changes.latitude, None);
    }

    #[test]
    fn test_clearing_and_setting_coordinates_conflict() {
        let update = UpdateReportRequest {
            latitude: Some(10.0),
            clear_coordinates: true,
            ..UpdateReportRequest::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_list_query_bounds() {
        let query = ListReportsQuery {
            limit: Some(101),
            ..ListReportsQuery::default()
        };
        assert!(query.validate().is_err());

        let query = ListReportsQuery {
            limit: Some(100),
            offset: Some(0),
            ..ListReportsQuery::default()
        };
        assert!(query.validate().is_ok());
    }
}
