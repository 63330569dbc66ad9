use serde::Deserialize;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::models::{Severity, SubscriptionInput};

fn validate_types(types: &[String]) -> Result<(), ValidationError> {
    if types.len() > 20 {
        return Err(ValidationError::new("too_many_types"));
    }
    if types
        .iter()
        .any(|t| t.trim().is_empty() || t.len() > 50)
    {
        return Err(ValidationError::new("invalid_type"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpsertSubscriptionRequest {
    /// Empty or omitted means every disaster type.
    #[serde(default)]
    #[validate(custom(function = "validate_types", message = "Invalid disaster types"))]
    #[schema(example = json!(["flood", "cyclone"]))]
    pub disaster_types: Vec<String>,

    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,

    #[validate(length(max = 255))]
    #[schema(example = "Kerala")]
    pub region: Option<String>,

    #[serde(default = "default_email_enabled")]
    pub email_enabled: bool,
}

fn default_min_severity() -> Severity {
    Severity::Low
}

fn default_email_enabled() -> bool {
    true
}

impl UpsertSubscriptionRequest {
    pub fn into_input(self) -> SubscriptionInput {
        let mut disaster_types: Vec<String> = self
            .disaster_types
            .iter()
            .map(|t| t.trim().to_lowercase())
            .collect();
        disaster_types.sort();
        disaster_types.dedup();

        SubscriptionInput {
            disaster_types,
            min_severity: self.min_severity,
            region: self
                .region
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            email_enabled: self.email_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_normalization() {
        let request: UpsertSubscriptionRequest = serde_json::from_value(serde_json::json!({
            "disaster_types": ["Flood", "flood ", "Cyclone"],
            "region": "   "
        }))
        .expect("deserialize");
        assert!(request.validate().is_ok());

        let input = request.into_input();
        assert_eq!(input.disaster_types, vec!["cyclone", "flood"]);
        assert_eq!(input.min_severity, Severity::Low);
        assert_eq!(input.region, None);
        assert!(input.email_enabled);
    }

    #[test]
    fn test_blank_type_is_invalid() {
        let request: UpsertSubscriptionRequest =
            serde_json::from_value(serde_json::json!({ "disaster_types": [" "] }))
                .expect("deserialize");
        assert!(request.validate().is_err());
    }
}
