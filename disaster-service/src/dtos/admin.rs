use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::{ROLE_ADMIN, ROLE_PUBLIC};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetRoleRequest {
    #[schema(example = "admin")]
    pub role: String,
}

impl SetRoleRequest {
    /// Canonical spelling of a known role, or `None`.
    pub fn normalized_role(&self) -> Option<&'static str> {
        match self.role.trim().to_lowercase().as_str() {
            "admin" => Some(ROLE_ADMIN),
            "public" => Some(ROLE_PUBLIC),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListUsersQuery {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

/// Pool statistics as served by `/admin/pool/stats`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PoolStatsResponse {
    pub active: u32,
    pub idle: u32,
    pub max: u32,
    pub utilization_percent: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub retry_attempts: u64,
    pub total_created: u64,
    pub liveness_failures: u64,
    #[schema(example = "healthy")]
    pub status: String,
}

impl From<service_core::pool::PoolStats> for PoolStatsResponse {
    fn from(stats: service_core::pool::PoolStats) -> Self {
        Self {
            active: stats.active,
            idle: stats.idle,
            max: stats.max,
            utilization_percent: stats.utilization_percent,
            total_requests: stats.total_requests,
            failed_requests: stats.failed_requests,
            retry_attempts: stats.retry_attempts,
            total_created: stats.total_created,
            liveness_failures: stats.liveness_failures,
            status: stats.status.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_normalization() {
        let role = |r: &str| SetRoleRequest { role: r.to_string() }.normalized_role();
        assert_eq!(role("ADMIN"), Some("admin"));
        assert_eq!(role("public"), Some("Public"));
        assert_eq!(role("superuser"), None);
    }
}
