use serde::Serialize;

/// Utilization classification used by health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Healthy,
    Moderate,
    Warning,
    Critical,
}

impl PoolStatus {
    pub fn from_utilization(percent: f64) -> Self {
        if percent > 90.0 {
            PoolStatus::Critical
        } else if percent > 80.0 {
            PoolStatus::Warning
        } else if percent > 70.0 {
            PoolStatus::Moderate
        } else {
            PoolStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Healthy => "healthy",
            PoolStatus::Moderate => "moderate",
            PoolStatus::Warning => "warning",
            PoolStatus::Critical => "critical",
        }
    }
}

/// Read-only snapshot of pool usage.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub active: u32,
    pub idle: u32,
    pub max: u32,
    pub utilization_percent: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub retry_attempts: u64,
    pub total_created: u64,
    pub liveness_failures: u64,
    pub status: PoolStatus,
}

impl PoolStats {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        active: u32,
        idle: u32,
        max: u32,
        total_requests: u64,
        failed_requests: u64,
        retry_attempts: u64,
        total_created: u64,
        liveness_failures: u64,
    ) -> Self {
        let utilization_percent = if max == 0 {
            0.0
        } else {
            (f64::from(active) / f64::from(max) * 10_000.0).round() / 100.0
        };

        Self {
            active,
            idle,
            max,
            utilization_percent,
            total_requests,
            failed_requests,
            retry_attempts,
            total_created,
            liveness_failures,
            status: PoolStatus::from_utilization(utilization_percent),
        }
    }

    /// Publish the current gauges to the metrics recorder.
    pub fn record(&self) {
        metrics::gauge!("db_pool_active").set(f64::from(self.active));
        metrics::gauge!("db_pool_idle").set(f64::from(self.idle));
        metrics::gauge!("db_pool_utilization_percent").set(self.utilization_percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_thresholds() {
        assert_eq!(PoolStatus::from_utilization(0.0), PoolStatus::Healthy);
        assert_eq!(PoolStatus::from_utilization(70.0), PoolStatus::Healthy);
        assert_eq!(PoolStatus::from_utilization(70.5), PoolStatus::Moderate);
        assert_eq!(PoolStatus::from_utilization(80.0), PoolStatus::Moderate);
        assert_eq!(PoolStatus::from_utilization(85.0), PoolStatus::Warning);
        assert_eq!(PoolStatus::from_utilization(90.0), PoolStatus::Warning);
        assert_eq!(PoolStatus::from_utilization(100.0), PoolStatus::Critical);
    }

    #[test]
    fn test_utilization_is_rounded_percentage() {
        let stats = PoolStats::new(1, 2, 3, 10, 1, 4, 3, 0);
        assert_eq!(stats.utilization_percent, 33.33);
        assert_eq!(stats.status, PoolStatus::Healthy);

        let full = PoolStats::new(10, 0, 10, 0, 0, 0, 10, 0);
        assert_eq!(full.utilization_percent, 100.0);
        assert_eq!(full.status, PoolStatus::Critical);
    }
}
