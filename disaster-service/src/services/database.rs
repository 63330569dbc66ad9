//! Database service for disaster-service.
//!
//! Every method checks a connection out of the bounded pool for the duration
//! of one statement; the guard returns it when the method's scope ends.

use sqlx::{Postgres, QueryBuilder};
use std::time::Instant;
use tracing::{info, instrument};

use crate::db::DbPool;
use crate::models::{
    DisasterReport, NewReport, NewUser, ReportChanges, ReportFilter, ReportStatus, Subscriber,
    Subscription, SubscriptionInput, User,
};
use crate::services::error::ServiceError;
use crate::services::google::GoogleIdentity;

#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

fn observe(query: &'static str, started: Instant) {
    metrics::histogram!("db_query_duration_seconds", "query" => query)
        .record(started.elapsed().as_secs_f64());
}

const UNIQUE_EMAIL: &str = "idx_users_email_lower";
const UNIQUE_GOOGLE_ID: &str = "idx_users_google_id";

/// Domain error for a unique index on `users`, if it is one we name.
fn unique_violation_for(constraint: &str) -> Option<ServiceError> {
    match constraint {
        UNIQUE_EMAIL => Some(ServiceError::EmailAlreadyRegistered),
        UNIQUE_GOOGLE_ID => Some(ServiceError::GoogleAccountAlreadyLinked),
        _ => None,
    }
}

fn map_unique_violation(e: sqlx::Error) -> ServiceError {
    let mapped = match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            db_err.constraint().and_then(unique_violation_for)
        }
        _ => None,
    };
    mapped.unwrap_or(ServiceError::Database(e))
}

impl Database {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        crate::db::health_check(&self.pool)
            .await
            .map_err(ServiceError::Internal)
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    #[instrument(skip(self, email))]
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&mut *conn)
            .await?;

        observe("find_user_by_email", started);
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn find_user_by_id(&self, user_id: i64) -> Result<Option<User>, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;

        observe("find_user_by_id", started);
        Ok(user)
    }

    #[instrument(skip(self, google_id))]
    pub async fn find_user_by_google_id(
        &self,
        google_id: &str,
    ) -> Result<Option<User>, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE google_id = $1")
            .bind(google_id)
            .fetch_optional(&mut *conn)
            .await?;

        observe("find_user_by_google_id", started);
        Ok(user)
    }

    #[instrument(skip(self, input), fields(provider = ?input.auth_provider))]
    pub async fn create_user(&self, input: &NewUser) -> Result<User, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, password_hash, role, auth_provider, is_verified,
                               google_id, given_name, family_name, avatar_url, locale, last_login_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            RETURNING *
            "#,
        )
        .bind(&input.email)
        .bind(&input.name)
        .bind(&input.password_hash)
        .bind(&input.role)
        .bind(input.auth_provider)
        .bind(input.is_verified)
        .bind(&input.google_id)
        .bind(&input.given_name)
        .bind(&input.family_name)
        .bind(&input.avatar_url)
        .bind(&input.locale)
        .fetch_one(&mut *conn)
        .await
        .map_err(map_unique_violation)?;

        observe("create_user", started);
        info!(user_id = user.user_id, "User created");
        Ok(user)
    }

    /// Store the Google id on an account and refresh its profile fields.
    #[instrument(skip(self, identity))]
    pub async fn apply_google_login(
        &self,
        user_id: i64,
        identity: &GoogleIdentity,
    ) -> Result<User, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                google_id = $2,
                name = COALESCE($3, name),
                given_name = COALESCE($4, given_name),
                family_name = COALESCE($5, family_name),
                avatar_url = COALESCE($6, avatar_url),
                locale = COALESCE($7, locale),
                is_verified = is_verified OR $8,
                last_login_at = NOW(),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&identity.google_id)
        .bind(&identity.name)
        .bind(&identity.given_name)
        .bind(&identity.family_name)
        .bind(&identity.picture)
        .bind(&identity.locale)
        .bind(identity.email_verified)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ServiceError::UserNotFound)?;

        observe("apply_google_login", started);
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn touch_last_login(&self, user_id: i64) -> Result<(), ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        sqlx::query("UPDATE users SET last_login_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        observe("touch_last_login", started);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users ORDER BY created_at DESC, user_id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;

        observe("list_users", started);
        Ok(users)
    }

    #[instrument(skip(self))]
    pub async fn set_user_role(&self, user_id: i64, role: &str) -> Result<User, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE user_id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(role)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ServiceError::UserNotFound)?;

        observe("set_user_role", started);
        info!(user_id, role, "User role changed");
        Ok(user)
    }

    // -------------------------------------------------------------------------
    // Reports
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(user_id = input.user_id))]
    pub async fn create_report(&self, input: &NewReport) -> Result<DisasterReport, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let report = sqlx::query_as::<_, DisasterReport>(
            r#"
            INSERT INTO disaster_reports (user_id, title, description, disaster_type, location,
                                          latitude, longitude, severity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(input.user_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.disaster_type)
        .bind(&input.location)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.severity)
        .fetch_one(&mut *conn)
        .await?;

        observe("create_report", started);
        info!(report_id = report.report_id, severity = %report.severity, "Report created");
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn find_report(&self, report_id: i64) -> Result<Option<DisasterReport>, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let report = sqlx::query_as::<_, DisasterReport>(
            "SELECT * FROM disaster_reports WHERE report_id = $1",
        )
        .bind(report_id)
        .fetch_optional(&mut *conn)
        .await?;

        observe("find_report", started);
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn list_reports(
        &self,
        filter: &ReportFilter,
    ) -> Result<Vec<DisasterReport>, ServiceError> {
        let started = Instant::now();

        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM disaster_reports WHERE TRUE");
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(severity) = filter.severity {
            query.push(" AND severity = ").push_bind(severity);
        }
        if let Some(disaster_type) = &filter.disaster_type {
            query
                .push(" AND disaster_type = ")
                .push_bind(disaster_type.to_lowercase());
        }
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        query
            .push(" ORDER BY created_at DESC, report_id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let mut conn = self.pool.acquire().await?;
        let reports = query
            .build_query_as::<DisasterReport>()
            .fetch_all(&mut *conn)
            .await?;

        observe("list_reports", started);
        Ok(reports)
    }

    #[instrument(skip(self, changes))]
    pub async fn update_report(
        &self,
        report_id: i64,
        changes: &ReportChanges,
    ) -> Result<DisasterReport, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let report = sqlx::query_as::<_, DisasterReport>(
            r#"
            UPDATE disaster_reports SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                disaster_type = COALESCE($4, disaster_type),
                location = COALESCE($5, location),
                latitude = CASE WHEN $9 THEN NULL ELSE COALESCE($6, latitude) END,
                longitude = CASE WHEN $9 THEN NULL ELSE COALESCE($7, longitude) END,
                severity = COALESCE($8, severity),
                updated_at = NOW()
            WHERE report_id = $1
            RETURNING *
            "#,
        )
        .bind(report_id)
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(&changes.disaster_type)
        .bind(&changes.location)
        .bind(changes.latitude)
        .bind(changes.longitude)
        .bind(changes.severity)
        .bind(changes.clear_coordinates)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ServiceError::ReportNotFound)?;

        observe("update_report", started);
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn delete_report(&self, report_id: i64) -> Result<bool, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query("DELETE FROM disaster_reports WHERE report_id = $1")
            .bind(report_id)
            .execute(&mut *conn)
            .await?;

        observe("delete_report", started);
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-set on the status column. Returns `None` when the report
    /// no longer has status `from`.
    #[instrument(skip(self))]
    pub async fn transition_report(
        &self,
        report_id: i64,
        from: ReportStatus,
        to: ReportStatus,
        verified_by: Option<i64>,
    ) -> Result<Option<DisasterReport>, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let report = sqlx::query_as::<_, DisasterReport>(
            r#"
            UPDATE disaster_reports SET
                status = $3,
                verified_by = COALESCE($4, verified_by),
                updated_at = NOW()
            WHERE report_id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(report_id)
        .bind(from)
        .bind(to)
        .bind(verified_by)
        .fetch_optional(&mut *conn)
        .await?;

        observe("transition_report", started);
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn recent_verified_reports(
        &self,
        limit: i64,
    ) -> Result<Vec<DisasterReport>, ServiceError> {
        self.list_reports(&ReportFilter {
            status: Some(ReportStatus::Verified),
            limit,
            ..ReportFilter::default()
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn find_subscription(
        &self,
        user_id: i64,
    ) -> Result<Option<Subscription>, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let subscription =
            sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;

        observe("find_subscription", started);
        Ok(subscription)
    }

    #[instrument(skip(self, input))]
    pub async fn upsert_subscription(
        &self,
        user_id: i64,
        input: &SubscriptionInput,
    ) -> Result<Subscription, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, disaster_types, min_severity, region, email_enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                disaster_types = EXCLUDED.disaster_types,
                min_severity = EXCLUDED.min_severity,
                region = EXCLUDED.region,
                email_enabled = EXCLUDED.email_enabled,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&input.disaster_types)
        .bind(input.min_severity)
        .bind(&input.region)
        .bind(input.email_enabled)
        .fetch_one(&mut *conn)
        .await?;

        observe("upsert_subscription", started);
        Ok(subscription)
    }

    #[instrument(skip(self))]
    pub async fn delete_subscription(&self, user_id: i64) -> Result<bool, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        observe("delete_subscription", started);
        Ok(result.rows_affected() > 0)
    }

    /// Subscriptions with email delivery switched on, joined with the address.
    #[instrument(skip(self))]
    pub async fn email_subscribers(&self) -> Result<Vec<Subscriber>, ServiceError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await?;

        let subscribers = sqlx::query_as::<_, Subscriber>(
            r#"
            SELECT s.*, u.email, u.name
            FROM subscriptions s
            JOIN users u ON u.user_id = s.user_id
            WHERE s.email_enabled
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        observe("email_subscribers", started);
        Ok(subscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violations_map_by_index() {
        assert!(matches!(
            unique_violation_for(UNIQUE_EMAIL),
            Some(ServiceError::EmailAlreadyRegistered)
        ));
        assert!(matches!(
            unique_violation_for(UNIQUE_GOOGLE_ID),
            Some(ServiceError::GoogleAccountAlreadyLinked)
        ));
        assert!(unique_violation_for("subscriptions_pkey").is_none());
    }
}
