use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::reports::{
        CreateReportRequest, ListReportsQuery, ReportListResponse, StatusChangeResponse,
        UpdateReportRequest, UpdateReportStatusRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
    },
    middleware::AuthUser,
    models::{DisasterReport, ReportFilter, ReportStatus},
    services::{alerts, ServiceError},
    utils::{ValidatedJson, ValidatedQuery},
    AppState,
};

/// List reports, newest first
#[utoipa::path(
    get,
    path = "/reports",
    params(ListReportsQuery),
    responses(
        (status = 200, description = "Page of reports", body = ReportListResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn list_reports(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedQuery(query): ValidatedQuery<ListReportsQuery>,
) -> Result<Json<ReportListResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let filter = ReportFilter {
        status: query.status,
        severity: query.severity,
        disaster_type: query
            .disaster_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        user_id: query.mine.then_some(claims.user_id),
        limit,
        offset,
    };

    let reports = state.db.list_reports(&filter).await?;
    Ok(Json(ReportListResponse {
        reports,
        limit,
        offset,
    }))
}

/// Submit a new report
#[utoipa::path(
    post,
    path = "/reports",
    request_body = CreateReportRequest,
    responses(
        (status = 201, description = "Report created", body = DisasterReport),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn create_report(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateReportRequest>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .db
        .create_report(&req.into_new_report(claims.user_id))
        .await?;

    metrics::counter!("reports_created_total", "severity" => report.severity.as_str())
        .increment(1);
    tracing::info!(
        report_id = report.report_id,
        user_id = claims.user_id,
        severity = %report.severity,
        "Report submitted"
    );

    Ok((StatusCode::CREATED, Json(report)))
}

/// Fetch one report
#[utoipa::path(
    get,
    path = "/reports/{id}",
    params(("id" = i64, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report", body = DisasterReport),
        (status = 404, description = "Report not found", body = ErrorResponse)
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn get_report(
    State(state): State<AppState>,
    Path(report_id): Path<i64>,
) -> Result<Json<DisasterReport>, AppError> {
    let report = state
        .db
        .find_report(report_id)
        .await?
        .ok_or(ServiceError::ReportNotFound)?;
    Ok(Json(report))
}

/// Edit a report. Owners may edit while it is pending; admins always.
#[utoipa::path(
    patch,
    path = "/reports/{id}",
    params(("id" = i64, Path, description = "Report id")),
    request_body = UpdateReportRequest,
    responses(
        (status = 200, description = "Updated report", body = DisasterReport),
        (status = 400, description = "Nothing to update", body = ErrorResponse),
        (status = 403, description = "Not allowed to edit this report", body = ErrorResponse),
        (status = 404, description = "Report not found", body = ErrorResponse)
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn update_report(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(report_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateReportRequest>,
) -> Result<Json<DisasterReport>, AppError> {
    if req.is_empty() {
        return Err(ServiceError::ValidationError("No fields to update".to_string()).into());
    }

    let report = state
        .db
        .find_report(report_id)
        .await?
        .ok_or(ServiceError::ReportNotFound)?;

    if !claims.is_admin() && !report.editable_by_owner(claims.user_id) {
        return Err(ServiceError::Forbidden(
            "Only the reporter can edit a report, and only while it is pending".to_string(),
        )
        .into());
    }

    let updated = state.db.update_report(report_id, &req.into_changes()).await?;
    tracing::info!(report_id, user_id = claims.user_id, "Report updated");
    Ok(Json(updated))
}

/// Delete a report (owner or admin)
#[utoipa::path(
    delete,
    path = "/reports/{id}",
    params(("id" = i64, Path, description = "Report id")),
    responses(
        (status = 204, description = "Report deleted"),
        (status = 403, description = "Not allowed to delete this report", body = ErrorResponse),
        (status = 404, description = "Report not found", body = ErrorResponse)
    ),
    tag = "Reports",
    security(("bearer_auth" = []))
)]
pub async fn delete_report(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(report_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let report = state
        .db
        .find_report(report_id)
        .await?
        .ok_or(ServiceError::ReportNotFound)?;

    if !claims.is_admin() && report.user_id != claims.user_id {
        return Err(ServiceError::Forbidden(
            "Only the reporter or an admin can delete a report".to_string(),
        )
        .into());
    }

    if !state.db.delete_report(report_id).await? {
        return Err(ServiceError::ReportNotFound.into());
    }

    tracing::info!(report_id, user_id = claims.user_id, "Report deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Move a report through the review workflow
#[utoipa::path(
    patch,
    path = "/admin/reports/{id}/status",
    params(("id" = i64, Path, description = "Report id")),
    request_body = UpdateReportStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = StatusChangeResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 404, description = "Report not found", body = ErrorResponse),
        (status = 409, description = "Transition not allowed", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn update_report_status(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(report_id): Path<i64>,
    Json(req): Json<UpdateReportStatusRequest>,
) -> Result<Json<StatusChangeResponse>, AppError> {
    let current = state
        .db
        .find_report(report_id)
        .await?
        .ok_or(ServiceError::ReportNotFound)?;

    let invalid = |from: ReportStatus| ServiceError::InvalidTransition {
        from: from.to_string(),
        to: req.status.to_string(),
    };

    if !current.status.can_transition_to(req.status) {
        return Err(invalid(current.status).into());
    }

    let verified_by = (req.status == ReportStatus::Verified).then_some(claims.user_id);
    let report = state
        .db
        .transition_report(report_id, current.status, req.status, verified_by)
        .await?
        .ok_or_else(|| {
            // Someone else moved it between the read and the update.
            tracing::warn!(report_id, "Concurrent status change detected");
            invalid(current.status)
        })?;

    metrics::counter!("report_transitions_total", "to" => report.status.as_str()).increment(1);
    tracing::info!(
        report_id,
        admin_id = claims.user_id,
        from = %current.status,
        to = %report.status,
        "Report status changed"
    );

    let notifications_queued = if report.status == ReportStatus::Verified {
        alerts::dispatch(&state.db, state.notifier.clone(), report.clone()).await
    } else {
        0
    };

    Ok(Json(StatusChangeResponse {
        report,
        notifications_queued,
    }))
}
