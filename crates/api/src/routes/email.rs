//! Email module routes: job submission and the cached job lookup.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use courier_cache::{CacheEntrySettings, cache_key};
use courier_common::contracts::SendEmailMessage;
use courier_common::error::AppError;
use courier_email::EmailJobRecord;
use courier_messaging::publish;

use crate::state::AppState;

/// Cache tag covering every cached job lookup, so the read model can be
/// invalidated wholesale.
pub const JOBS_CACHE_TAG: &str = "email-jobs";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/email/send", post(send_email))
        .route("/api/email/jobs/{job_id}", get(get_job))
        .route("/api/email/health", get(module_health))
}

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// POST /api/email/send — Accept an email job for asynchronous delivery.
///
/// Success means "accepted and queued", never "delivered". The audit insert
/// is best-effort: a write failure is logged and does not reject the job.
async fn send_email(
    State(state): State<AppState>,
    Json(request): Json<SendEmailRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate(&request)?;

    let message = SendEmailMessage {
        job_id: Uuid::new_v4(),
        to: request.to,
        subject: request.subject,
        body: request.body,
        created_at: Utc::now(),
    };

    publish(state.bus.as_ref(), &state.config.queues.send_queue, &message)
        .await
        .map_err(|err| {
            tracing::error!(job_id = %message.job_id, error = %err, "Publish failed");
            AppError::Broker(err.to_string())
        })?;

    if let Some(audit) = &state.audit {
        if let Err(err) = audit.record_request(&message).await {
            tracing::warn!(job_id = %message.job_id, error = %err, "Audit insert failed");
        }
    }

    tracing::info!(job_id = %message.job_id, "Email job accepted");
    Ok(Json(json!({ "job_id": message.job_id })))
}

/// GET /api/email/jobs/:job_id — Look up an accepted job, cache-aside over
/// the audit store.
async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<EmailJobRecord>, AppError> {
    let Some(audit) = state.audit.clone() else {
        return Err(AppError::NotFound(format!("Job {} not found", job_id)));
    };

    let key = cache_key(&["email", "jobs", &job_id.to_string()]);
    let record = state
        .cache
        .get_or_create(
            &key,
            || async move {
                audit
                    .find_request(job_id)
                    .await
                    .map_err(anyhow::Error::new)?
                    .ok_or_else(|| anyhow::Error::new(AppError::NotFound(format!(
                        "Job {} not found",
                        job_id
                    ))))
            },
            Some(CacheEntrySettings::tagged([JOBS_CACHE_TAG])),
        )
        .await
        .map_err(|err| match err.downcast::<AppError>() {
            Ok(app_err) => app_err,
            Err(other) => AppError::Internal(other.to_string()),
        })?;

    Ok(Json(record))
}

/// GET /api/email/health — Module liveness surface.
async fn module_health() -> &'static str {
    "Email module is healthy"
}

fn validate(request: &SendEmailRequest) -> Result<(), AppError> {
    if request.to.trim().is_empty() {
        return Err(AppError::Validation("Recipient is required".to_string()));
    }
    if !request.to.contains('@') {
        return Err(AppError::Validation(
            "Recipient must be a valid email address".to_string(),
        ));
    }
    if request.subject.trim().is_empty() {
        return Err(AppError::Validation("Subject is required".to_string()));
    }
    if request.body.trim().is_empty() {
        return Err(AppError::Validation("Body is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(to: &str) -> SendEmailRequest {
        SendEmailRequest {
            to: to.to_string(),
            subject: "S".to_string(),
            body: "B".to_string(),
        }
    }

    #[test]
    fn validation_rejects_missing_and_malformed_recipients() {
        assert!(validate(&request("")).is_err());
        assert!(validate(&request("not-an-address")).is_err());
        assert!(validate(&request("a@b.com")).is_ok());
    }

    #[test]
    fn validation_rejects_empty_subject_and_body() {
        let mut r = request("a@b.com");
        r.subject = "  ".to_string();
        assert!(validate(&r).is_err());

        let mut r = request("a@b.com");
        r.body = String::new();
        assert!(validate(&r).is_err());
    }
}
