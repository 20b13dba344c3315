use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::audit::context::DEFAULT_CURRENCY;
use crate::errors::AppError;
use crate::models::audit::{
    AccountingStandard, AuditFileRow, AuditFindingRow, AuditQuestionRow, AuditSessionRow,
    AuditType, SessionStatus,
};

/// Status a freshly created session starts in; setup happens client-side.
pub const INITIAL_STATUS: SessionStatus = SessionStatus::Upload;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub company_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub audit_type: String,
    pub accounting_standard: String,
    pub industry: Option<String>,
    pub financial_year: Option<String>,
    pub currency: Option<String>,
}

/// A create request after enum and blank-field checks.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub company_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub audit_type: AuditType,
    pub accounting_standard: AccountingStandard,
    pub industry: Option<String>,
    pub financial_year: Option<String>,
    pub currency: String,
}

impl CreateSessionRequest {
    pub fn validate(self) -> Result<NewSession, AppError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        let audit_type = self
            .audit_type
            .parse::<AuditType>()
            .map_err(AppError::Validation)?;
        let accounting_standard = self
            .accounting_standard
            .parse::<AccountingStandard>()
            .map_err(AppError::Validation)?;

        Ok(NewSession {
            company_id: self.company_id,
            created_by: self.created_by,
            title,
            audit_type,
            accounting_standard,
            industry: blank_to_none(self.industry),
            financial_year: blank_to_none(self.financial_year),
            currency: blank_to_none(self.currency).unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        })
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A session with everything attached to it.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session: AuditSessionRow,
    pub files: Vec<AuditFileRow>,
    pub findings: Vec<AuditFindingRow>,
    pub questions: Vec<AuditQuestionRow>,
}

pub async fn create_session(db: &PgPool, new: &NewSession) -> Result<AuditSessionRow, AppError> {
    let row: AuditSessionRow = sqlx::query_as(
        r#"
        INSERT INTO audit_sessions
            (company_id, created_by, title, audit_type, accounting_standard,
             industry, financial_year, currency, status, current_step)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(new.company_id)
    .bind(new.created_by)
    .bind(&new.title)
    .bind(new.audit_type.as_str())
    .bind(new.accounting_standard.as_str())
    .bind(&new.industry)
    .bind(&new.financial_year)
    .bind(&new.currency)
    .bind(INITIAL_STATUS.as_str())
    .bind(INITIAL_STATUS.step())
    .fetch_one(db)
    .await?;

    info!(session_id = %row.id, company_id = %row.company_id, "Audit session created");
    Ok(row)
}

pub async fn list_sessions(db: &PgPool, company_id: Uuid) -> Result<Vec<AuditSessionRow>, AppError> {
    let rows = sqlx::query_as(
        "SELECT * FROM audit_sessions WHERE company_id = $1 ORDER BY created_at DESC",
    )
    .bind(company_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn fetch_session(db: &PgPool, session_id: Uuid) -> Result<AuditSessionRow, AppError> {
    let row: Option<AuditSessionRow> = sqlx::query_as("SELECT * FROM audit_sessions WHERE id = $1")
        .bind(session_id)
        .fetch_optional(db)
        .await?;
    row.ok_or_else(|| AppError::NotFound(format!("Audit session {session_id} not found")))
}

pub async fn session_detail(db: &PgPool, session_id: Uuid) -> Result<SessionDetail, AppError> {
    let session = fetch_session(db, session_id).await?;
    let files = crate::audit::files::list_files(db, session_id).await?;

    // Severity order high > medium > low > info.
    let findings = sqlx::query_as(
        r#"
        SELECT * FROM audit_findings
        WHERE session_id = $1
        ORDER BY CASE severity
            WHEN 'high' THEN 1 WHEN 'medium' THEN 2 WHEN 'low' THEN 3 ELSE 4 END,
            created_at
        "#,
    )
    .bind(session_id)
    .fetch_all(db)
    .await?;

    let questions = sqlx::query_as(
        "SELECT * FROM audit_questions WHERE session_id = $1 ORDER BY priority ASC, created_at",
    )
    .bind(session_id)
    .fetch_all(db)
    .await?;

    Ok(SessionDetail {
        session,
        files,
        findings,
        questions,
    })
}

/// Moves the session to `status`, keeping `current_step` in lockstep.
pub async fn update_status(
    db: &PgPool,
    session_id: Uuid,
    status: SessionStatus,
) -> Result<AuditSessionRow, AppError> {
    let row: Option<AuditSessionRow> = sqlx::query_as(
        r#"
        UPDATE audit_sessions
        SET status = $1, current_step = $2, updated_at = now()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(status.as_str())
    .bind(status.step())
    .bind(session_id)
    .fetch_optional(db)
    .await?;

    let row = row.ok_or_else(|| AppError::NotFound(format!("Audit session {session_id} not found")))?;
    info!(session_id = %session_id, status = %status, "Audit session status updated");
    Ok(row)
}

/// Removes a session; files, findings and questions go with it via cascade.
pub async fn delete_session(db: &PgPool, session_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM audit_sessions WHERE id = $1")
        .bind(session_id)
        .execute(db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Audit session {session_id} not found")));
    }
    info!(session_id = %session_id, "Audit session deleted");
    Ok(())
}
