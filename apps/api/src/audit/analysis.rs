//! Audit analysis: sends the session context to the model, normalizes what comes
//! back into findings and questions, and persists the result.
//!
//! Default backend: `LlmAuditAnalyzer`. `AppState` holds an `Arc<dyn AuditAnalyzer>`
//! so the backend can be swapped without touching handlers.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::{types::Json, PgPool};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::context::{build_audit_context, sanitize_field, FileBundle, SessionProfile};
use crate::audit::files::list_files;
use crate::audit::prompts::{AUDIT_SYSTEM_TEMPLATE, AUDIT_USER_TEMPLATE};
use crate::audit::sessions::fetch_session;
use crate::errors::AppError;
use crate::llm_client::prompts::JSON_ONLY_INSTRUCTION;
use crate::llm_client::{extract_json, LlmClient};
use crate::models::audit::{ComplianceStatus, FindingStatus, Severity};

pub const ANALYSIS_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_CONFIDENCE: f64 = 0.7;
pub const DEFAULT_QUESTION_PRIORITY: i32 = 1;
pub const FALLBACK_RISK_SCORE: f64 = 50.0;

// ────────────────────────────────────────────────────────────────────────────
// Normalized report
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewFinding {
    pub finding_type: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: String,
    pub evidence: Value,
    pub financial_impact: Option<f64>,
    pub recommendation: String,
    pub ai_confidence: f64,
    pub status: FindingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewQuestion {
    pub question: String,
    pub context: String,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub summary: String,
    pub risk_score: Option<f64>,
    pub compliance_status: ComplianceStatus,
    pub findings: Vec<NewFinding>,
    pub questions: Vec<NewQuestion>,
    pub recommendations: Vec<String>,
}

/// Response body of `POST /sessions/:id/analyze`.
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub summary: String,
    pub findings_count: usize,
    pub questions_count: usize,
}

/// Report used when the model reply cannot be read as a JSON object.
pub fn fallback_report() -> AuditReport {
    AuditReport {
        summary: "AI analysis completed but response format was unexpected. Please review manually."
            .to_string(),
        risk_score: Some(FALLBACK_RISK_SCORE),
        compliance_status: ComplianceStatus::Partial,
        findings: Vec::new(),
        questions: vec![NewQuestion {
            question: "Could you provide more context about your financial records?".to_string(),
            context: "AI was unable to fully parse the provided data".to_string(),
            priority: DEFAULT_QUESTION_PRIORITY,
        }],
        recommendations: vec![
            "Consider organizing data in standard formats for better analysis".to_string(),
        ],
    }
}

/// Extracts the JSON object from a model reply, fenced or bare.
pub fn parse_model_output(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(extract_json(text).trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Model reply to a report, falling back to [`fallback_report`] when unreadable.
pub fn report_from_reply(text: &str) -> AuditReport {
    match parse_model_output(text) {
        Some(raw) => normalize_report(&raw),
        None => {
            warn!(reply_chars = text.chars().count(), "Unparseable audit reply, using fallback report");
            fallback_report()
        }
    }
}

/// Coerces a loosely-shaped model report into storable rows. Every string is
/// sanitized; missing or mistyped fields take their defaults.
pub fn normalize_report(raw: &Map<String, Value>) -> AuditReport {
    let findings = object_items(raw, "findings")
        .iter()
        .map(|f| NewFinding {
            finding_type: text_or(f, "finding_type", "general"),
            title: text_or(f, "title", "Untitled Finding"),
            description: text_or(f, "description", ""),
            severity: f
                .get("severity")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(Severity::Info),
            category: text_or(f, "category", "general"),
            evidence: match f.get("evidence") {
                Some(v) if is_truthy(v) => v.clone(),
                _ => json!({}),
            },
            financial_impact: f.get("financial_impact").and_then(Value::as_f64),
            recommendation: text_or(f, "recommendation", ""),
            ai_confidence: f
                .get("ai_confidence")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_CONFIDENCE),
            status: FindingStatus::Open,
        })
        .collect();

    let questions = object_items(raw, "questions")
        .iter()
        .map(|q| NewQuestion {
            question: text_or(q, "question", ""),
            context: text_or(q, "context", ""),
            priority: q
                .get("priority")
                .and_then(Value::as_f64)
                .map(|p| p.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32)
                .unwrap_or(DEFAULT_QUESTION_PRIORITY),
        })
        .collect();

    let recommendations = raw
        .get("recommendations")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|v| match v {
                    Value::String(s) => sanitize_field(s),
                    other => sanitize_field(&other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    AuditReport {
        summary: text_or(raw, "summary", ""),
        risk_score: raw.get("risk_score").and_then(Value::as_f64),
        compliance_status: raw
            .get("compliance_status")
            .and_then(Value::as_str)
            .and_then(|s| sanitize_field(s).parse().ok())
            .unwrap_or(ComplianceStatus::Partial),
        findings,
        questions,
        recommendations,
    }
}

/// Elements of an array field; non-object elements read as empty objects.
fn object_items(raw: &Map<String, Value>, key: &str) -> Vec<Map<String, Value>> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|v| v.as_object().cloned().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

/// Sanitized string field, or `default` when absent, empty or not a string.
fn text_or(obj: &Map<String, Value>, key: &str, default: &str) -> String {
    match obj.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => sanitize_field(s),
        _ => default.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Produces an audit report for a session's files. Carried in `AppState` as
/// `Arc<dyn AuditAnalyzer>`.
#[async_trait]
pub trait AuditAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        profile: &SessionProfile,
        files: &[FileBundle],
    ) -> Result<AuditReport, AppError>;
}

/// Gateway-backed analyzer.
pub struct LlmAuditAnalyzer(pub LlmClient);

#[async_trait]
impl AuditAnalyzer for LlmAuditAnalyzer {
    async fn analyze(
        &self,
        profile: &SessionProfile,
        files: &[FileBundle],
    ) -> Result<AuditReport, AppError> {
        let (system, user) = build_prompts(profile, files);
        let reply = self.0.call_text(&user, &system, ANALYSIS_TEMPERATURE).await?;
        Ok(report_from_reply(&reply))
    }
}

/// System and user prompts for one analysis run.
pub fn build_prompts(profile: &SessionProfile, files: &[FileBundle]) -> (String, String) {
    let standard = profile.standard_label();
    let audit_type = profile
        .audit_type
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Financial");
    let industry = profile
        .industry
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("General");

    let system = AUDIT_SYSTEM_TEMPLATE
        .replace("{standard}", &standard)
        .replace("{audit_type}", audit_type)
        .replace("{industry}", industry)
        .replace("{currency}", profile.currency_label());

    let context = build_audit_context(profile, files);
    let user = format!(
        "{}\n\n{}",
        AUDIT_USER_TEMPLATE
            .replace("{standard}", &standard)
            .replace("{context}", &context),
        JSON_ONLY_INSTRUCTION
    );

    (system, user)
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestration & persistence
// ────────────────────────────────────────────────────────────────────────────

/// Loads the session and its files, runs the analyzer, and stores the report.
pub async fn analyze_session(
    db: &PgPool,
    analyzer: &dyn AuditAnalyzer,
    session_id: Uuid,
) -> Result<AnalysisResponse, AppError> {
    let session = fetch_session(db, session_id).await?;
    let files = list_files(db, session_id).await?;
    if files.is_empty() {
        return Err(AppError::Validation(
            "Upload at least one file before running analysis".to_string(),
        ));
    }

    let profile = SessionProfile::from(&session);
    let bundles: Vec<FileBundle> = files.iter().map(FileBundle::from).collect();

    info!(session_id = %session_id, files = bundles.len(), "Running audit analysis");
    let report = analyzer.analyze(&profile, &bundles).await?;

    persist_report(db, session_id, &report).await;

    info!(
        session_id = %session_id,
        findings = report.findings.len(),
        questions = report.questions.len(),
        "Audit analysis complete"
    );
    Ok(AnalysisResponse {
        success: true,
        summary: report.summary,
        findings_count: report.findings.len(),
        questions_count: report.questions.len(),
    })
}

/// Writes findings, questions and the session summary. Each step is independent;
/// failures are logged and do not abort the others.
pub async fn persist_report(db: &PgPool, session_id: Uuid, report: &AuditReport) {
    if !report.findings.is_empty() {
        if let Err(e) = insert_findings(db, session_id, &report.findings).await {
            error!(session_id = %session_id, "Error saving findings: {e}");
        }
    }
    if !report.questions.is_empty() {
        if let Err(e) = insert_questions(db, session_id, &report.questions).await {
            error!(session_id = %session_id, "Error saving questions: {e}");
        }
    }
    if let Err(e) = update_session_summary(db, session_id, report).await {
        error!(session_id = %session_id, "Error updating session: {e}");
    }
}

async fn insert_findings(
    db: &PgPool,
    session_id: Uuid,
    findings: &[NewFinding],
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;
    for f in findings {
        sqlx::query(
            r#"
            INSERT INTO audit_findings
                (session_id, finding_type, title, description, severity, category,
                 evidence, financial_impact, recommendation, ai_confidence, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session_id)
        .bind(&f.finding_type)
        .bind(&f.title)
        .bind(&f.description)
        .bind(f.severity.as_str())
        .bind(&f.category)
        .bind(&f.evidence)
        .bind(f.financial_impact)
        .bind(&f.recommendation)
        .bind(f.ai_confidence)
        .bind(f.status.as_str())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

async fn insert_questions(
    db: &PgPool,
    session_id: Uuid,
    questions: &[NewQuestion],
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;
    for q in questions {
        sqlx::query(
            r#"
            INSERT INTO audit_questions (session_id, question, context, priority, is_answered)
            VALUES ($1, $2, $3, $4, false)
            "#,
        )
        .bind(session_id)
        .bind(&q.question)
        .bind(&q.context)
        .bind(q.priority)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}

async fn update_session_summary(
    db: &PgPool,
    session_id: Uuid,
    report: &AuditReport,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE audit_sessions
        SET ai_summary = $1, risk_score = $2, compliance_status = $3,
            recommendations = $4, updated_at = now()
        WHERE id = $5
        "#,
    )
    .bind(&report.summary)
    .bind(report.risk_score)
    .bind(report.compliance_status.as_str())
    .bind(Json(&report.recommendations))
    .bind(session_id)
    .execute(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(value: Value) -> AuditReport {
        normalize_report(value.as_object().unwrap())
    }

    #[test]
    fn test_fallback_report_shape() {
        let fallback = fallback_report();
        assert_eq!(fallback.risk_score, Some(50.0));
        assert_eq!(fallback.compliance_status, ComplianceStatus::Partial);
        assert!(fallback.findings.is_empty());
        assert_eq!(fallback.questions.len(), 1);
        assert_eq!(fallback.questions[0].priority, 1);
        assert_eq!(fallback.recommendations.len(), 1);
    }

    #[test]
    fn test_unparseable_reply_uses_fallback() {
        assert_eq!(report_from_reply("I could not analyze this."), fallback_report());
        assert_eq!(report_from_reply("```json\n[1, 2]\n```"), fallback_report());
    }

    #[test]
    fn test_fenced_reply_is_parsed() {
        let reply = "Here you go:\n```json\n{\"summary\": \"Books balance.\", \"risk_score\": 12}\n```";
        let report = report_from_reply(reply);
        assert_eq!(report.summary, "Books balance.");
        assert_eq!(report.risk_score, Some(12.0));
        assert!(report.findings.is_empty());
    }

    #[test]
    fn test_finding_defaults() {
        let report = normalized(json!({"findings": [{}, "not an object"]}));
        assert_eq!(report.findings.len(), 2);
        let f = &report.findings[0];
        assert_eq!(f.finding_type, "general");
        assert_eq!(f.title, "Untitled Finding");
        assert_eq!(f.description, "");
        assert_eq!(f.severity, Severity::Info);
        assert_eq!(f.category, "general");
        assert_eq!(f.evidence, json!({}));
        assert_eq!(f.financial_impact, None);
        assert_eq!(f.ai_confidence, 0.7);
        assert_eq!(f.status, FindingStatus::Open);
    }

    #[test]
    fn test_finding_fields_are_sanitized_and_typed() {
        let report = normalized(json!({
            "findings": [{
                "finding_type": "duplicate_transaction",
                "title": "Duplicate <b>invoice</b>",
                "description": "Same amount posted\ntwice",
                "severity": "HIGH",
                "evidence": {"file_name": "gl.csv", "row_references": [4, 9]},
                "financial_impact": "12,000",
                "ai_confidence": 0.92
            }, {
                "severity": "medium",
                "financial_impact": 1500.5
            }]
        }));
        let first = &report.findings[0];
        assert_eq!(first.title, "Duplicate binvoice/b");
        assert_eq!(first.description, "Same amount postedtwice");
        // Severity must match exactly.
        assert_eq!(first.severity, Severity::Info);
        assert_eq!(first.evidence["row_references"], json!([4, 9]));
        assert_eq!(first.financial_impact, None);
        assert_eq!(first.ai_confidence, 0.92);

        let second = &report.findings[1];
        assert_eq!(second.severity, Severity::Medium);
        assert_eq!(second.financial_impact, Some(1500.5));
    }

    #[test]
    fn test_question_defaults() {
        let report = normalized(json!({
            "questions": [
                {"question": "Where is the March bank statement?", "priority": 3},
                {"question": "Explain suspense balance", "priority": "high"}
            ]
        }));
        assert_eq!(report.questions[0].priority, 3);
        assert_eq!(report.questions[1].priority, 1);
        assert_eq!(report.questions[1].context, "");
    }

    #[test]
    fn test_session_level_fields() {
        let report = normalized(json!({
            "summary": "Minor issues.\n\n\n\nSee findings.",
            "risk_score": "high",
            "compliance_status": "non_compliant",
            "recommendations": ["Reconcile monthly", "", 3]
        }));
        assert_eq!(report.summary, "Minor issues.See findings.");
        assert_eq!(report.risk_score, None);
        assert_eq!(report.compliance_status, ComplianceStatus::NonCompliant);
        assert_eq!(report.recommendations, vec!["Reconcile monthly", "3"]);

        let report = normalized(json!({"compliance_status": "mostly fine"}));
        assert_eq!(report.compliance_status, ComplianceStatus::Partial);
    }

    #[test]
    fn test_prompts_carry_session_profile() {
        let profile = SessionProfile {
            accounting_standard: Some("gaap".into()),
            industry: Some("Retail".into()),
            currency: Some("USD".into()),
            ..Default::default()
        };
        let (system, user) = build_prompts(&profile, &[]);
        assert!(system.contains("Accounting Standard: GAAP\nAudit Type: Financial\nIndustry: Retail\nCurrency: USD"));
        assert!(system.contains("Estimated impact in USD or null"));
        assert!(user.starts_with("[AUDIT DATA START]\nAUDIT CONFIGURATION:"));
        assert!(user.contains("5. Compliance with GAAP standards"));
        assert!(!user.contains("{context}"));
    }

    struct FixedAnalyzer;

    #[async_trait]
    impl AuditAnalyzer for FixedAnalyzer {
        async fn analyze(
            &self,
            _profile: &SessionProfile,
            files: &[FileBundle],
        ) -> Result<AuditReport, AppError> {
            let mut report = fallback_report();
            report.summary = format!("{} files reviewed", files.len());
            Ok(report)
        }
    }

    #[tokio::test]
    async fn test_analyzer_is_object_safe() {
        let analyzer: std::sync::Arc<dyn AuditAnalyzer> = std::sync::Arc::new(FixedAnalyzer);
        let report = analyzer
            .analyze(&SessionProfile::default(), &[FileBundle::default()])
            .await
            .unwrap();
        assert_eq!(report.summary, "1 files reviewed");
    }
}
