use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditSessionRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub audit_type: String,
    pub accounting_standard: String,
    pub industry: Option<String>,
    pub financial_year: Option<String>,
    pub currency: Option<String>,
    pub status: String,
    pub current_step: Option<i32>,
    pub ai_summary: Option<String>,
    pub risk_score: Option<f64>,
    pub compliance_status: Option<String>,
    pub recommendations: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditFileRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub file_category: String,
    pub file_size: Option<i64>,
    pub headers: Option<Vec<String>>,
    pub row_count: Option<i32>,
    pub raw_data: Option<Value>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditFindingRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub finding_type: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub category: Option<String>,
    pub evidence: Option<Value>,
    pub financial_impact: Option<f64>,
    pub recommendation: Option<String>,
    pub ai_confidence: Option<f64>,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditQuestionRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub question: String,
    pub context: Option<String>,
    pub priority: Option<i32>,
    pub is_answered: Option<bool>,
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Declares a closed string enum stored as TEXT: serde names, `as_str`,
/// `Display` and a `FromStr` that rejects anything outside the set.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "invalid {} '{}': expected one of {}",
                        stringify!($name),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }
    };
}

text_enum!(AuditType {
    Financial => "financial",
    Internal => "internal",
    Compliance => "compliance",
    Tax => "tax",
    Custom => "custom",
});

text_enum!(AccountingStandard {
    Ifrs => "ifrs",
    Gaap => "gaap",
    Local => "local",
    Custom => "custom",
});

text_enum!(
    /// Workflow position of an audit session.
    SessionStatus {
        Setup => "setup",
        Upload => "upload",
        Analyzing => "analyzing",
        Review => "review",
        Complete => "complete",
    }
);

text_enum!(FileStatus {
    Pending => "pending",
    Processing => "processing",
    Processed => "processed",
    Error => "error",
});

text_enum!(Severity {
    High => "high",
    Medium => "medium",
    Low => "low",
    Info => "info",
});

text_enum!(FindingStatus {
    Open => "open",
    Acknowledged => "acknowledged",
    Resolved => "resolved",
});

text_enum!(ComplianceStatus {
    Compliant => "compliant",
    Partial => "partial",
    NonCompliant => "non_compliant",
});

impl SessionStatus {
    /// One-based wizard step shown alongside the status.
    pub fn step(&self) -> i32 {
        match self {
            SessionStatus::Setup => 1,
            SessionStatus::Upload => 2,
            SessionStatus::Analyzing => 3,
            SessionStatus::Review => 4,
            SessionStatus::Complete => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enum_round_trips_through_str() {
        for status in [SessionStatus::Setup, SessionStatus::Review, SessionStatus::Complete] {
            assert_eq!(status.as_str().parse::<SessionStatus>(), Ok(status));
        }
        assert_eq!("non_compliant".parse(), Ok(ComplianceStatus::NonCompliant));
    }

    #[test]
    fn test_unknown_value_is_rejected() {
        let err = "IFRS".parse::<AccountingStandard>().unwrap_err();
        assert!(err.contains("ifrs, gaap, local, custom"));
        assert!("audit".parse::<AuditType>().is_err());
    }

    #[test]
    fn test_session_steps() {
        let steps: Vec<i32> = ["setup", "upload", "analyzing", "review", "complete"]
            .iter()
            .map(|s| s.parse::<SessionStatus>().unwrap().step())
            .collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        let parsed: AuditType = serde_json::from_str("\"tax\"").unwrap();
        assert_eq!(parsed, AuditType::Tax);
    }
}
