//! Domain models for quarry.
//!
//! Statuses, scopes, and access levels are closed enumerations; they convert
//! to and from their storage strings only at the database boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// State of an indexing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl JobStatus {
    /// True for states that end the job. Terminal rows are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }

    /// Storage string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(JobStatus::Started),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "timeout" => Ok(JobStatus::Timeout),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(Error::InvalidInput(format!("Invalid job status: {}", s))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an identity or grant is user- or team-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    User,
    Team,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::Team => "team",
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Scope::User),
            "team" => Ok(Scope::Team),
            _ => Err(Error::InvalidInput(format!("Invalid scope: {}", s))),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grant level on an index. Higher levels imply the lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
        }
    }

    /// Numeric rank used when comparing grants (admin > write > read).
    pub fn rank(&self) -> u8 {
        match self {
            AccessLevel::Read => 1,
            AccessLevel::Write => 2,
            AccessLevel::Admin => 3,
        }
    }

    /// True when this level satisfies `required`.
    pub fn satisfies(&self, required: AccessLevel) -> bool {
        self.rank() >= required.rank()
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "admin" => Ok(AccessLevel::Admin),
            _ => Err(Error::InvalidInput(format!("Invalid access level: {}", s))),
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of source a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Html,
    Pdf,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Html => "html",
            SourceType::Pdf => "pdf",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved caller identity: one user or one team.
///
/// The core never manufactures identities; they arrive through session
/// linking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User or team identifier, depending on `scope`.
    pub id: String,
    pub scope: Scope,
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: Scope::User,
        }
    }

    pub fn team(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: Scope::Team,
        }
    }
}

/// Monotonic progress counters for an indexing job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub pages_discovered: i64,
    pub pages_processed: i64,
    pub pages_indexed: i64,
    pub total_chunks: i64,
}

/// A durable indexing job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJob {
    /// Workflow-supplied id, unique.
    pub job_id: String,
    pub index_name: String,
    pub source_url: String,
    pub status: JobStatus,
    pub initiated_by_user: Option<String>,
    pub initiated_by_team: Option<String>,
    pub scope: Scope,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub counters: JobCounters,
    pub error_message: Option<String>,
    pub error_details: Option<JsonValue>,
    pub metadata: JsonValue,
}

/// A session link row associating an opaque session id with an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLink {
    pub session_id: String,
    pub user_id: Option<String>,
    pub team_id: Option<String>,
    pub scope: Scope,
    pub linked_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionLink {
    /// The identity this link resolves to.
    pub fn identity(&self) -> Result<Identity> {
        let id = match self.scope {
            Scope::User => self.user_id.clone(),
            Scope::Team => self.team_id.clone(),
        };
        id.map(|id| Identity {
            id,
            scope: self.scope,
        })
        .ok_or_else(|| {
            Error::Internal(format!(
                "session link {} has no identifier for scope {}",
                self.session_id, self.scope
            ))
        })
    }
}

/// An access grant row binding an identity to an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub user_id: Option<String>,
    pub team_id: Option<String>,
    pub scope: Scope,
    pub index_name: String,
    pub access_level: AccessLevel,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    /// True when the grant is currently in force.
    pub fn in_force(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e > now).unwrap_or(true)
    }
}

/// One hit returned by a semantic query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// `1 − cosine distance`, higher is closer.
    pub score: f32,
}

/// Metadata stored alongside each chunk row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// The source URL the ingest was started from.
    pub source: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub title: String,
    /// Chunk content length in characters.
    pub size: usize,
    #[serde(rename = "pageCount", skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_job_status_round_trip() {
        let statuses = [
            JobStatus::Started,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Timeout,
            JobStatus::Cancelled,
        ];
        for status in statuses {
            assert_eq!(JobStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Started.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_status_unknown_rejected() {
        assert!(JobStatus::from_str("exploded").is_err());
        assert!(JobStatus::from_str("").is_err());
        assert!(JobStatus::from_str("COMPLETED").is_err());
    }

    #[test]
    fn test_scope_round_trip() {
        assert_eq!(Scope::from_str("user").unwrap(), Scope::User);
        assert_eq!(Scope::from_str("team").unwrap(), Scope::Team);
        assert!(Scope::from_str("org").is_err());
    }

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::Admin.satisfies(AccessLevel::Read));
        assert!(AccessLevel::Admin.satisfies(AccessLevel::Write));
        assert!(AccessLevel::Write.satisfies(AccessLevel::Read));
        assert!(!AccessLevel::Read.satisfies(AccessLevel::Write));
        assert!(!AccessLevel::Write.satisfies(AccessLevel::Admin));
        assert!(AccessLevel::Read.satisfies(AccessLevel::Read));
    }

    #[test]
    fn test_access_level_serde() {
        let json = serde_json::to_string(&AccessLevel::Admin).unwrap();
        assert_eq!(json, "\"admin\"");
        let back: AccessLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AccessLevel::Admin);
    }

    #[test]
    fn test_session_link_identity_selects_scope_field() {
        let now = Utc::now();
        let link = SessionLink {
            session_id: "s1".to_string(),
            user_id: Some("u1".to_string()),
            team_id: Some("t1".to_string()),
            scope: Scope::Team,
            linked_at: now,
            updated_at: now,
        };
        let identity = link.identity().unwrap();
        assert_eq!(identity.id, "t1");
        assert_eq!(identity.scope, Scope::Team);
    }

    #[test]
    fn test_grant_expiry() {
        let now = Utc::now();
        let mut grant = AccessGrant {
            user_id: Some("u1".to_string()),
            team_id: None,
            scope: Scope::User,
            index_name: "docs-foo".to_string(),
            access_level: AccessLevel::Read,
            granted_by: "admin".to_string(),
            granted_at: now,
            expires_at: None,
        };
        assert!(grant.in_force(now));

        grant.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!grant.in_force(now));

        grant.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(grant.in_force(now));
    }

    #[test]
    fn test_chunk_metadata_serialization() {
        let meta = ChunkMetadata {
            source: "https://example.com/docs".to_string(),
            source_type: SourceType::Pdf,
            title: "Guide".to_string(),
            size: 1200,
            page_count: Some(14),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "pdf");
        assert_eq!(json["pageCount"], 14);

        let html = ChunkMetadata {
            source_type: SourceType::Html,
            page_count: None,
            ..meta
        };
        let json = serde_json::to_value(&html).unwrap();
        assert_eq!(json["type"], "html");
        assert!(json.get("pageCount").is_none());
    }
}
