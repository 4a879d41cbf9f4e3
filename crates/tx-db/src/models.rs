use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task (§3 lifecycle table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Ready,
    Planning,
    Active,
    Blocked,
    Review,
    HumanNeedsToReview,
    Done,
}

impl TaskStatus {
    /// All eight lifecycle states, in the order they appear in §3.
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Backlog,
        TaskStatus::Ready,
        TaskStatus::Planning,
        TaskStatus::Active,
        TaskStatus::Blocked,
        TaskStatus::Review,
        TaskStatus::HumanNeedsToReview,
        TaskStatus::Done,
    ];

    /// Statuses the Ready Computer considers workable (§4.3).
    pub fn is_workable(self) -> bool {
        matches!(self, TaskStatus::Backlog | TaskStatus::Ready | TaskStatus::Planning)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Backlog => "backlog",
            Self::Ready => "ready",
            Self::Planning => "planning",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Review => "review",
            Self::HumanNeedsToReview => "human_needs_to_review",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "ready" => Ok(Self::Ready),
            "planning" => Ok(Self::Planning),
            "active" => Ok(Self::Active),
            "blocked" => Ok(Self::Blocked),
            "review" => Ok(Self::Review),
            "human_needs_to_review" => Ok(Self::HumanNeedsToReview),
            "done" => Ok(Self::Done),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a worker (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Busy,
    Stopping,
    Dead,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Stopping => "stopping",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkerStatus {
    type Err = WorkerStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "stopping" => Ok(Self::Stopping),
            "dead" => Ok(Self::Dead),
            other => Err(WorkerStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`WorkerStatus`] string.
#[derive(Debug, Clone)]
pub struct WorkerStatusParseError(pub String);

impl fmt::Display for WorkerStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid worker status: {:?}", self.0)
    }
}

impl std::error::Error for WorkerStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a claim (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Released,
    Expired,
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Released => "released",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl FromStr for ClaimStatus {
    type Err = ClaimStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "released" => Ok(Self::Released),
            "expired" => Ok(Self::Expired),
            other => Err(ClaimStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ClaimStatus`] string.
#[derive(Debug, Clone)]
pub struct ClaimStatusParseError(pub String);

impl fmt::Display for ClaimStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid claim status: {:?}", self.0)
    }
}

impl std::error::Error for ClaimStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a run (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses require `ended_at` (§3 invariant).
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(RunStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RunStatus`] string.
#[derive(Debug, Clone)]
pub struct RunStatusParseError(pub String);

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run status: {:?}", self.0)
    }
}

impl std::error::Error for RunStatusParseError {}

// ---------------------------------------------------------------------------

/// Where a learning came from (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LearningSourceType {
    Manual,
    Run,
    Compaction,
    ClaudeMd,
}

impl fmt::Display for LearningSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::Run => "run",
            Self::Compaction => "compaction",
            Self::ClaudeMd => "claude_md",
        };
        f.write_str(s)
    }
}

impl FromStr for LearningSourceType {
    type Err = LearningSourceTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "run" => Ok(Self::Run),
            "compaction" => Ok(Self::Compaction),
            "claude_md" => Ok(Self::ClaudeMd),
            other => Err(LearningSourceTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`LearningSourceType`] string.
#[derive(Debug, Clone)]
pub struct LearningSourceTypeParseError(pub String);

impl fmt::Display for LearningSourceTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid learning source type: {:?}", self.0)
    }
}

impl std::error::Error for LearningSourceTypeParseError {}

// ---------------------------------------------------------------------------

/// Typed edge kinds (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    AnchoredTo,
    DerivedFrom,
    Imports,
    CoChangesWith,
    SimilarTo,
    LinksTo,
    UsedInRun,
    InvalidatedBy,
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AnchoredTo => "ANCHORED_TO",
            Self::DerivedFrom => "DERIVED_FROM",
            Self::Imports => "IMPORTS",
            Self::CoChangesWith => "CO_CHANGES_WITH",
            Self::SimilarTo => "SIMILAR_TO",
            Self::LinksTo => "LINKS_TO",
            Self::UsedInRun => "USED_IN_RUN",
            Self::InvalidatedBy => "INVALIDATED_BY",
        };
        f.write_str(s)
    }
}

impl FromStr for EdgeType {
    type Err = EdgeTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANCHORED_TO" => Ok(Self::AnchoredTo),
            "DERIVED_FROM" => Ok(Self::DerivedFrom),
            "IMPORTS" => Ok(Self::Imports),
            "CO_CHANGES_WITH" => Ok(Self::CoChangesWith),
            "SIMILAR_TO" => Ok(Self::SimilarTo),
            "LINKS_TO" => Ok(Self::LinksTo),
            "USED_IN_RUN" => Ok(Self::UsedInRun),
            "INVALIDATED_BY" => Ok(Self::InvalidatedBy),
            other => Err(EdgeTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`EdgeType`] string.
#[derive(Debug, Clone)]
pub struct EdgeTypeParseError(pub String);

impl fmt::Display for EdgeTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid edge type: {:?}", self.0)
    }
}

impl std::error::Error for EdgeTypeParseError {}

// ---------------------------------------------------------------------------

/// The kind of entity an edge endpoint refers to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Learning,
    File,
    Task,
    Run,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Learning => "learning",
            Self::File => "file",
            Self::Task => "task",
            Self::Run => "run",
        };
        f.write_str(s)
    }
}

impl FromStr for EntityType {
    type Err = EntityTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learning" => Ok(Self::Learning),
            "file" => Ok(Self::File),
            "task" => Ok(Self::Task),
            "run" => Ok(Self::Run),
            other => Err(EntityTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`EntityType`] string.
#[derive(Debug, Clone)]
pub struct EntityTypeParseError(pub String);

impl fmt::Display for EntityTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entity type: {:?}", self.0)
    }
}

impl std::error::Error for EntityTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A unit of work in the task graph (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub parent_id: Option<String>,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque structured map, stored as a JSON string.
    pub metadata: serde_json::Value,
}

/// A blocker edge in the task dependency DAG (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Dependency {
    pub blocker_id: String,
    pub blocked_id: String,
    pub created_at: DateTime<Utc>,
}

/// A registered worker process (§3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub hostname: String,
    pub pid: i64,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub current_task_id: Option<String>,
    /// Set of capability strings, stored as a JSON array.
    pub capabilities: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// A time-bounded exclusive lease on a task (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Claim {
    pub id: i64,
    pub task_id: String,
    pub worker_id: String,
    pub claimed_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub renewed_count: i64,
    pub status: ClaimStatus,
}

/// A single execution attempt of a task (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Run {
    pub id: String,
    pub task_id: Option<String>,
    pub agent: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub exit_code: Option<i64>,
    pub pid: Option<i64>,
    pub transcript_path: Option<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

/// A piece of retrievable knowledge (§3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Learning {
    pub id: String,
    pub content: String,
    pub source_type: LearningSourceType,
    pub source_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    /// List of keywords, stored as a JSON array.
    pub keywords: serde_json::Value,
    pub category: Option<String>,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub outcome_score: Option<f64>,
    /// Opaque vector, stored as a JSON array of floats.
    pub embedding: Option<serde_json::Value>,
}

/// A typed, directed edge between two entities (§3, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Edge {
    pub id: String,
    pub edge_type: EdgeType,
    pub source_type: EntityType,
    pub source_id: String,
    pub target_type: EntityType,
    pub target_id: String,
    pub weight: f64,
    pub metadata: serde_json::Value,
    pub valid: bool,
    pub created_at: DateTime<Utc>,
}

/// Singleton orchestrator state row (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrchestratorState {
    pub running: bool,
    pub worker_pool_size: i64,
    pub heartbeat_interval_seconds: i64,
    pub started_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
