//! Core types for federation-import

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::report::RunReport;

/// Unique identifier for an import run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl RunId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for RunId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RunId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RunId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Import phase
///
/// Later phases assume the entities created by earlier ones exist, so the order in
/// [`Phase::PIPELINE`] is significant. The three link phases (`ClubMembers`, `Judges`,
/// `TournamentChiefJudge`) run right after the entities they connect.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Clubs
    Clubs,
    /// Players
    Players,
    /// Per-player yearly statistics
    PlayerYearStats,
    /// Tournaments
    Tournaments,
    /// Player participation in tournaments
    PlayerTournamentHistory,
    /// Games
    Games,
    /// Per-player game statistics
    Statistics,
    /// Player to club links
    ClubMembers,
    /// Tournament judges
    Judges,
    /// Tournament chief judge links
    TournamentChiefJudge,
}

impl Phase {
    /// Fixed execution order of an import run
    pub const PIPELINE: [Phase; 10] = [
        Phase::Clubs,
        Phase::Players,
        Phase::ClubMembers,
        Phase::PlayerYearStats,
        Phase::Tournaments,
        Phase::Judges,
        Phase::TournamentChiefJudge,
        Phase::PlayerTournamentHistory,
        Phase::Games,
        Phase::Statistics,
    ];

    /// Stable string form (used in the database and logs)
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Clubs => "CLUBS",
            Phase::Players => "PLAYERS",
            Phase::PlayerYearStats => "PLAYER_YEAR_STATS",
            Phase::Tournaments => "TOURNAMENTS",
            Phase::PlayerTournamentHistory => "PLAYER_TOURNAMENT_HISTORY",
            Phase::Games => "GAMES",
            Phase::Statistics => "STATISTICS",
            Phase::ClubMembers => "CLUB_MEMBERS",
            Phase::Judges => "JUDGES",
            Phase::TournamentChiefJudge => "TOURNAMENT_CHIEF_JUDGE",
        }
    }

    /// Position of this phase in [`Phase::PIPELINE`]
    pub fn index(&self) -> usize {
        Phase::PIPELINE
            .iter()
            .position(|p| p == self)
            .unwrap_or(Phase::PIPELINE.len())
    }

    /// Coarse run progress when this phase is the current one
    ///
    /// `index / total * 100`, so a long phase shows no movement until it finishes.
    pub fn progress_percent(&self) -> u8 {
        let total = Phase::PIPELINE.len();
        (self.index().min(total) * 100 / total) as u8
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::PIPELINE
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Invalid phase: {s}"))
    }
}

/// Import run status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Created, not yet started
    Pending,
    /// Currently running
    Running,
    /// Finished successfully
    Completed,
    /// Ended with a phase-fatal error or timeout
    Failed,
    /// Cancelled by the operator
    Cancelled,
}

impl RunStatus {
    /// Stable string form (used in the database)
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse the stored string form, treating unknown values as `Failed`
    pub fn from_db(value: &str) -> Self {
        match value {
            "PENDING" => RunStatus::Pending,
            "RUNNING" => RunStatus::Running,
            "COMPLETED" => RunStatus::Completed,
            "CANCELLED" => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }

    /// Whether the run can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single phase runner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseState {
    /// Runner created, nothing fetched yet
    NotStarted,
    /// Pulling pages from the source
    Fetching,
    /// Schema and duplicate checks
    Validating,
    /// Writing batches
    Persisting,
    /// Phase finished
    Done,
    /// Phase aborted
    Failed,
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseState::NotStarted => "not started",
            PhaseState::Fetching => "fetching",
            PhaseState::Validating => "validating",
            PhaseState::Persisting => "persisting",
            PhaseState::Done => "done",
            PhaseState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One import attempt, as stored in the run history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportRun {
    /// Run ID
    pub id: RunId,
    /// Current or terminal status
    pub status: RunStatus,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status
    pub ended_at: Option<DateTime<Utc>>,
    /// Records written to the store during this run
    pub records_processed: u64,
    /// Last phase the run entered
    pub current_phase: Option<Phase>,
    /// Structured report (errors, validation, integrity, skipped pages)
    pub report: Option<RunReport>,
}

/// Current status exposed to the run control surface
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Whether an import is in progress
    pub is_running: bool,
    /// The active (or most recent) run
    pub run_id: Option<RunId>,
    /// Coarse progress (0-100)
    pub progress: u8,
    /// Phase currently executing
    pub current_phase: Option<Phase>,
    /// Human-readable description of the current step
    pub current_operation: Option<String>,
    /// Last error message recorded for the run
    pub last_error: Option<String>,
}

/// Pages whose extraction failed and were skipped, per phase
///
/// Page numbers are deduplicated and kept sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkippedPages(BTreeMap<Phase, BTreeSet<u32>>);

impl SkippedPages {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skipped page
    pub fn add(&mut self, phase: Phase, page: u32) {
        self.0.entry(phase).or_default().insert(page);
    }

    /// Forget a page that was recovered by a retry
    pub fn remove(&mut self, phase: Phase, page: u32) {
        if let Some(pages) = self.0.get_mut(&phase) {
            pages.remove(&page);
            if pages.is_empty() {
                self.0.remove(&phase);
            }
        }
    }

    /// Skipped pages of one phase, ascending
    pub fn pages(&self, phase: Phase) -> Vec<u32> {
        self.0
            .get(&phase)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of skipped pages in one phase
    pub fn count(&self, phase: Phase) -> usize {
        self.0.get(&phase).map_or(0, BTreeSet::len)
    }

    /// Total skipped pages across phases
    pub fn total(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    /// Whether nothing was skipped
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
