//! Persistence interface used by the phase runners
//!
//! The runners only ever call `exists` and `create_many`; everything else the store can do
//! is outside the import path. [`crate::db::Database`] implements these traits for SQLite.

use crate::error::Result;
use crate::integrity::IntegrityQueries;
use crate::records::{
    ChiefJudgeAssignment, Club, ClubMembership, Game, GameStatistic, ImportRecord, Player,
    PlayerYearStat, Tournament, TournamentJudge, TournamentParticipation,
};
use async_trait::async_trait;

/// Per-entity persistence
#[async_trait]
pub trait Repository<R: ImportRecord>: Send + Sync {
    /// Whether a record with this natural key is already stored
    async fn exists(&self, natural_key: &str) -> Result<bool>;

    /// Store records, silently skipping keys that already exist
    ///
    /// Returns how many records were actually written.
    async fn create_many(&self, records: &[R]) -> Result<u64>;
}

/// A store covering every entity of an import plus the integrity scans
pub trait EntityRepository:
    Repository<Club>
    + Repository<Player>
    + Repository<ClubMembership>
    + Repository<PlayerYearStat>
    + Repository<Tournament>
    + Repository<TournamentJudge>
    + Repository<ChiefJudgeAssignment>
    + Repository<TournamentParticipation>
    + Repository<Game>
    + Repository<GameStatistic>
    + IntegrityQueries
{
}

impl<T> EntityRepository for T where
    T: Repository<Club>
        + Repository<Player>
        + Repository<ClubMembership>
        + Repository<PlayerYearStat>
        + Repository<Tournament>
        + Repository<TournamentJudge>
        + Repository<ChiefJudgeAssignment>
        + Repository<TournamentParticipation>
        + Repository<Game>
        + Repository<GameStatistic>
        + IntegrityQueries
{
}
