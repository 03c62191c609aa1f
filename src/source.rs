//! Extraction source interface
//!
//! Parsing the source's markup is not part of this crate. A [`PageSource`] opens
//! independent [`PageSession`]s (one per fetch worker) and each session returns the typed
//! records found on a page. A session is only ever used by the worker that opened it.

use crate::error::Result;
use crate::records::{
    ChiefJudgeAssignment, Club, ClubMembership, Game, GameStatistic, Player, PlayerYearStat,
    Tournament, TournamentJudge, TournamentParticipation,
};
use async_trait::async_trait;
use std::sync::Arc;

/// One worker's connection to the source
#[async_trait]
pub trait PageSession<R>: Send + Sync {
    /// Number of pages available; pages are numbered from 1
    async fn page_count(&self) -> Result<u32>;

    /// Records on one page
    ///
    /// Transient failures should carry one of the recognized messages (timeout, connection
    /// reset, 503, ...) so they are retried.
    async fn fetch_page(&self, page: u32) -> Result<Vec<R>>;
}

/// Factory for page sessions of one record type
#[async_trait]
pub trait PageSource<R>: Send + Sync {
    /// Open a new, independent session
    ///
    /// A failure here is fatal for the phase.
    async fn open_session(&self) -> Result<Box<dyn PageSession<R>>>;
}

/// Shared handle to a page source
pub type SharedSource<R> = Arc<dyn PageSource<R>>;

/// The extraction sources of a full import, one per phase
///
/// A phase whose source is not set is skipped.
#[derive(Clone, Default)]
pub struct ImportSources {
    /// CLUBS
    pub clubs: Option<SharedSource<Club>>,
    /// PLAYERS
    pub players: Option<SharedSource<Player>>,
    /// CLUB_MEMBERS
    pub club_members: Option<SharedSource<ClubMembership>>,
    /// PLAYER_YEAR_STATS
    pub player_year_stats: Option<SharedSource<PlayerYearStat>>,
    /// TOURNAMENTS
    pub tournaments: Option<SharedSource<Tournament>>,
    /// JUDGES
    pub judges: Option<SharedSource<TournamentJudge>>,
    /// TOURNAMENT_CHIEF_JUDGE
    pub chief_judges: Option<SharedSource<ChiefJudgeAssignment>>,
    /// PLAYER_TOURNAMENT_HISTORY
    pub tournament_history: Option<SharedSource<TournamentParticipation>>,
    /// GAMES
    pub games: Option<SharedSource<Game>>,
    /// STATISTICS
    pub statistics: Option<SharedSource<GameStatistic>>,
}

impl ImportSources {
    /// No sources
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for ImportSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportSources")
            .field("clubs", &self.clubs.is_some())
            .field("players", &self.players.is_some())
            .field("club_members", &self.club_members.is_some())
            .field("player_year_stats", &self.player_year_stats.is_some())
            .field("tournaments", &self.tournaments.is_some())
            .field("judges", &self.judges.is_some())
            .field("chief_judges", &self.chief_judges.is_some())
            .field("tournament_history", &self.tournament_history.is_some())
            .field("games", &self.games.is_some())
            .field("statistics", &self.statistics.is_some())
            .finish()
    }
}
