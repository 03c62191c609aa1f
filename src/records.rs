//! Typed import records
//!
//! One record type per phase. Extraction hands the runner these structs directly, so the
//! later stages always work on a known shape. Each record carries a schema check
//! (`validate`) and a natural key used for duplicate suppression and for the references
//! between entity tables.

use crate::types::Phase;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A record produced by one import phase
pub trait ImportRecord: Clone + Send + Sync + 'static {
    /// Phase that imports this record type
    const PHASE: Phase;

    /// Entity name used in metrics and logs
    const ENTITY: &'static str;

    /// Stable key identifying the record across runs
    fn natural_key(&self) -> String;

    /// Schema check
    ///
    /// Returns a description of the first problem found.
    fn validate(&self) -> Result<(), String>;
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    Ok(())
}

/// A member club
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Club {
    /// Source identifier
    pub external_id: String,
    /// Club name
    pub name: String,
    /// Home city
    pub city: Option<String>,
    /// Regional association
    pub region: Option<String>,
}

impl ImportRecord for Club {
    const PHASE: Phase = Phase::Clubs;
    const ENTITY: &'static str = "club";

    fn natural_key(&self) -> String {
        self.external_id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("Club id", &self.external_id)?;
        require("Club name", &self.name)
    }
}

/// A registered player
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Source identifier
    pub external_id: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Year of birth
    pub birth_year: Option<i32>,
    /// Current rating
    pub rating: Option<i32>,
    /// Title, e.g. "FM"
    pub title: Option<String>,
}

impl ImportRecord for Player {
    const PHASE: Phase = Phase::Players;
    const ENTITY: &'static str = "player";

    fn natural_key(&self) -> String {
        self.external_id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("Player id", &self.external_id)?;
        require("Last name", &self.last_name)?;
        if let Some(year) = self.birth_year
            && !(1900..=2100).contains(&year)
        {
            return Err(format!("Birth year out of range: {year}"));
        }
        if let Some(rating) = self.rating
            && !(0..=4000).contains(&rating)
        {
            return Err(format!("Rating out of range: {rating}"));
        }
        Ok(())
    }
}

/// Link between a player and their club
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubMembership {
    /// Player source identifier
    pub player_external_id: String,
    /// Club source identifier
    pub club_external_id: String,
}

impl ImportRecord for ClubMembership {
    const PHASE: Phase = Phase::ClubMembers;
    const ENTITY: &'static str = "club_membership";

    // a player belongs to one club
    fn natural_key(&self) -> String {
        self.player_external_id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("Player id", &self.player_external_id)?;
        require("Club id", &self.club_external_id)
    }
}

/// A player's results over one calendar year
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerYearStat {
    /// Player source identifier
    pub player_external_id: String,
    /// Calendar year
    pub year: i32,
    /// Rated games played
    pub games_played: u32,
    /// Games won
    pub wins: u32,
    /// Games drawn
    pub draws: u32,
    /// Games lost
    pub losses: u32,
    /// Rating at year end
    pub rating_end: Option<i32>,
}

impl ImportRecord for PlayerYearStat {
    const PHASE: Phase = Phase::PlayerYearStats;
    const ENTITY: &'static str = "player_year_stat";

    fn natural_key(&self) -> String {
        format!("{}:{}", self.player_external_id, self.year)
    }

    fn validate(&self) -> Result<(), String> {
        require("Player id", &self.player_external_id)?;
        if !(1900..=2100).contains(&self.year) {
            return Err(format!("Year out of range: {}", self.year));
        }
        let decided = self.wins + self.draws + self.losses;
        if decided > self.games_played {
            return Err(format!(
                "Wins, draws and losses ({decided}) exceed games played ({})",
                self.games_played
            ));
        }
        Ok(())
    }
}

/// A tournament
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tournament {
    /// Source identifier
    pub external_id: String,
    /// Tournament name
    pub name: String,
    /// First day
    pub start_date: NaiveDate,
    /// Last day
    pub end_date: Option<NaiveDate>,
    /// Venue
    pub location: Option<String>,
    /// Number of rounds
    pub rounds: Option<u32>,
}

impl ImportRecord for Tournament {
    const PHASE: Phase = Phase::Tournaments;
    const ENTITY: &'static str = "tournament";

    fn natural_key(&self) -> String {
        self.external_id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("Tournament id", &self.external_id)?;
        require("Tournament name", &self.name)?;
        if let Some(end) = self.end_date
            && end < self.start_date
        {
            return Err(format!(
                "End date ({end}) must not be before start date ({})",
                self.start_date
            ));
        }
        if self.rounds == Some(0) {
            return Err("Rounds must be positive".to_string());
        }
        Ok(())
    }
}

/// A judge officiating at a tournament
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentJudge {
    /// Tournament source identifier
    pub tournament_external_id: String,
    /// Judge source identifier
    pub judge_external_id: String,
    /// Judge name as listed by the source
    pub name: String,
    /// Role, e.g. "deputy"
    pub role: Option<String>,
}

impl ImportRecord for TournamentJudge {
    const PHASE: Phase = Phase::Judges;
    const ENTITY: &'static str = "tournament_judge";

    fn natural_key(&self) -> String {
        format!("{}:{}", self.tournament_external_id, self.judge_external_id)
    }

    fn validate(&self) -> Result<(), String> {
        require("Tournament id", &self.tournament_external_id)?;
        require("Judge id", &self.judge_external_id)?;
        require("Judge name", &self.name)
    }
}

/// Link between a tournament and its chief judge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChiefJudgeAssignment {
    /// Tournament source identifier
    pub tournament_external_id: String,
    /// Judge source identifier
    pub judge_external_id: String,
}

impl ImportRecord for ChiefJudgeAssignment {
    const PHASE: Phase = Phase::TournamentChiefJudge;
    const ENTITY: &'static str = "chief_judge_assignment";

    // one chief judge per tournament
    fn natural_key(&self) -> String {
        self.tournament_external_id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("Tournament id", &self.tournament_external_id)?;
        require("Judge id", &self.judge_external_id)
    }
}

/// A player's entry in a tournament
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TournamentParticipation {
    /// Player source identifier
    pub player_external_id: String,
    /// Tournament source identifier
    pub tournament_external_id: String,
    /// Final standing
    pub final_rank: Option<u32>,
    /// Points scored
    pub points: Option<f64>,
    /// Rating change over the tournament
    pub rating_change: Option<i32>,
}

impl ImportRecord for TournamentParticipation {
    const PHASE: Phase = Phase::PlayerTournamentHistory;
    const ENTITY: &'static str = "tournament_participation";

    fn natural_key(&self) -> String {
        format!("{}:{}", self.player_external_id, self.tournament_external_id)
    }

    fn validate(&self) -> Result<(), String> {
        require("Player id", &self.player_external_id)?;
        require("Tournament id", &self.tournament_external_id)?;
        if self.final_rank == Some(0) {
            return Err("Final rank must be positive".to_string());
        }
        if let Some(points) = self.points
            && (!points.is_finite() || points < 0.0)
        {
            return Err(format!("Points must be non-negative, got {points}"));
        }
        Ok(())
    }
}

/// Result of a game, from the first player's side
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    /// First player won
    #[serde(rename = "1-0")]
    WhiteWins,
    /// Second player won
    #[serde(rename = "0-1")]
    BlackWins,
    /// Draw
    #[serde(rename = "1/2-1/2")]
    Draw,
    /// Forfeit or unfinished
    #[serde(rename = "*")]
    Unknown,
}

impl GameResult {
    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2-1/2",
            GameResult::Unknown => "*",
        }
    }
}

/// A game played at a tournament
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Source identifier
    pub external_id: String,
    /// Tournament source identifier
    pub tournament_external_id: String,
    /// Round number
    pub round: Option<u32>,
    /// Player with the first move
    pub white_player_external_id: String,
    /// Opponent
    pub black_player_external_id: String,
    /// Outcome
    pub result: GameResult,
    /// Date played
    pub played_on: Option<NaiveDate>,
}

impl ImportRecord for Game {
    const PHASE: Phase = Phase::Games;
    const ENTITY: &'static str = "game";

    fn natural_key(&self) -> String {
        self.external_id.clone()
    }

    fn validate(&self) -> Result<(), String> {
        require("Game id", &self.external_id)?;
        require("Tournament id", &self.tournament_external_id)?;
        require("White player id", &self.white_player_external_id)?;
        require("Black player id", &self.black_player_external_id)?;
        if self.white_player_external_id == self.black_player_external_id {
            return Err(format!(
                "Player {} cannot play against themselves",
                self.white_player_external_id
            ));
        }
        Ok(())
    }
}

/// One player's side of a game
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameStatistic {
    /// Game source identifier
    pub game_external_id: String,
    /// Player source identifier
    pub player_external_id: String,
    /// 1.0 win, 0.5 draw, 0.0 loss
    pub score: f64,
    /// Rating before the game
    pub rating_before: Option<i32>,
    /// Rating change from the game
    pub rating_change: Option<i32>,
}

impl ImportRecord for GameStatistic {
    const PHASE: Phase = Phase::Statistics;
    const ENTITY: &'static str = "game_statistic";

    fn natural_key(&self) -> String {
        format!("{}:{}", self.game_external_id, self.player_external_id)
    }

    fn validate(&self) -> Result<(), String> {
        require("Game id", &self.game_external_id)?;
        require("Player id", &self.player_external_id)?;
        if ![0.0, 0.5, 1.0].contains(&self.score) {
            return Err(format!("Score must be 0, 0.5 or 1, got {}", self.score));
        }
        Ok(())
    }
}
