use crate::db::*;
use crate::integrity::{IntegrityChecker, IntegrityQueries, IntegrityStatus};
use crate::repository::Repository;
use crate::records::{
    ChiefJudgeAssignment, Club, ClubMembership, Game, GameResult, GameStatistic, Player,
    Tournament, TournamentJudge, TournamentParticipation,
};
use chrono::NaiveDate;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn player(id: &str) -> Player {
    Player {
        external_id: id.into(),
        first_name: "Mikhail".into(),
        last_name: "Tal".into(),
        birth_year: None,
        rating: None,
        title: None,
    }
}

fn game(id: &str, tournament: &str) -> Game {
    Game {
        external_id: id.into(),
        tournament_external_id: tournament.into(),
        round: None,
        white_player_external_id: "p-1".into(),
        black_player_external_id: "p-2".into(),
        result: GameResult::WhiteWins,
        played_on: None,
    }
}

fn statistic(game: &str, player: &str) -> GameStatistic {
    GameStatistic {
        game_external_id: game.into(),
        player_external_id: player.into(),
        score: 1.0,
        rating_before: None,
        rating_change: None,
    }
}

async fn seed_consistent(db: &Database) {
    db.create_many(&[Club {
        external_id: "c-1".into(),
        name: "Riga".into(),
        city: None,
        region: None,
    }])
    .await
    .unwrap();
    db.create_many(&[player("p-1"), player("p-2")]).await.unwrap();
    db.create_many(&[ClubMembership {
        player_external_id: "p-1".into(),
        club_external_id: "c-1".into(),
    }])
    .await
    .unwrap();
    db.create_many(&[Tournament {
        external_id: "t-1".into(),
        name: "Memorial".into(),
        start_date: NaiveDate::from_ymd_opt(1960, 3, 1).unwrap(),
        end_date: None,
        location: None,
        rounds: None,
    }])
    .await
    .unwrap();
    db.create_many(&[TournamentJudge {
        tournament_external_id: "t-1".into(),
        judge_external_id: "j-1".into(),
        name: "Arbiter".into(),
        role: None,
    }])
    .await
    .unwrap();
    db.create_many(&[ChiefJudgeAssignment {
        tournament_external_id: "t-1".into(),
        judge_external_id: "j-1".into(),
    }])
    .await
    .unwrap();
    db.create_many(&[TournamentParticipation {
        player_external_id: "p-1".into(),
        tournament_external_id: "t-1".into(),
        final_rank: Some(1),
        points: Some(7.0),
        rating_change: None,
    }])
    .await
    .unwrap();
    db.create_many(&[game("g-1", "t-1")]).await.unwrap();
    db.create_many(&[statistic("g-1", "p-1"), statistic("g-1", "p-2")])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_consistent_data_passes() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
    seed_consistent(&db).await;

    let checker = IntegrityChecker::new(db.clone());
    let report = checker.check_all().await;
    assert_eq!(report.status, IntegrityStatus::Pass, "{:?}", report.issues);
    assert!(report.passed);
    assert!(report.failed_checks.is_empty());

    let scan = db.participation_reference_scan().await.unwrap();
    assert_eq!(scan.total_checked, 2);
    // games, judges, membership and chief judge
    assert_eq!(db.orphan_scan().await.unwrap().total_checked, 4);
}

#[tokio::test]
async fn test_dangling_statistic_is_reported() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    seed_consistent(&db).await;

    db.create_many(&[statistic("g-404", "p-1"), statistic("g-1", "p-404")])
        .await
        .unwrap();

    let scan = db.participation_reference_scan().await.unwrap();
    assert_eq!(scan.total_checked, 4);
    assert_eq!(scan.problems.len(), 2);
    assert!(scan.problems.iter().any(|p| p.contains("missing player p-404")));
    assert!(scan.problems.iter().any(|p| p.contains("missing game g-404")));

    db.close().await;
}

#[tokio::test]
async fn test_dangling_history_and_orphans() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
    seed_consistent(&db).await;

    db.create_many(&[TournamentParticipation {
        player_external_id: "p-2".into(),
        tournament_external_id: "t-404".into(),
        final_rank: None,
        points: None,
        rating_change: None,
    }])
    .await
    .unwrap();
    db.create_many(&[game("g-2", "t-405")]).await.unwrap();

    let history = db.tournament_history_reference_scan().await.unwrap();
    assert_eq!(history.problems.len(), 1);
    assert!(history.problems[0].contains("t-404"));

    let orphans = db.orphan_scan().await.unwrap();
    assert_eq!(orphans.problems.len(), 1);
    assert!(orphans.problems[0].contains("game g-2"));

    let report = IntegrityChecker::new(db.clone()).check_all().await;
    assert_eq!(report.status, IntegrityStatus::Fail);
    assert_eq!(
        report.failed_checks,
        vec!["tournament_history_references", "orphaned_records"]
    );
    assert_eq!(report.issues.len(), 2);
}
