//! Quiz content in, game results out
//!
//! The coordinator does not author or persist quizzes. It asks a
//! [`QuizLookup`] for content when a room is bound to a quiz, and hands it
//! a [`GameRecord`] once a game finishes. [`InMemoryQuizStore`] is the
//! implementation the server binary uses, seeded from a JSON file.

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{Mutex, PoisonError},
};

use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

use crate::{
    constants::room::MAX_RETAINED_RESULTS,
    game_code::GameCode,
    leaderboard::QuestionStats,
    quiz::Quiz,
    room::{Player, PlayerId},
    scoring::AnswerRecord,
};

/// Identifier of a quiz in the external quiz store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(transparent)]
pub struct QuizId(String);

impl From<String> for QuizId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for QuizId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl QuizId {
    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where quizzes come from and where finished games go
pub trait QuizLookup: Send + Sync {
    /// Fetches the quiz with this id
    fn find_quiz(&self, id: &QuizId) -> Option<Quiz>;

    /// Receives the outcome of a finished game
    ///
    /// Called once per game, outside of any room lock.
    fn record_results(&self, _record: &GameRecord) {}
}

/// One player's outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    /// The player's id
    pub player_id: PlayerId,
    /// The player's display name
    pub player_name: String,
    /// Final score
    pub score: u64,
    /// Every answer the player gave
    pub answers: Vec<AnswerRecord>,
}

impl From<&Player> for PlayerRecord {
    fn from(player: &Player) -> Self {
        Self {
            player_id: player.player_id.clone(),
            player_name: player.player_name.clone(),
            score: player.score,
            answers: player.answers.clone(),
        }
    }
}

/// The outcome of a finished game
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    /// The room the game was played in
    pub game_code: GameCode,
    /// The quiz that was played
    pub quiz_id: Option<QuizId>,
    /// The host identity the room was started for
    pub host_identity: Option<String>,
    /// When the game finished
    pub finished_at: SystemTime,
    /// Every player, in join order
    pub players: Vec<PlayerRecord>,
    /// Per-question answer counts
    pub stats: Vec<QuestionStats>,
}

/// Errors loading quizzes into the store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The quiz file could not be read
    #[error("cannot read quiz file: {0}")]
    Io(#[from] std::io::Error),
    /// The quiz file is not valid JSON of the expected shape
    #[error("cannot parse quiz file: {0}")]
    Json(#[from] serde_json::Error),
    /// A quiz failed validation
    #[error("quiz {id} is invalid: {report}")]
    Invalid {
        /// The offending quiz
        id: QuizId,
        /// What garde reported
        report: garde::Report,
    },
}

/// An entry of a quiz file
#[derive(Debug, Deserialize)]
struct QuizEntry {
    id: QuizId,
    quiz: Quiz,
}

/// Quiz store held in memory
///
/// Finished game records are kept in memory as well, up to
/// `MAX_RETAINED_RESULTS` of them until drained with
/// [`InMemoryQuizStore::take_results`]. They are lost when the process
/// exits.
#[derive(Debug, Default)]
pub struct InMemoryQuizStore {
    quizzes: Mutex<HashMap<QuizId, Quiz>>,
    results: Mutex<VecDeque<GameRecord>>,
}

impl InMemoryQuizStore {
    /// Adds or replaces a quiz after validating it
    ///
    /// # Errors
    ///
    /// `StoreError::Invalid` if the quiz fails validation
    pub fn insert(&self, id: QuizId, quiz: Quiz) -> Result<(), StoreError> {
        if let Err(report) = quiz.validate() {
            return Err(StoreError::Invalid { id, report });
        }
        self.quizzes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, quiz);
        Ok(())
    }

    /// Builds a store from a JSON array of `{"id", "quiz"}` entries
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let entries: Vec<QuizEntry> = serde_json::from_str(json)?;
        let store = Self::default();
        for QuizEntry { id, quiz } in entries {
            store.insert(id, quiz)?;
        }
        Ok(store)
    }

    /// Builds a store from a quiz file
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let json = std::fs::read_to_string(path)?;
        let store = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), quizzes = store.len(), "quizzes loaded");
        Ok(store)
    }

    /// Number of stored quizzes
    pub fn len(&self) -> usize {
        self.quizzes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no quizzes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every retained game record, oldest first
    pub fn take_results(&self) -> Vec<GameRecord> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect_vec()
    }
}

impl QuizLookup for InMemoryQuizStore {
    fn find_quiz(&self, id: &QuizId) -> Option<Quiz> {
        self.quizzes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn record_results(&self, record: &GameRecord) {
        tracing::info!(
            game_code = %record.game_code,
            players = record.players.len(),
            "game recorded"
        );
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        if results.len() >= MAX_RETAINED_RESULTS {
            results.pop_front();
        }
        results.push_back(record.clone());
    }
}
