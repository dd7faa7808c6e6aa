//! # Quizroom
//!
//! Real-time coordinator for live multiplayer quiz sessions. Players join a
//! room with a short game code, a single host drives the room through a
//! quiz question by question, and answers are scored by correctness and
//! speed.
//!
//! The crate is layered from the inside out:
//!
//! * [`room::Room`] holds one game's authoritative state and is driven
//!   synchronously under a per-room lock, with [`scheduler`] deciding which
//!   transitions are legal and [`scoring`] pricing answers.
//! * [`registry::RoomRegistry`] maps game codes to rooms.
//! * [`gateway::Gateway`] attaches connections, dispatches their events,
//!   and turns alarms into room transitions.
//! * [`server`] exposes the gateway over WebSocket and HTTP.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};

pub mod broadcaster;
pub mod collaborator;
pub mod config;
pub mod constants;
pub mod error;
pub mod game_code;
pub mod gateway;
pub mod leaderboard;
pub mod names;
pub mod quiz;
pub mod registry;
pub mod room;
pub mod scheduler;
pub mod scoring;
pub mod server;
pub mod session;

use broadcaster::Role;
use error::ErrorKind;
use game_code::GameCode;
use leaderboard::{QuestionStats, Standing};
use quiz::QuestionView;
use room::{PlayerId, PlayerView};
use scheduler::Status;
use scoring::ScoreReceipt;

/// Why a room stopped existing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    /// The game finished and its grace period ran out
    Finished,
    /// No host reconnected within the grace period
    HostAbandoned,
    /// This connection was superseded by a newer one for the same seat
    Replaced,
    /// The room's state became inconsistent
    Internal,
    /// The server is shutting down
    Shutdown,
}

/// Events pushed to clients as the room changes
///
/// Serialized as `{"event": <name>, "data": <payload>}` with camelCase names.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum UpdateMessage {
    /// Tells a newly joined player the id to reconnect with
    IdAssign {
        /// The player's id
        player_id: PlayerId,
    },
    /// A player joined the room
    PlayerJoined {
        /// The new player's name
        player_name: String,
        /// The full roster after the join
        players: Vec<PlayerView>,
    },
    /// A player left or lost their connection
    PlayerLeft {
        /// The departing player's name
        player_name: String,
        /// The full roster after the departure
        players: Vec<PlayerView>,
    },
    /// The host started the game
    GameStarted {
        /// Number of questions in the quiz
        total_questions: usize,
    },
    /// A question is open for answers
    QuestionStart {
        /// Index of the question
        question_index: usize,
        /// Number of questions in the quiz
        total_questions: usize,
        /// The question without its correct answer
        question: QuestionView,
    },
    /// The submitter's own scored answer
    AnswerResult(ScoreReceipt),
    /// Some player submitted an answer
    AnswerReceived {
        /// Who answered
        player_id: PlayerId,
        /// Answers received for the open question
        answered: usize,
        /// Answers expected for the open question
        total: usize,
        /// The full roster with updated scores
        players: Vec<PlayerView>,
    },
    /// A question closed; its answer and the standings are shown
    LeaderboardUpdate {
        /// Index of the question
        question_index: usize,
        /// Index of the correct option
        correct_answer: usize,
        /// Standings, highest score first
        leaderboard: Vec<Standing>,
    },
    /// The game is over
    GameFinished {
        /// Final standings, highest score first
        final_leaderboard: Vec<Standing>,
        /// Per-question answer counts
        stats: Vec<QuestionStats>,
    },
    /// The host connection dropped
    HostDisconnected,
    /// A host connection attached after the host had been gone
    HostReconnected,
    /// The room is closing and the connection will be closed
    RoomClosed {
        /// Why the room closed
        reason: CloseReason,
    },
    /// A request from this connection was rejected
    Error {
        /// Category of the failure
        kind: ErrorKind,
        /// Human readable description
        message: String,
    },
}

impl UpdateMessage {
    /// The wire name of this event
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::IdAssign { .. } => "idAssign",
            Self::PlayerJoined { .. } => "playerJoined",
            Self::PlayerLeft { .. } => "playerLeft",
            Self::GameStarted { .. } => "gameStarted",
            Self::QuestionStart { .. } => "questionStart",
            Self::AnswerResult(_) => "answerResult",
            Self::AnswerReceived { .. } => "answerReceived",
            Self::LeaderboardUpdate { .. } => "leaderboardUpdate",
            Self::GameFinished { .. } => "gameFinished",
            Self::HostDisconnected => "hostDisconnected",
            Self::HostReconnected => "hostReconnected",
            Self::RoomClosed { .. } => "roomClosed",
            Self::Error { .. } => "error",
        }
    }

    /// Converts the update message to a JSON string for transmission
    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Snapshots sent to a connection when it attaches
///
/// A client that connects or reconnects mid-game first receives a
/// `metainfo` frame and then the view for the current phase.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SyncMessage {
    /// Who the connection is and where the room stands
    Metainfo {
        /// The room's code
        game_code: GameCode,
        /// The connection's role
        role: Role,
        /// Lifecycle of the room
        status: Status,
        /// Most recently presented question, `-1` before the start
        current_question_index: i64,
        /// Number of questions in the bound quiz
        total_questions: usize,
        /// Whether a host is attached
        host_connected: bool,
        /// The player's id, for player connections
        player_id: Option<PlayerId>,
        /// The player's score, for player connections
        score: Option<u64>,
    },
    /// Lobby view before the game starts
    WaitingScreen {
        /// The roster so far
        players: Vec<PlayerView>,
    },
    /// A question is open
    Question {
        /// Index of the question
        question_index: usize,
        /// Number of questions in the quiz
        total_questions: usize,
        /// The question without its correct answer
        question: QuestionView,
        /// Seconds left to answer as measured by the server
        time_left: f64,
        /// Answers received so far
        answered: usize,
        /// Answers expected
        expected: usize,
        /// Whether this connection's player already answered
        has_answered: bool,
    },
    /// A question has been revealed
    Leaderboard {
        /// Index of the question
        question_index: usize,
        /// Number of questions in the quiz
        total_questions: usize,
        /// Index of the correct option
        correct_answer: usize,
        /// Standings, highest score first
        leaderboard: Vec<Standing>,
    },
    /// The game is over
    Summary {
        /// Final standings, highest score first
        final_leaderboard: Vec<Standing>,
        /// Per-question answer counts
        stats: Vec<QuestionStats>,
    },
}

impl SyncMessage {
    /// Converts the sync message to a JSON string for transmission
    pub fn to_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Timed events delivered back to a room
///
/// Each alarm carries the epoch its timer was armed with. A room ignores
/// an alarm whose epoch no longer owns the corresponding timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// The answer window of a question ran out
    CountdownExpired {
        /// Index of the question
        index: usize,
        /// Epoch of the countdown
        epoch: u64,
    },
    /// The room has been without a host for the full grace period
    HostAbsent {
        /// Epoch of the host-absence timer
        epoch: u64,
    },
    /// A finished room's grace period ran out
    Teardown {
        /// Epoch of the teardown timer
        epoch: u64,
    },
}
