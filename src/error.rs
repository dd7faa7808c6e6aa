//! Errors surfaced by the coordinator
//!
//! Every failure a client can cause maps onto one [`ErrorKind`]. The gateway
//! turns all of them except [`ErrorKind::Internal`] into an `error` event for
//! the originating connection; internal errors mean a room's state can no
//! longer be trusted and the room is closed.

use serde::Serialize;
use thiserror::Error;

use crate::{
    UpdateMessage, collaborator::QuizId, game_code::GameCode, names, scheduler::Phase,
};

/// The category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Missing or malformed handshake parameters or payloads
    Protocol,
    /// A connection attempted something its role does not allow
    Authorization,
    /// A game code or quiz id did not resolve
    NotFound,
    /// The request collides with existing state
    Conflict,
    /// The request is not valid in the current phase
    State,
    /// The room's own state is inconsistent
    Internal,
}

/// Errors that can occur while coordinating a game
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A required handshake or payload parameter was absent
    #[error("missing parameter `{0}`")]
    MissingParameter(&'static str),
    /// A handshake or payload parameter could not be understood
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// The parameter name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },
    /// An inbound event name is not part of the protocol
    #[error("unrecognized event `{0}`")]
    UnknownEvent(String),
    /// An inbound frame or payload could not be decoded
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// The selected option does not exist on the current question
    #[error("option {option} is not one of the {count} choices")]
    OptionOutOfRange {
        /// The selected option
        option: usize,
        /// How many options the question has
        count: usize,
    },
    /// A host-only action came from another connection
    #[error("only the host may {0}")]
    NotHost(&'static str),
    /// A host handshake presented the wrong host identity
    #[error("host identity does not match this game")]
    HostMismatch,
    /// A player-only action came from a connection without a player
    #[error("connection is not a player in this game")]
    NotAPlayer,
    /// A submission named a player other than the submitter
    #[error("cannot answer on behalf of another player")]
    ForeignPlayer,
    /// No live room has this code
    #[error("game {0} not found")]
    RoomNotFound(GameCode),
    /// The quiz lookup does not know this quiz
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),
    /// A display name was rejected
    #[error(transparent)]
    Name(#[from] names::Error),
    /// The room has reached its player limit
    #[error("room is full")]
    RoomFull,
    /// The player already answered this question
    #[error("question {0} was already answered")]
    AlreadyAnswered(usize),
    /// The submission targets a question that is no longer accepting answers
    #[error("answer for question {submitted} is stale, question {current} is open")]
    StaleQuestion {
        /// The index the client answered
        submitted: usize,
        /// The index currently collecting answers
        current: usize,
    },
    /// The room is already bound to a different quiz
    #[error("game is bound to a different quiz")]
    QuizMismatch,
    /// The game cannot start without players
    #[error("need at least one player")]
    NeedPlayers,
    /// The room has no quiz to present
    #[error("no quiz is bound to this game")]
    NoQuiz,
    /// The action does not apply in the current phase
    #[error("cannot {action} while {phase}")]
    InvalidState {
        /// What was attempted
        action: &'static str,
        /// The phase the room was in
        phase: Phase,
    },
    /// Revealing was requested before every expected player answered
    #[error("{answered} of {expected} players have answered")]
    AnswersPending {
        /// Answers received
        answered: usize,
        /// Answers expected
        expected: usize,
    },
    /// The game is over
    #[error("game has already finished")]
    GameFinished,
    /// The room's state contradicts itself
    #[error("room state is corrupted: {0}")]
    Corrupted(String),
}

/// Result type used throughout the coordinator
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The category this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingParameter(_)
            | Self::InvalidParameter { .. }
            | Self::UnknownEvent(_)
            | Self::MalformedMessage(_)
            | Self::OptionOutOfRange { .. } => ErrorKind::Protocol,
            Self::Name(names::Error::Used | names::Error::Assigned) => ErrorKind::Conflict,
            Self::Name(_) => ErrorKind::Protocol,
            Self::NotHost(_) | Self::HostMismatch | Self::NotAPlayer | Self::ForeignPlayer => {
                ErrorKind::Authorization
            }
            Self::RoomNotFound(_) | Self::QuizNotFound(_) => ErrorKind::NotFound,
            Self::RoomFull
            | Self::AlreadyAnswered(_)
            | Self::StaleQuestion { .. }
            | Self::QuizMismatch => ErrorKind::Conflict,
            Self::NeedPlayers
            | Self::NoQuiz
            | Self::InvalidState { .. }
            | Self::AnswersPending { .. }
            | Self::GameFinished => ErrorKind::State,
            Self::Corrupted(_) => ErrorKind::Internal,
        }
    }

    /// Whether the room raising this error must be isolated
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// The `error` event reporting this error to a client
    pub fn to_update(&self) -> UpdateMessage {
        UpdateMessage::Error {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
