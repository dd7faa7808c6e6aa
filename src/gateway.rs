//! Connection handling and event dispatch
//!
//! The [`Gateway`] sits between the transport and the rooms. It classifies
//! a new connection from its handshake, attaches it to the right room,
//! decodes every inbound frame into a room operation, and reports failures
//! back to the sender as `error` events.
//!
//! It also owns the timer plumbing: alarms are spawned as tokio tasks that
//! sleep, then lock their room and deliver the alarm. Tasks hold only a
//! weak reference, so a room that is dropped from the registry is freed
//! even while a timer for it is pending.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use derive_where::derive_where;
use futures::{FutureExt, future::BoxFuture};
use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, de::DeserializeOwned};
use tokio::{sync::Mutex, task::AbortHandle};

use crate::{
    AlarmMessage, CloseReason, UpdateMessage,
    broadcaster::{ConnectionId, Role},
    collaborator::{QuizId, QuizLookup},
    config::GameConfig,
    error::{Error, Result},
    game_code::GameCode,
    quiz::Quiz,
    registry::{RoomRegistry, SharedRoom},
    room::{AlarmOutcome, PlayerId, Room, RoomSummary, Submission},
    scoring,
    session::Tunnel,
};

/// Connection parameters, as sent in the WebSocket query string
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Code of the room to attach to
    pub game_code: Option<String>,
    /// `host` or `player`
    pub role: Option<String>,
    /// A returning player's id
    pub player_id: Option<String>,
    /// A new player's display name
    pub player_name: Option<String>,
    /// The identity a host claims
    pub host_id: Option<String>,
    /// The quiz a host wants the room to run
    pub quiz_id: Option<String>,
}

/// Who is attaching, once the handshake has been validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participant {
    /// A host connection
    Host {
        /// Claimed host identity
        host_id: Option<String>,
        /// Quiz to bind to a room that has none
        quiz_id: Option<QuizId>,
    },
    /// A player connection
    Player {
        /// Id of a returning player
        player_id: Option<PlayerId>,
        /// Requested display name
        player_name: String,
    },
}

/// A validated handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The room to attach to
    pub game_code: GameCode,
    /// Who is attaching
    pub participant: Participant,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl Handshake {
    /// Validates the handshake
    ///
    /// # Errors
    ///
    /// * `Error::MissingParameter` - `gameCode`, `role` or, for players,
    ///   `playerName` is absent
    /// * `Error::InvalidParameter` - A parameter does not parse
    pub fn parse(&self) -> Result<Attachment> {
        let game_code = present(self.game_code.as_ref())
            .ok_or(Error::MissingParameter("gameCode"))?
            .parse::<GameCode>()
            .map_err(|e| Error::InvalidParameter {
                name: "gameCode",
                reason: e.to_string(),
            })?;
        let role = present(self.role.as_ref())
            .ok_or(Error::MissingParameter("role"))?
            .parse::<Role>()
            .map_err(|e| Error::InvalidParameter {
                name: "role",
                reason: e.to_string(),
            })?;

        let participant = match role {
            Role::Host => Participant::Host {
                host_id: present(self.host_id.as_ref()).map(str::to_owned),
                quiz_id: present(self.quiz_id.as_ref()).map(QuizId::from),
            },
            Role::Player => Participant::Player {
                player_id: present(self.player_id.as_ref())
                    .map(PlayerId::parse)
                    .transpose()?,
                player_name: present(self.player_name.as_ref())
                    .ok_or(Error::MissingParameter("playerName"))?
                    .to_owned(),
            },
        };

        Ok(Attachment {
            game_code,
            participant,
        })
    }
}

/// Payload of `nextQuestion`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextQuestion {
    /// The index the host expects to present next
    #[serde(default)]
    pub question_index: Option<usize>,
}

/// Payload of `submitAnswer`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    /// Must match the connection's room when present
    #[serde(default)]
    pub game_code: Option<String>,
    /// Must match the connection's player when present
    #[serde(default)]
    pub player_id: Option<String>,
    /// The question being answered
    pub question_index: usize,
    /// Chosen option; `null` or negative for no answer
    #[serde(default)]
    pub selected_answer: Option<i64>,
    /// Seconds left on the client's clock
    #[serde(default)]
    pub time_left: f64,
}

impl AnswerSubmission {
    /// Checks the payload against the connection and converts it
    pub fn into_submission(self, game_code: GameCode) -> Result<Submission> {
        if let Some(claimed) = present(self.game_code.as_ref()) {
            let matches = claimed
                .parse::<GameCode>()
                .is_ok_and(|claimed| claimed == game_code);
            if !matches {
                return Err(Error::InvalidParameter {
                    name: "gameCode",
                    reason: format!("does not match game {game_code}"),
                });
            }
        }
        Ok(Submission {
            player_id: present(self.player_id.as_ref())
                .map(PlayerId::parse)
                .transpose()?,
            question_index: self.question_index,
            selected: self
                .selected_answer
                .and_then(|selected| usize::try_from(selected).ok()),
            time_remaining: scoring::remaining_from_secs(self.time_left),
        })
    }
}

/// Inbound events
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Host starts the game
    StartGame,
    /// Host advances past a revealed question
    NextQuestion(NextQuestion),
    /// Player answers the open question
    SubmitAnswer(AnswerSubmission),
    /// Host reveals once everyone answered
    ShowLeaderboard,
    /// Host reveals regardless of outstanding answers
    SkipQuestion,
    /// Host ends the game after the last question
    GameEnded,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn decode<D: DeserializeOwned>(data: serde_json::Value) -> Result<D> {
    let data = if data.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| Error::MalformedMessage(e.to_string()))
}

impl IncomingMessage {
    /// Decodes a `{"event", "data"}` text frame
    ///
    /// # Errors
    ///
    /// * `Error::MalformedMessage` - Not an envelope, or a bad payload
    /// * `Error::UnknownEvent` - The event name is not recognized
    pub fn parse(text: &str) -> Result<Self> {
        let Envelope { event, data } =
            serde_json::from_str(text).map_err(|e| Error::MalformedMessage(e.to_string()))?;
        match event.as_str() {
            "startGame" => Ok(Self::StartGame),
            "nextQuestion" => decode(data).map(Self::NextQuestion),
            "submitAnswer" => decode(data).map(Self::SubmitAnswer),
            "showLeaderboard" => Ok(Self::ShowLeaderboard),
            "skipQuestion" => Ok(Self::SkipQuestion),
            "gameEnded" => Ok(Self::GameEnded),
            _ => Err(Error::UnknownEvent(event)),
        }
    }
}

/// An attached connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The connection's id
    pub connection: ConnectionId,
    /// The room it is attached to
    pub game_code: GameCode,
    /// Host or player
    pub role: Role,
    /// The player's id, for player connections
    pub player_id: Option<PlayerId>,
}

/// Entry point for every connection and timer
#[derive_where(Clone)]
pub struct Gateway<T> {
    registry: Arc<RoomRegistry<T>>,
    quizzes: Arc<dyn QuizLookup>,
    options: GameConfig,
}

impl<T> Gateway<T>
where
    T: Tunnel + Clone + Send + Sync + 'static,
{
    /// Creates a gateway with an empty registry
    pub fn new(quizzes: Arc<dyn QuizLookup>, options: GameConfig) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::default()),
            quizzes,
            options,
        }
    }

    /// The room registry
    pub fn registry(&self) -> &RoomRegistry<T> {
        &self.registry
    }

    /// Attaches a new connection
    ///
    /// On failure the client is sent an `error` event and its tunnel is
    /// closed before the error is returned.
    pub async fn connect(&self, handshake: &Handshake, tunnel: T) -> Result<Session> {
        match self.attach(handshake, tunnel.clone()).await {
            Ok(session) => Ok(session),
            Err(error) => {
                tracing::warn!(%error, "connection rejected");
                tunnel.send_message(&error.to_update());
                tunnel.close();
                Err(error)
            }
        }
    }

    async fn attach(&self, handshake: &Handshake, tunnel: T) -> Result<Session> {
        let Attachment {
            game_code,
            participant,
        } = handshake.parse()?;

        let quiz = match &participant {
            Participant::Host {
                quiz_id: Some(quiz_id),
                ..
            } => Some((quiz_id.clone(), self.lookup(quiz_id)?)),
            _ => None,
        };

        let options = self.options;
        let (room, created) = self
            .registry
            .get_or_create(game_code, || Room::new(game_code, options))
            .await;
        let connection = ConnectionId::new();

        let (result, discarded) = {
            let mut room_guard = room.lock().await;
            let result = match participant {
                Participant::Host { host_id, .. } => quiz
                    .map_or(Ok(()), |(quiz_id, quiz)| room_guard.bind_quiz(quiz_id, quiz))
                    .and_then(|()| room_guard.attach_host(connection, tunnel, host_id.as_deref()))
                    .map(|()| (Role::Host, None)),
                Participant::Player {
                    player_id,
                    player_name,
                } => room_guard
                    .join_player(connection, tunnel, player_id, &player_name)
                    .map(|player_id| (Role::Player, Some(player_id))),
            };
            // a room created for a rejected join must not outlive it
            let discarded = created && result.is_err() && room_guard.discard();
            if !discarded {
                room_guard.watch_for_host(self.scheduler(game_code, &room));
            }
            (result, discarded)
        };
        if discarded {
            self.registry.remove_if_same(game_code, &room).await;
            tracing::debug!(game_code = %game_code, "room discarded after rejected join");
        }

        match result {
            Ok((role, player_id)) => {
                tracing::info!(game_code = %game_code, %connection, ?role, created, "connection attached");
                Ok(Session {
                    connection,
                    game_code,
                    role,
                    player_id,
                })
            }
            Err(error) => {
                if error.is_internal() {
                    self.isolate(game_code, &room, &error).await;
                }
                Err(error)
            }
        }
    }

    fn lookup(&self, quiz_id: &QuizId) -> Result<Quiz> {
        let quiz = self
            .quizzes
            .find_quiz(quiz_id)
            .ok_or_else(|| Error::QuizNotFound(quiz_id.clone()))?;
        quiz.validate().map_err(|report| Error::InvalidParameter {
            name: "quizId",
            reason: format!("quiz content is invalid: {report}"),
        })?;
        Ok(quiz)
    }

    /// Handles an inbound text frame, reporting failures to the sender
    pub async fn receive(&self, session: &Session, text: &str) {
        if let Err(error) = self.handle(session, text).await {
            if error.is_internal() {
                if let Some(room) = self.registry.get(session.game_code).await {
                    self.isolate(session.game_code, &room, &error).await;
                }
            } else {
                tracing::warn!(
                    game_code = %session.game_code,
                    connection = %session.connection,
                    %error,
                    "request rejected"
                );
                self.unicast(session, &error.to_update()).await;
            }
        }
    }

    /// Decodes and applies an inbound text frame
    pub async fn handle(&self, session: &Session, text: &str) -> Result<()> {
        let message = IncomingMessage::parse(text)?;
        let game_code = session.game_code;
        let connection = session.connection;
        let room = self
            .registry
            .get(game_code)
            .await
            .ok_or(Error::RoomNotFound(game_code))?;
        let schedule = self.scheduler(game_code, &room);

        let record = {
            let mut room = room.lock().await;
            match message {
                IncomingMessage::StartGame => room.start_game(connection, schedule)?,
                IncomingMessage::NextQuestion(NextQuestion { question_index }) => {
                    room.next_question(connection, question_index, schedule)?;
                }
                IncomingMessage::SubmitAnswer(answer) => {
                    let submission = answer.into_submission(game_code)?;
                    room.submit_answer(connection, &submission)?;
                }
                IncomingMessage::ShowLeaderboard => room.show_leaderboard(connection)?,
                IncomingMessage::SkipQuestion => room.skip_question(connection)?,
                IncomingMessage::GameEnded => room.end_game(connection, schedule)?,
            }
            room.take_record()
        };

        if let Some(record) = record {
            self.quizzes.record_results(&record);
        }
        Ok(())
    }

    /// Detaches a connection that closed
    pub async fn disconnect(&self, session: &Session) {
        let Some(room) = self.registry.get(session.game_code).await else {
            return;
        };
        let schedule = self.scheduler(session.game_code, &room);
        let result = room.lock().await.detach(session.connection, schedule);
        if let Err(error) = result {
            self.isolate(session.game_code, &room, &error).await;
        }
    }

    /// Creates a room for a quiz under a fresh code
    ///
    /// # Arguments
    ///
    /// * `quiz_id` - The quiz to run
    /// * `host_id` - The only host identity the room will accept, if any
    ///
    /// # Errors
    ///
    /// `Error::QuizNotFound` if the quiz lookup does not know the quiz
    pub async fn start_quiz(&self, quiz_id: QuizId, host_id: Option<String>) -> Result<GameCode> {
        let quiz = self.lookup(&quiz_id)?;
        let options = self.options;
        let (game_code, room) = self
            .registry
            .create_unique(|code| Room::with_quiz(code, quiz_id, quiz, host_id, options))
            .await;
        room.lock()
            .await
            .watch_for_host(self.scheduler(game_code, &room));
        Ok(game_code)
    }

    /// Number of live rooms
    pub async fn active_games(&self) -> usize {
        self.registry.len().await
    }

    /// Listing of every live room, sorted by code
    pub async fn summaries(&self) -> Vec<RoomSummary> {
        let mut summaries = Vec::new();
        for (_, room) in self.registry.rooms().await {
            summaries.push(room.lock().await.summary());
        }
        summaries
            .into_iter()
            .sorted_by_key(|summary| summary.code)
            .collect_vec()
    }

    /// Sends a message to one attached connection
    pub async fn unicast(&self, session: &Session, message: &UpdateMessage) -> bool {
        match self.registry.get(session.game_code).await {
            Some(room) => room.lock().await.unicast(session.connection, message),
            None => false,
        }
    }

    /// Closes every room
    pub async fn shutdown(&self) {
        for (game_code, room) in self.registry.rooms().await {
            self.close_room(game_code, &room, CloseReason::Shutdown).await;
        }
    }

    /// Builds the schedule function handed to room operations
    fn scheduler(
        &self,
        game_code: GameCode,
        room: &SharedRoom<T>,
    ) -> impl FnMut(AlarmMessage, Duration) -> Option<AbortHandle> + use<T> {
        let gateway = self.clone();
        let room: Weak<Mutex<Room<T>>> = Arc::downgrade(room);
        move |alarm, after| {
            let gateway = gateway.clone();
            let room = room.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if let Some(room) = room.upgrade() {
                    gateway.deliver_alarm(game_code, room, alarm).await;
                }
            });
            Some(task.abort_handle())
        }
    }

    /// Delivers a fired alarm to its room
    pub fn deliver_alarm(
        &self,
        game_code: GameCode,
        room: SharedRoom<T>,
        alarm: AlarmMessage,
    ) -> BoxFuture<'static, ()> {
        let gateway = self.clone();
        async move {
            let outcome = room.lock().await.receive_alarm(alarm);
            match outcome {
                Ok(AlarmOutcome::Continue) => {}
                Ok(AlarmOutcome::Close(reason)) => {
                    gateway.close_room(game_code, &room, reason).await;
                }
                Err(error) => gateway.isolate(game_code, &room, &error).await,
            }
        }
        .boxed()
    }

    async fn close_room(&self, game_code: GameCode, room: &SharedRoom<T>, reason: CloseReason) {
        room.lock().await.close(reason);
        self.registry.remove_if_same(game_code, room).await;
    }

    async fn isolate(&self, game_code: GameCode, room: &SharedRoom<T>, error: &Error) {
        tracing::error!(game_code = %game_code, %error, "room state corrupted, closing room");
        self.close_room(game_code, room, CloseReason::Internal).await;
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{
        collaborator::InMemoryQuizStore, error::ErrorKind, quiz::tests::two_question_quiz,
        scheduler::Status, session::mock::MockTunnel,
    };

    fn gateway() -> (Gateway<MockTunnel>, Arc<InMemoryQuizStore>) {
        let store = Arc::new(InMemoryQuizStore::default());
        store
            .insert(QuizId::from("quiz-1"), two_question_quiz())
            .unwrap();
        (Gateway::new(store.clone(), GameConfig::default()), store)
    }

    fn host_handshake(code: &str) -> Handshake {
        Handshake {
            game_code: Some(code.to_string()),
            role: Some("host".to_string()),
            quiz_id: Some("quiz-1".to_string()),
            ..Handshake::default()
        }
    }

    fn player_handshake(code: &str, id: &str, name: &str) -> Handshake {
        Handshake {
            game_code: Some(code.to_string()),
            role: Some("player".to_string()),
            player_id: Some(id.to_string()),
            player_name: Some(name.to_string()),
            ..Handshake::default()
        }
    }

    async fn connect(
        gateway: &Gateway<MockTunnel>,
        handshake: Handshake,
    ) -> (Session, MockTunnel) {
        let tunnel = MockTunnel::default();
        let session = gateway.connect(&handshake, tunnel.clone()).await.unwrap();
        (session, tunnel)
    }

    fn last_error(tunnel: &MockTunnel) -> Option<ErrorKind> {
        tunnel.messages().into_iter().rev().find_map(|m| match m {
            UpdateMessage::Error { kind, .. } => Some(kind),
            _ => None,
        })
    }

    #[test]
    fn test_handshake_requires_game_code_and_role() {
        assert_eq!(
            Handshake::default().parse(),
            Err(Error::MissingParameter("gameCode"))
        );

        let handshake = Handshake {
            game_code: Some("abc123".to_string()),
            ..Handshake::default()
        };
        assert_eq!(handshake.parse(), Err(Error::MissingParameter("role")));

        let handshake = Handshake {
            game_code: Some("abc123".to_string()),
            role: Some("spectator".to_string()),
            ..Handshake::default()
        };
        assert_eq!(handshake.parse().unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_handshake_uppercases_code() {
        let attachment = player_handshake("abc123", "p1", "Alice").parse().unwrap();

        assert_eq!(attachment.game_code.as_str(), "ABC123");
        assert_eq!(
            attachment.participant,
            Participant::Player {
                player_id: Some(PlayerId::parse("p1").unwrap()),
                player_name: "Alice".to_string(),
            }
        );
    }

    #[test]
    fn test_player_handshake_requires_name() {
        let handshake = Handshake {
            player_name: None,
            ..player_handshake("ABC123", "p1", "")
        };
        assert_eq!(handshake.parse(), Err(Error::MissingParameter("playerName")));
    }

    #[test]
    fn test_parse_incoming_messages() {
        assert_eq!(
            IncomingMessage::parse(r#"{"event":"startGame"}"#),
            Ok(IncomingMessage::StartGame)
        );
        assert_eq!(
            IncomingMessage::parse(r#"{"event":"nextQuestion","data":{"questionIndex":1}}"#),
            Ok(IncomingMessage::NextQuestion(NextQuestion {
                question_index: Some(1)
            }))
        );
        assert_eq!(
            IncomingMessage::parse(r#"{"event":"showLeaderboard","data":{"players":[]}}"#),
            Ok(IncomingMessage::ShowLeaderboard)
        );

        let Ok(IncomingMessage::SubmitAnswer(answer)) = IncomingMessage::parse(
            r#"{"event":"submitAnswer","data":{"questionIndex":0,"selectedAnswer":-1,"timeLeft":12.5}}"#,
        ) else {
            panic!("answer not parsed");
        };
        let submission = answer.into_submission("ABC123".parse().unwrap()).unwrap();
        assert_eq!(submission.selected, None);
        assert_eq!(submission.time_remaining, Duration::from_millis(12_500));
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert_eq!(
            IncomingMessage::parse(r#"{"event":"dance"}"#),
            Err(Error::UnknownEvent("dance".to_string()))
        );
        assert!(matches!(
            IncomingMessage::parse("not json"),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            IncomingMessage::parse(r#"{"event":"submitAnswer","data":{"selectedAnswer":1}}"#),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_submission_for_other_game_is_rejected() {
        let answer = AnswerSubmission {
            game_code: Some("ZZZ999".to_string()),
            player_id: None,
            question_index: 0,
            selected_answer: Some(1),
            time_left: 10.0,
        };
        assert_eq!(
            answer
                .into_submission("ABC123".parse().unwrap())
                .unwrap_err()
                .kind(),
            ErrorKind::Protocol
        );
    }

    #[tokio::test]
    async fn test_connect_creates_room_lazily() {
        let (gateway, _) = gateway();

        let (host, _) = connect(&gateway, host_handshake("abc123")).await;

        assert_eq!(host.role, Role::Host);
        assert_eq!(gateway.active_games().await, 1);
        let room = gateway.registry().get(host.game_code).await.unwrap();
        assert_eq!(room.lock().await.question_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_quiz_is_not_found() {
        let (gateway, _) = gateway();
        let tunnel = MockTunnel::default();
        let handshake = Handshake {
            quiz_id: Some("missing".to_string()),
            ..host_handshake("ABC123")
        };

        let error = gateway.connect(&handshake, tunnel.clone()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(last_error(&tunnel), Some(ErrorKind::NotFound));
        assert!(tunnel.is_closed());
    }

    #[tokio::test]
    async fn test_name_conflict_closes_connection() {
        let (gateway, _) = gateway();
        connect(&gateway, host_handshake("ABC123")).await;
        connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        let tunnel = MockTunnel::default();
        let result = gateway
            .connect(&player_handshake("ABC123", "p2", "Alice"), tunnel.clone())
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(last_error(&tunnel), Some(ErrorKind::Conflict));
        assert!(tunnel.is_closed());
        let room = gateway.registry().get("ABC123".parse().unwrap()).await.unwrap();
        assert_eq!(room.lock().await.players().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_join_leaves_no_room() {
        let (gateway, _) = gateway();
        let long_name = "x".repeat(64);

        let tunnel = MockTunnel::default();
        let result = gateway
            .connect(&player_handshake("QQQ111", "p1", &long_name), tunnel.clone())
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Protocol);
        assert!(tunnel.is_closed());
        assert_eq!(gateway.active_games().await, 0);

        connect(&gateway, player_handshake("QQQ111", "p1", "Alice")).await;
        assert_eq!(gateway.active_games().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_join_keeps_existing_room() {
        let (gateway, _) = gateway();
        connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        let result = gateway
            .connect(&player_handshake("ABC123", "p2", "Alice"), MockTunnel::default())
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(gateway.active_games().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_event_reports_protocol_error() {
        let (gateway, _) = gateway();
        let (host, tunnel) = connect(&gateway, host_handshake("ABC123")).await;

        gateway.receive(&host, r#"{"event":"dance"}"#).await;

        assert_eq!(last_error(&tunnel), Some(ErrorKind::Protocol));
        assert!(!tunnel.is_closed());
    }

    #[tokio::test]
    async fn test_player_cannot_drive_room() {
        let (gateway, _) = gateway();
        connect(&gateway, host_handshake("ABC123")).await;
        let (alice, tunnel) = connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        gateway.receive(&alice, r#"{"event":"startGame"}"#).await;

        assert_eq!(last_error(&tunnel), Some(ErrorKind::Authorization));
        let room = gateway.registry().get(alice.game_code).await.unwrap();
        assert_eq!(room.lock().await.status(), Status::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_reveals_question() {
        let (gateway, _) = gateway();
        let (host, _) = connect(&gateway, host_handshake("ABC123")).await;
        let (_, alice) = connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        gateway.receive(&host, r#"{"event":"startGame"}"#).await;
        assert_eq!(alice.count("questionStart"), 1);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(alice.count("leaderboardUpdate"), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(alice.count("leaderboardUpdate"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_cancels_countdown() {
        let (gateway, _) = gateway();
        let (host, _) = connect(&gateway, host_handshake("ABC123")).await;
        let (_, alice) = connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        gateway.receive(&host, r#"{"event":"startGame"}"#).await;
        gateway.receive(&host, r#"{"event":"skipQuestion"}"#).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(alice.count("leaderboardUpdate"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_absence_closes_room() {
        let (gateway, _) = gateway();
        let (host, _) = connect(&gateway, host_handshake("ABC123")).await;
        let (_, alice) = connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        gateway.disconnect(&host).await;
        assert_eq!(alice.count("hostDisconnected"), 1);

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(gateway.active_games().await, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(gateway.active_games().await, 0);
        assert_eq!(alice.count("roomClosed"), 1);
        assert!(alice.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_returning_host_keeps_room() {
        let (gateway, _) = gateway();
        let (host, _) = connect(&gateway, host_handshake("ABC123")).await;
        let (_, alice) = connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        gateway.disconnect(&host).await;
        tokio::time::sleep(Duration::from_secs(300)).await;
        connect(&gateway, host_handshake("ABC123")).await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(gateway.active_games().await, 1);
        assert_eq!(alice.count("hostReconnected"), 1);
        assert!(!alice.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_without_host_expires() {
        let (gateway, _) = gateway();
        connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        tokio::time::sleep(Duration::from_secs(601)).await;

        assert_eq!(gateway.active_games().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_quiz_binds_host_identity() {
        let (gateway, _) = gateway();
        let code = gateway
            .start_quiz(QuizId::from("quiz-1"), Some("coach".to_string()))
            .await
            .unwrap();

        let intruder = Handshake {
            game_code: Some(code.to_string()),
            role: Some("host".to_string()),
            host_id: Some("someone".to_string()),
            ..Handshake::default()
        };
        let error = gateway
            .connect(&intruder, MockTunnel::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Authorization);

        let coach = Handshake {
            host_id: Some("coach".to_string()),
            ..intruder
        };
        assert!(gateway.connect(&coach, MockTunnel::default()).await.is_ok());

        assert_eq!(
            gateway
                .start_quiz(QuizId::from("nope"), None)
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_game_is_recorded_and_torn_down() {
        let (gateway, store) = gateway();
        let (host, _) = connect(&gateway, host_handshake("ABC123")).await;
        let (alice, alice_tunnel) =
            connect(&gateway, player_handshake("ABC123", "p1", "Alice")).await;

        gateway.receive(&host, r#"{"event":"startGame"}"#).await;
        gateway
            .receive(
                &alice,
                r#"{"event":"submitAnswer","data":{"questionIndex":0,"selectedAnswer":1,"timeLeft":30}}"#,
            )
            .await;
        gateway.receive(&host, r#"{"event":"showLeaderboard"}"#).await;
        gateway
            .receive(&host, r#"{"event":"nextQuestion","data":{"questionIndex":1}}"#)
            .await;
        gateway.receive(&host, r#"{"event":"skipQuestion"}"#).await;
        gateway.receive(&host, r#"{"event":"gameEnded"}"#).await;

        assert_eq!(alice_tunnel.count("gameFinished"), 1);
        let results = store.take_results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].players[0].score, 1000);

        let summaries = gateway.summaries().await;
        assert_eq!(summaries[0].status, Status::Finished);
        assert_eq!(summaries[0].current_question, 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(gateway.active_games().await, 0);
        assert!(alice_tunnel.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (gateway, _) = gateway();
        let (_, host) = connect(&gateway, host_handshake("ABC123")).await;
        let (_, alice) = connect(&gateway, player_handshake("XYZ789", "p1", "Alice")).await;

        gateway.shutdown().await;

        assert_eq!(gateway.active_games().await, 0);
        assert!(host.is_closed());
        assert!(alice.is_closed());
    }
}
