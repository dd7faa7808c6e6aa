//! Room state and behavior
//!
//! A [`Room`] is one game's authoritative state: who hosts it, who plays in
//! it, which quiz it runs and where in that quiz it is. All of its methods
//! are synchronous and are called with the room's lock held, so a join, an
//! answer and a host action on the same room never interleave. Every
//! mutation is announced through the room's broadcaster before the method
//! returns.
//!
//! Methods that may need to start a timer take a `schedule` function. It is
//! handed the alarm to deliver later together with its delay, and returns
//! an abort handle for the task it spawned (or `None` when nothing was
//! spawned, as in most tests).

use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use uuid::Uuid;
use web_time::{Instant, SystemTime};

use crate::{
    AlarmMessage, CloseReason, SyncMessage, UpdateMessage,
    broadcaster::{Broadcaster, ConnectionId, Role},
    collaborator::{GameRecord, PlayerRecord, QuizId},
    config::GameConfig,
    constants::player::MAX_ID_LENGTH,
    error::{Error, Result},
    game_code::GameCode,
    leaderboard::{self, QuestionStats},
    names::Names,
    quiz::{Question, QuestionView, Quiz},
    scheduler::{Phase, Scheduler, Status, Step, TimerKind, Timers},
    scoring::{self, AnswerRecord, ScoreReceipt},
    session::Tunnel,
};

/// An opaque token identifying a player across reconnects
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Creates a fresh random player id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts a client supplied player id
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParameter` if the trimmed id is empty or longer
    /// than 64 bytes.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let reason = if raw.is_empty() {
            "cannot be empty"
        } else if raw.len() > MAX_ID_LENGTH {
            "is too long"
        } else {
            return Ok(Self(raw.to_owned()));
        };
        Err(Error::InvalidParameter {
            name: "playerId",
            reason: reason.to_owned(),
        })
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A participant answering questions
#[derive(Debug, Clone)]
pub struct Player {
    /// Stable identity across reconnects
    pub player_id: PlayerId,
    /// Display name, unique within the room
    pub player_name: String,
    /// Cumulative score
    pub score: u64,
    /// The live connection, `None` while disconnected
    pub connection: Option<ConnectionId>,
    /// One record per answered question, in answer order
    pub answers: Vec<AnswerRecord>,
    /// When the player first joined
    pub joined_at: SystemTime,
}

impl Player {
    /// Creates a player with no score and no answers
    pub fn new(player_id: PlayerId, player_name: String, connection: Option<ConnectionId>) -> Self {
        Self {
            player_id,
            player_name,
            score: 0,
            connection,
            answers: Vec::new(),
            joined_at: SystemTime::now(),
        }
    }

    /// Whether the player currently has a live connection
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The player's answer to a question, if any
    pub fn answer_for(&self, question_index: usize) -> Option<&AnswerRecord> {
        self.answers
            .iter()
            .find(|record| record.question_index == question_index)
    }

    /// Whether the player answered a question
    pub fn has_answered(&self, question_index: usize) -> bool {
        self.answer_for(question_index).is_some()
    }

    /// The public view of this player
    pub fn view(&self) -> PlayerView {
        PlayerView {
            player_id: self.player_id.clone(),
            player_name: self.player_name.clone(),
            score: self.score,
            connected: self.is_connected(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_score(mut self, score: u64) -> Self {
        self.score = score;
        self
    }
}

/// A roster entry as sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// The player's id
    pub player_id: PlayerId,
    /// The player's display name
    pub player_name: String,
    /// The player's cumulative score
    pub score: u64,
    /// Whether the player is connected
    pub connected: bool,
}

/// A room as listed by the games endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    /// The room's code
    pub code: GameCode,
    /// Number of players on the roster
    pub player_count: usize,
    /// Lifecycle of the room
    pub status: Status,
    /// Most recently presented question, `-1` before the start
    pub current_question: i64,
    /// Whether a host is attached
    pub host_connected: bool,
}

/// An answer as submitted by a player
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// The player the client claims to be, checked against the connection
    pub player_id: Option<PlayerId>,
    /// The question the client is answering
    pub question_index: usize,
    /// The chosen option, `None` for a timeout
    pub selected: Option<usize>,
    /// Remaining time reported by the client
    pub time_remaining: Duration,
}

/// What a fired alarm means for the room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmOutcome {
    /// The room carries on
    Continue,
    /// The room must be closed and removed
    Close(CloseReason),
}

/// A single game session
pub struct Room<T> {
    /// The room's code, fixed for its lifetime
    game_code: GameCode,
    /// The quiz being played and the id it was looked up by
    quiz: Option<(QuizId, Quiz)>,
    /// Identity a host must present, when bound by "start quiz"
    host_identity: Option<String>,
    /// The connection currently acting as host
    host: Option<ConnectionId>,
    /// Whether a host has ever attached
    host_seen: bool,
    /// Players in join order
    players: Vec<Player>,
    /// Name assignments and validation for players
    names: Names,
    /// Phase and timers
    scheduler: Scheduler,
    /// Every attached connection
    broadcaster: Broadcaster<T>,
    /// Timing and capacity options
    options: GameConfig,
    /// When the open question started collecting answers
    question_opened: Option<Instant>,
    /// Result of the finished game, until the gateway hands it on
    finished_record: Option<GameRecord>,
    /// Set once the room has been closed
    closed: bool,
}

impl<T: Tunnel> Room<T> {
    /// Creates an empty room without a quiz
    ///
    /// This is what a connection referencing an unknown code gets; the host
    /// binds a quiz when it attaches.
    pub fn new(game_code: GameCode, options: GameConfig) -> Self {
        Self {
            game_code,
            quiz: None,
            host_identity: None,
            host: None,
            host_seen: false,
            players: Vec::new(),
            names: Names::default(),
            scheduler: Scheduler::default(),
            broadcaster: Broadcaster::default(),
            options,
            question_opened: None,
            finished_record: None,
            closed: false,
        }
    }

    /// Creates a room bound to a quiz and, optionally, a host identity
    pub fn with_quiz(
        game_code: GameCode,
        quiz_id: QuizId,
        quiz: Quiz,
        host_identity: Option<String>,
        options: GameConfig,
    ) -> Self {
        Self {
            quiz: Some((quiz_id, quiz)),
            host_identity,
            ..Self::new(game_code, options)
        }
    }

    /// The room's code
    pub fn game_code(&self) -> GameCode {
        self.game_code
    }

    /// The current phase
    pub fn phase(&self) -> Phase {
        self.scheduler.phase()
    }

    /// The current status
    pub fn status(&self) -> Status {
        self.scheduler.status()
    }

    /// Index of the most recently presented question
    pub fn current_question_index(&self) -> Option<usize> {
        self.scheduler.current_question()
    }

    /// The room's timers
    pub fn timers(&self) -> &Timers {
        self.scheduler.timers()
    }

    /// Players in join order
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Looks up a player by id
    pub fn player(&self, player_id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.player_id == *player_id)
    }

    /// The connection currently acting as host
    pub fn host(&self) -> Option<ConnectionId> {
        self.host
    }

    /// The id of the bound quiz
    pub fn quiz_id(&self) -> Option<&QuizId> {
        self.quiz.as_ref().map(|(id, _)| id)
    }

    /// Number of questions in the bound quiz
    pub fn question_count(&self) -> usize {
        self.quiz.as_ref().map_or(0, |(_, quiz)| quiz.len())
    }

    /// Whether the room has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The full roster
    pub fn roster(&self) -> Vec<PlayerView> {
        self.players.iter().map(Player::view).collect_vec()
    }

    /// A listing entry for this room
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            code: self.game_code,
            player_count: self.players.len(),
            status: self.status(),
            current_question: self.wire_question_index(),
            host_connected: self.host.is_some(),
        }
    }

    /// Sends a message to every attached connection
    pub fn broadcast(&self, message: &UpdateMessage) {
        self.broadcaster.broadcast(message);
    }

    /// Sends a message to one attached connection
    pub fn unicast(&self, connection: ConnectionId, message: &UpdateMessage) -> bool {
        self.broadcaster.unicast(connection, message)
    }

    /// Hands out the record of a finished game, once
    pub fn take_record(&mut self) -> Option<GameRecord> {
        self.finished_record.take()
    }

    /// Binds a quiz to a room that has none yet
    ///
    /// # Errors
    ///
    /// * `Error::QuizMismatch` - A different quiz is already bound
    /// * `Error::InvalidState` - The game is already past the lobby
    pub fn bind_quiz(&mut self, quiz_id: QuizId, quiz: Quiz) -> Result<()> {
        match &self.quiz {
            Some((bound, _)) if *bound == quiz_id => Ok(()),
            Some(_) => Err(Error::QuizMismatch),
            None if self.status() != Status::Waiting => Err(Error::InvalidState {
                action: "bind a quiz",
                phase: self.phase(),
            }),
            None => {
                tracing::info!(game_code = %self.game_code, quiz_id = %quiz_id, "quiz bound");
                self.quiz = Some((quiz_id, quiz));
                Ok(())
            }
        }
    }

    /// Attaches a connection as the room's host
    ///
    /// A previous host connection, if still attached, is told it has been
    /// replaced and closed. If the host had been gone, everyone is told it
    /// is back.
    ///
    /// # Arguments
    ///
    /// * `connection` - The new host connection
    /// * `tunnel` - Its outbound half
    /// * `identity` - The `hostId` from the handshake
    ///
    /// # Errors
    ///
    /// `Error::HostMismatch` if the room is bound to a different host identity
    pub fn attach_host(
        &mut self,
        connection: ConnectionId,
        tunnel: T,
        identity: Option<&str>,
    ) -> Result<()> {
        self.ensure_open()?;
        if let Some(bound) = &self.host_identity {
            if identity != Some(bound.as_str()) {
                return Err(Error::HostMismatch);
            }
        }

        let returning = self.host_seen && self.host.is_none();
        if let Some(previous) = self.host.replace(connection) {
            self.broadcaster.close(
                previous,
                Some(&UpdateMessage::RoomClosed {
                    reason: CloseReason::Replaced,
                }),
            );
        }
        self.host_seen = true;
        self.scheduler.timers_mut().cancel(TimerKind::HostAbsence);
        self.broadcaster.subscribe(connection, Role::Host, tunnel);

        tracing::info!(game_code = %self.game_code, %connection, returning, "host attached");
        if returning {
            self.broadcaster.broadcast(&UpdateMessage::HostReconnected);
        }
        self.sync(connection)
    }

    /// Attaches a connection as a player
    ///
    /// A known `player_id` reconnects that player: their score and answers
    /// are kept, nobody is told about a join, and any connection they still
    /// had is closed. Otherwise a new player is added to the roster.
    ///
    /// # Arguments
    ///
    /// * `connection` - The player's connection
    /// * `tunnel` - Its outbound half
    /// * `player_id` - The id the client presented, if any
    /// * `player_name` - The requested display name (ignored on reconnect)
    ///
    /// # Returns
    ///
    /// The player's id, generated if the client did not present one
    ///
    /// # Errors
    ///
    /// * `Error::GameFinished` - New players cannot join a finished game
    /// * `Error::RoomFull` - The room is at capacity
    /// * `Error::Name` - The name was rejected, e.g. already taken
    pub fn join_player(
        &mut self,
        connection: ConnectionId,
        tunnel: T,
        player_id: Option<PlayerId>,
        player_name: &str,
    ) -> Result<PlayerId> {
        self.ensure_open()?;
        if let Some(index) = player_id
            .as_ref()
            .and_then(|id| self.players.iter().position(|p| p.player_id == *id))
        {
            return self.reconnect(index, connection, tunnel);
        }

        if self.status() == Status::Finished {
            return Err(Error::GameFinished);
        }
        if self.players.len() >= self.options.max_players {
            return Err(Error::RoomFull);
        }

        let player_id = player_id.unwrap_or_else(PlayerId::generate);
        let player_name = self.names.set_name(&player_id, player_name)?;

        self.players.push(Player::new(
            player_id.clone(),
            player_name.clone(),
            Some(connection),
        ));
        self.broadcaster.subscribe(connection, Role::Player, tunnel);

        tracing::info!(
            game_code = %self.game_code,
            %connection,
            player_id = %player_id,
            player_name = %player_name,
            "player joined"
        );

        self.broadcaster.unicast(
            connection,
            &UpdateMessage::IdAssign {
                player_id: player_id.clone(),
            },
        );
        self.broadcaster.broadcast(&UpdateMessage::PlayerJoined {
            player_name,
            players: self.roster(),
        });
        self.sync(connection)?;

        Ok(player_id)
    }

    fn reconnect(&mut self, index: usize, connection: ConnectionId, tunnel: T) -> Result<PlayerId> {
        let previous = self.players[index].connection.replace(connection);
        if let Some(previous) = previous.filter(|previous| *previous != connection) {
            self.broadcaster.close(
                previous,
                Some(&UpdateMessage::RoomClosed {
                    reason: CloseReason::Replaced,
                }),
            );
        }
        self.broadcaster.subscribe(connection, Role::Player, tunnel);

        let player_id = self.players[index].player_id.clone();
        tracing::info!(
            game_code = %self.game_code,
            %connection,
            player_id = %player_id,
            "player reconnected"
        );
        self.sync(connection)?;
        Ok(player_id)
    }

    /// Detaches a connection that went away
    ///
    /// A departing host leaves the room hostless and starts the host-absence
    /// timer. A departing player is dropped from the roster while the room
    /// is still waiting; afterwards their record stays so a reconnect keeps
    /// their score.
    ///
    /// # Returns
    ///
    /// The role the connection had, or `None` if it was not attached
    pub fn detach<S>(&mut self, connection: ConnectionId, schedule: S) -> Result<Option<Role>>
    where
        S: FnOnce(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        if self.host == Some(connection) {
            self.host = None;
            self.broadcaster.unsubscribe(connection);
            tracing::info!(game_code = %self.game_code, %connection, "host disconnected");
            if !self.closed && self.status() != Status::Finished {
                self.broadcaster.broadcast(&UpdateMessage::HostDisconnected);
                self.watch_for_host(schedule);
            }
            return Ok(Some(Role::Host));
        }

        self.broadcaster.unsubscribe(connection);
        let Some(index) = self
            .players
            .iter()
            .position(|p| p.connection == Some(connection))
        else {
            return Ok(None);
        };

        let player_name = if self.status() == Status::Waiting {
            let player = self.players.remove(index);
            self.names.remove(&player.player_id);
            player.player_name
        } else {
            let player = &mut self.players[index];
            player.connection = None;
            player.player_name.clone()
        };

        tracing::info!(game_code = %self.game_code, %connection, player_name = %player_name, "player left");
        self.broadcaster.broadcast(&UpdateMessage::PlayerLeft {
            player_name,
            players: self.roster(),
        });

        if let Phase::Collecting(index) = self.phase() {
            self.reveal_if_complete(index)?;
        }

        Ok(Some(Role::Player))
    }

    /// Arms the host-absence timer if the room has no host and no timer
    pub fn watch_for_host<S>(&mut self, schedule: S)
    where
        S: FnOnce(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        if self.host.is_some()
            || self.closed
            || self.status() == Status::Finished
            || self.timers().is_armed(TimerKind::HostAbsence)
        {
            return;
        }
        let grace = self.options.host_grace;
        self.scheduler.timers_mut().arm(
            TimerKind::HostAbsence,
            grace,
            |epoch| AlarmMessage::HostAbsent { epoch },
            schedule,
        );
    }

    /// Starts the game with the first question
    ///
    /// # Errors
    ///
    /// * `Error::NotHost` - The connection is not the host
    /// * `Error::NeedPlayers` / `Error::NoQuiz` - Nothing to play yet
    /// * `Error::InvalidState` - The game already started
    pub fn start_game<S>(&mut self, connection: ConnectionId, schedule: S) -> Result<()>
    where
        S: FnMut(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        self.authorize(connection, "start the game")?;
        match self
            .scheduler
            .request_start(self.players.len(), self.question_count())?
        {
            Step::Present(index) => {
                let total_questions = self.question_count();
                tracing::info!(game_code = %self.game_code, players = self.players.len(), "game started");
                self.broadcaster
                    .broadcast(&UpdateMessage::GameStarted { total_questions });
                self.present(index, schedule)
            }
            step => {
                tracing::debug!(game_code = %self.game_code, ?step, "start request ignored");
                Ok(())
            }
        }
    }

    /// Moves from a revealed question to the next one, or ends the game
    /// after the last
    ///
    /// # Arguments
    ///
    /// * `connection` - The requesting connection
    /// * `requested` - The index the host expects to present; a stale index
    ///   makes this a no-op
    /// * `schedule` - Function to schedule the question's countdown
    pub fn next_question<S>(
        &mut self,
        connection: ConnectionId,
        requested: Option<usize>,
        schedule: S,
    ) -> Result<()>
    where
        S: FnMut(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        self.authorize(connection, "advance to the next question")?;
        match self
            .scheduler
            .request_next(requested, self.question_count())?
        {
            Step::Present(index) => self.present(index, schedule),
            Step::Finish => self.finish(schedule),
            step => {
                tracing::debug!(game_code = %self.game_code, ?step, ?requested, phase = %self.phase(), "next question ignored");
                Ok(())
            }
        }
    }

    /// Ends the game once the last question has been revealed
    pub fn end_game<S>(&mut self, connection: ConnectionId, schedule: S) -> Result<()>
    where
        S: FnMut(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        self.authorize(connection, "end the game")?;
        match self.scheduler.request_end(self.question_count())? {
            Step::Finish => self.finish(schedule),
            step => {
                tracing::debug!(game_code = %self.game_code, ?step, "end request ignored");
                Ok(())
            }
        }
    }

    /// Reveals the open question once every expected player has answered
    ///
    /// # Errors
    ///
    /// `Error::AnswersPending` while answers are still outstanding
    pub fn show_leaderboard(&mut self, connection: ConnectionId) -> Result<()> {
        self.authorize(connection, "show the leaderboard")?;
        self.request_reveal(false)
    }

    /// Reveals the open question regardless of outstanding answers
    pub fn skip_question(&mut self, connection: ConnectionId) -> Result<()> {
        self.authorize(connection, "skip the question")?;
        self.request_reveal(true)
    }

    fn request_reveal(&mut self, force: bool) -> Result<()> {
        let (answered, expected) = self.answer_progress();
        match self.scheduler.request_reveal(force, answered, expected)? {
            Step::Reveal(_) => self.reveal(),
            step => {
                tracing::debug!(game_code = %self.game_code, ?step, force, "reveal request ignored");
                Ok(())
            }
        }
    }

    /// Scores a player's answer to the open question
    ///
    /// The client's remaining time is clamped to what the server measured
    /// since the question opened.
    ///
    /// # Returns
    ///
    /// The receipt also sent to the submitter as `answerResult`
    ///
    /// # Errors
    ///
    /// * `Error::NotAPlayer` / `Error::ForeignPlayer` - Wrong submitter
    /// * `Error::InvalidState` / `Error::GameFinished` - No question is open
    /// * `Error::StaleQuestion` - The answer targets another question
    /// * `Error::AlreadyAnswered` - Only the first answer counts
    /// * `Error::OptionOutOfRange` - The option does not exist
    pub fn submit_answer(
        &mut self,
        connection: ConnectionId,
        submission: &Submission,
    ) -> Result<ScoreReceipt> {
        self.ensure_open()?;
        let index = self
            .players
            .iter()
            .position(|p| p.connection == Some(connection))
            .ok_or(Error::NotAPlayer)?;
        if let Some(claimed) = &submission.player_id {
            if *claimed != self.players[index].player_id {
                return Err(Error::ForeignPlayer);
            }
        }

        let open = match self.phase() {
            Phase::Collecting(open) => open,
            Phase::Finished => return Err(Error::GameFinished),
            phase => {
                return Err(Error::InvalidState {
                    action: "accept answers",
                    phase,
                });
            }
        };
        if submission.question_index != open {
            return Err(Error::StaleQuestion {
                submitted: submission.question_index,
                current: open,
            });
        }
        if self.players[index].has_answered(open) {
            return Err(Error::AlreadyAnswered(open));
        }

        let (correct, points_earned, time_remaining) = {
            let question = self.question(open)?;
            if let Some(option) = submission.selected {
                if !question.has_option(option) {
                    return Err(Error::OptionOutOfRange {
                        option,
                        count: question.options.len(),
                    });
                }
            }
            let elapsed = self
                .question_opened
                .map_or(Duration::ZERO, |opened| opened.elapsed());
            let remaining = scoring::effective_remaining(
                question.time_limit,
                submission.time_remaining,
                elapsed,
            );
            let (correct, points) = scoring::evaluate(question, submission.selected, remaining);
            (correct, points, remaining)
        };

        let player = &mut self.players[index];
        player.answers.push(AnswerRecord {
            question_index: open,
            selected: submission.selected,
            correct,
            time_remaining,
            points_earned,
        });
        player.score += points_earned;
        let receipt = ScoreReceipt {
            question_index: open,
            correct,
            points_earned,
            total_score: player.score,
        };
        let player_id = player.player_id.clone();

        tracing::info!(
            game_code = %self.game_code,
            player_id = %player_id,
            question_index = open,
            correct,
            points_earned,
            "answer scored"
        );

        self.broadcaster
            .unicast(connection, &UpdateMessage::AnswerResult(receipt));
        let (answered, total) = self.answer_progress();
        self.broadcaster.broadcast(&UpdateMessage::AnswerReceived {
            player_id,
            answered,
            total,
            players: self.roster(),
        });

        self.reveal_if_complete(open)?;
        Ok(receipt)
    }

    /// Handles a fired timer
    ///
    /// Alarms whose timer was cancelled or replaced in the meantime are
    /// ignored.
    pub fn receive_alarm(&mut self, alarm: AlarmMessage) -> Result<AlarmOutcome> {
        if self.closed {
            return Ok(AlarmOutcome::Continue);
        }
        match alarm {
            AlarmMessage::CountdownExpired { index, epoch } => {
                match self.scheduler.countdown_expired(index, epoch) {
                    Step::Reveal(_) => {
                        tracing::info!(game_code = %self.game_code, question_index = index, "countdown expired");
                        self.reveal()?;
                    }
                    _ => {
                        tracing::debug!(game_code = %self.game_code, question_index = index, epoch, "stale countdown ignored");
                    }
                }
                Ok(AlarmOutcome::Continue)
            }
            AlarmMessage::HostAbsent { epoch } => {
                if self
                    .scheduler
                    .timers_mut()
                    .claim(TimerKind::HostAbsence, epoch)
                    && self.host.is_none()
                {
                    tracing::warn!(game_code = %self.game_code, "no host within grace period");
                    Ok(AlarmOutcome::Close(CloseReason::HostAbandoned))
                } else {
                    Ok(AlarmOutcome::Continue)
                }
            }
            AlarmMessage::Teardown { epoch } => {
                if self.scheduler.timers_mut().claim(TimerKind::Teardown, epoch) {
                    Ok(AlarmOutcome::Close(CloseReason::Finished))
                } else {
                    Ok(AlarmOutcome::Continue)
                }
            }
        }
    }

    /// Closes the room: cancels timers, says goodbye and closes every tunnel
    pub fn close(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.scheduler.timers_mut().cancel_all();
        self.broadcaster
            .broadcast(&UpdateMessage::RoomClosed { reason });
        self.broadcaster.close_all();
        self.host = None;
        for player in &mut self.players {
            player.connection = None;
        }
        tracing::info!(game_code = %self.game_code, ?reason, "room closed");
    }

    /// Closes a room nobody has joined, without notifying anyone
    ///
    /// # Returns
    ///
    /// `false`, leaving the room untouched, if any connection is attached
    /// or the roster is not empty
    pub fn discard(&mut self) -> bool {
        if self.closed || !self.broadcaster.is_empty() || !self.players.is_empty() {
            return false;
        }
        self.closed = true;
        self.scheduler.timers_mut().cancel_all();
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::RoomNotFound(self.game_code))
        } else {
            Ok(())
        }
    }

    fn authorize(&self, connection: ConnectionId, action: &'static str) -> Result<()> {
        self.ensure_open()?;
        if self.host == Some(connection) {
            Ok(())
        } else {
            tracing::warn!(game_code = %self.game_code, %connection, action, "host action from non-host");
            Err(Error::NotHost(action))
        }
    }

    fn question(&self, index: usize) -> Result<&Question> {
        self.quiz
            .as_ref()
            .and_then(|(_, quiz)| quiz.question(index))
            .ok_or_else(|| {
                Error::Corrupted(format!(
                    "question {index} is outside of a {} question quiz",
                    self.question_count()
                ))
            })
    }

    /// Answers received and expected for the question in play
    ///
    /// A player is expected to answer while connected; one who answered and
    /// then left still counts on both sides.
    fn answer_progress(&self) -> (usize, usize) {
        let Some(index) = self.phase().question_index() else {
            return (0, 0);
        };
        let answered = self.players.iter().filter(|p| p.has_answered(index)).count();
        let expected = self
            .players
            .iter()
            .filter(|p| p.is_connected() || p.has_answered(index))
            .count();
        (answered, expected)
    }

    fn reveal_if_complete(&mut self, index: usize) -> Result<()> {
        if !self.options.reveal_when_all_answered || self.phase() != Phase::Collecting(index) {
            return Ok(());
        }
        let (answered, expected) = self.answer_progress();
        if answered > 0 && answered >= expected {
            self.reveal()?;
        }
        Ok(())
    }

    fn present<S>(&mut self, index: usize, schedule: S) -> Result<()>
    where
        S: FnMut(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        self.scheduler.enter_presenting(index)?;
        let (question, time_limit) = {
            let question = self.question(index)?;
            (QuestionView::from(question), question.time_limit)
        };
        self.question_opened = Some(Instant::now());

        tracing::info!(game_code = %self.game_code, question_index = index, "question presented");
        self.broadcaster.broadcast(&UpdateMessage::QuestionStart {
            question_index: index,
            total_questions: self.question_count(),
            question,
        });
        self.scheduler.enter_collecting(time_limit, schedule)
    }

    fn reveal(&mut self) -> Result<()> {
        let index = self.scheduler.enter_revealing()?;
        let correct_answer = self.question(index)?.correct_answer;
        self.question_opened = None;

        tracing::info!(game_code = %self.game_code, question_index = index, "question revealed");
        self.broadcaster.broadcast(&UpdateMessage::LeaderboardUpdate {
            question_index: index,
            correct_answer,
            leaderboard: leaderboard::standings(&self.players),
        });
        Ok(())
    }

    fn finish<S>(&mut self, schedule: S) -> Result<()>
    where
        S: FnMut(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        self.scheduler.enter_finished(self.question_count())?;
        let final_leaderboard = leaderboard::standings(&self.players);
        let stats = leaderboard::question_stats(&self.players, self.question_count());

        tracing::info!(game_code = %self.game_code, players = self.players.len(), "game finished");
        self.broadcaster.broadcast(&UpdateMessage::GameFinished {
            final_leaderboard,
            stats: stats.clone(),
        });
        self.finished_record = Some(self.record(stats));

        let grace = self.options.finished_grace;
        let timers = self.scheduler.timers_mut();
        timers.cancel(TimerKind::HostAbsence);
        timers.arm(
            TimerKind::Teardown,
            grace,
            |epoch| AlarmMessage::Teardown { epoch },
            schedule,
        );
        Ok(())
    }

    fn record(&self, stats: Vec<QuestionStats>) -> GameRecord {
        GameRecord {
            game_code: self.game_code,
            quiz_id: self.quiz_id().cloned(),
            host_identity: self.host_identity.clone(),
            finished_at: SystemTime::now(),
            players: self.players.iter().map(PlayerRecord::from).collect_vec(),
            stats,
        }
    }

    fn wire_question_index(&self) -> i64 {
        self.current_question_index().map_or(-1, |index| index as i64)
    }

    /// Sends a connection its metainfo and the view of the current phase
    fn sync(&self, connection: ConnectionId) -> Result<()> {
        let role = self.broadcaster.role(connection).unwrap_or(Role::Player);
        let player = self
            .players
            .iter()
            .find(|p| p.connection == Some(connection));

        self.broadcaster.send_state(
            connection,
            &SyncMessage::Metainfo {
                game_code: self.game_code,
                role,
                status: self.status(),
                current_question_index: self.wire_question_index(),
                total_questions: self.question_count(),
                host_connected: self.host.is_some(),
                player_id: player.map(|p| p.player_id.clone()),
                score: player.map(|p| p.score),
            },
        );
        let state = self.state_message(player)?;
        self.broadcaster.send_state(connection, &state);
        Ok(())
    }

    /// The snapshot of the current phase, from one player's point of view
    pub fn state_message(&self, player: Option<&Player>) -> Result<SyncMessage> {
        Ok(match self.phase() {
            Phase::Waiting => SyncMessage::WaitingScreen {
                players: self.roster(),
            },
            Phase::Presenting(index) | Phase::Collecting(index) => {
                let question = self.question(index)?;
                let elapsed = self
                    .question_opened
                    .map_or(Duration::ZERO, |opened| opened.elapsed());
                let (answered, expected) = self.answer_progress();
                SyncMessage::Question {
                    question_index: index,
                    total_questions: self.question_count(),
                    question: QuestionView::from(question),
                    time_left: question.time_limit.saturating_sub(elapsed).as_secs_f64(),
                    answered,
                    expected,
                    has_answered: player.is_some_and(|p| p.has_answered(index)),
                }
            }
            Phase::Revealing(index) => SyncMessage::Leaderboard {
                question_index: index,
                total_questions: self.question_count(),
                correct_answer: self.question(index)?.correct_answer,
                leaderboard: leaderboard::standings(&self.players),
            },
            Phase::Finished => SyncMessage::Summary {
                final_leaderboard: leaderboard::standings(&self.players),
                stats: leaderboard::question_stats(&self.players, self.question_count()),
            },
        })
    }
}
