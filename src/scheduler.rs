//! Question progression state machine
//!
//! A room moves through its quiz as
//!
//! ```text
//! Waiting → Presenting(0) → Collecting(0) → Revealing(0) → Presenting(1) → … → Revealing(last) → Finished
//! ```
//!
//! The `request_*` methods decide what a trigger means in the current phase
//! without changing anything, so the room can validate and then apply. The
//! `enter_*` methods apply a transition and refuse any edge that is not in
//! the diagram above; such a refusal means the room's state is corrupted.
//!
//! Timers live here as well. Each armed timer carries an epoch, and a timer
//! that fires only has an effect if it still owns its slot. Leaving
//! `Collecting` clears the countdown slot under the room lock, so a
//! countdown that races a skip finds its epoch gone and does nothing.

use std::{fmt::Display, time::Duration};

use enum_map::{Enum, EnumMap};
use serde::Serialize;
use tokio::task::AbortHandle;

use crate::{
    AlarmMessage,
    error::{Error, Result},
};

/// Where a room is in its quiz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "questionIndex", rename_all = "camelCase")]
pub enum Phase {
    /// Players are joining, nothing has been asked yet
    Waiting,
    /// The question is being sent to players
    Presenting(usize),
    /// The question is open for answers
    Collecting(usize),
    /// The correct answer and standings are shown
    Revealing(usize),
    /// The game is over
    Finished,
}

/// Coarse lifecycle of a room, derived from its [`Phase`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Before the first question
    Waiting,
    /// Any question phase
    Active,
    /// After the last question
    Finished,
}

impl Phase {
    /// The status this phase belongs to
    pub fn status(self) -> Status {
        match self {
            Self::Waiting => Status::Waiting,
            Self::Presenting(_) | Self::Collecting(_) | Self::Revealing(_) => Status::Active,
            Self::Finished => Status::Finished,
        }
    }

    /// The question this phase is about, if any
    pub fn question_index(self) -> Option<usize> {
        match self {
            Self::Presenting(i) | Self::Collecting(i) | Self::Revealing(i) => Some(i),
            Self::Waiting | Self::Finished => None,
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting for players"),
            Self::Presenting(i) => write!(f, "presenting question {i}"),
            Self::Collecting(i) => write!(f, "collecting answers for question {i}"),
            Self::Revealing(i) => write!(f, "revealing question {i}"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// What a trigger resolves to in the current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Duplicate or stale trigger, nothing to do
    Ignored,
    /// Present the question at this index
    Present(usize),
    /// Close the question at this index and reveal its answer
    Reveal(usize),
    /// End the game
    Finish,
}

/// The different timers a room can have armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum TimerKind {
    /// Closes the open question
    Countdown,
    /// Closes a room that has been without a host for too long
    HostAbsence,
    /// Removes a finished room
    Teardown,
}

/// A scheduled alarm that can be cancelled
#[derive(Debug)]
pub struct TimerHandle {
    epoch: u64,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    /// The epoch the alarm was armed with
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Stops the alarm task if it has not fired yet
    pub fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

/// The timer slots of one room
#[derive(Debug, Default)]
pub struct Timers {
    slots: EnumMap<TimerKind, Option<TimerHandle>>,
    last_epoch: u64,
}

impl Timers {
    /// Arms a timer, replacing and cancelling any timer in the same slot
    ///
    /// # Arguments
    ///
    /// * `kind` - The slot to arm
    /// * `after` - Delay before the alarm fires
    /// * `alarm` - Builds the alarm message from the fresh epoch
    /// * `schedule` - Spawns the alarm; returns `None` when no task backs it
    ///
    /// # Returns
    ///
    /// The epoch of the new timer
    pub fn arm<A, S>(&mut self, kind: TimerKind, after: Duration, alarm: A, schedule: S) -> u64
    where
        A: FnOnce(u64) -> AlarmMessage,
        S: FnOnce(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        self.cancel(kind);
        self.last_epoch += 1;
        let epoch = self.last_epoch;
        let abort = schedule(alarm(epoch), after);
        self.slots[kind] = Some(TimerHandle { epoch, abort });
        epoch
    }

    /// Cancels the timer in a slot
    ///
    /// # Returns
    ///
    /// `true` if a timer was armed
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.slots[kind].take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every timer
    pub fn cancel_all(&mut self) {
        for slot in self.slots.values_mut() {
            if let Some(handle) = slot.take() {
                handle.cancel();
            }
        }
    }

    /// Whether a slot has a timer armed
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind].is_some()
    }

    /// Claims a slot for a fired alarm
    ///
    /// Succeeds only if the slot still holds the timer with this epoch; the
    /// slot is then emptied without aborting, since the caller is that very
    /// timer.
    pub fn claim(&mut self, kind: TimerKind, epoch: u64) -> bool {
        if self.slots[kind].as_ref().is_some_and(|h| h.epoch == epoch) {
            self.slots[kind] = None;
            true
        } else {
            false
        }
    }
}

/// The phase of a room together with its timers
#[derive(Debug)]
pub struct Scheduler {
    phase: Phase,
    current_question: Option<usize>,
    timers: Timers,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            phase: Phase::Waiting,
            current_question: None,
            timers: Timers::default(),
        }
    }
}

impl Scheduler {
    /// The current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The current status
    pub fn status(&self) -> Status {
        self.phase.status()
    }

    /// Index of the most recently presented question, `None` before start
    ///
    /// Unlike [`Phase::question_index`] this stays set once the game has
    /// finished.
    pub fn current_question(&self) -> Option<usize> {
        self.current_question
    }

    /// The room's timers
    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// Mutable access to the room's timers
    pub fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    /// Resolves a host's request to start the game
    ///
    /// # Errors
    ///
    /// * `Error::NoQuiz` - No quiz is bound
    /// * `Error::NeedPlayers` - Nobody has joined
    /// * `Error::InvalidState` / `Error::GameFinished` - The game already started
    pub fn request_start(&self, player_count: usize, question_count: usize) -> Result<Step> {
        match self.phase {
            Phase::Waiting if question_count == 0 => Err(Error::NoQuiz),
            Phase::Waiting if player_count == 0 => Err(Error::NeedPlayers),
            Phase::Waiting => Ok(Step::Present(0)),
            Phase::Finished => Err(Error::GameFinished),
            phase => Err(Error::InvalidState {
                action: "start the game",
                phase,
            }),
        }
    }

    /// Resolves a host's request for the next question
    ///
    /// `requested` is the index the host believes comes next. A mismatch
    /// means the request is a stale duplicate and is ignored.
    pub fn request_next(&self, requested: Option<usize>, question_count: usize) -> Result<Step> {
        match self.phase {
            Phase::Waiting => Err(Error::InvalidState {
                action: "advance to the next question",
                phase: self.phase,
            }),
            Phase::Finished => Err(Error::GameFinished),
            Phase::Presenting(_) | Phase::Collecting(_) => Ok(Step::Ignored),
            Phase::Revealing(i) => {
                let next = i + 1;
                match requested {
                    Some(requested) if requested != next => Ok(Step::Ignored),
                    _ if next < question_count => Ok(Step::Present(next)),
                    _ => Ok(Step::Finish),
                }
            }
        }
    }

    /// Resolves a host's request to end the game
    pub fn request_end(&self, question_count: usize) -> Result<Step> {
        match self.phase {
            Phase::Revealing(i) if i + 1 >= question_count => Ok(Step::Finish),
            Phase::Finished => Ok(Step::Ignored),
            phase => Err(Error::InvalidState {
                action: "end the game before the last question",
                phase,
            }),
        }
    }

    /// Resolves a host's request to reveal the current answer
    ///
    /// # Arguments
    ///
    /// * `force` - Skip without waiting for answers
    /// * `answered` - Answers received for the open question
    /// * `expected` - Answers the room is waiting for
    pub fn request_reveal(&self, force: bool, answered: usize, expected: usize) -> Result<Step> {
        match self.phase {
            Phase::Presenting(i) | Phase::Collecting(i) if force || answered >= expected => {
                Ok(Step::Reveal(i))
            }
            Phase::Presenting(_) | Phase::Collecting(_) => {
                Err(Error::AnswersPending { answered, expected })
            }
            Phase::Revealing(_) => Ok(Step::Ignored),
            Phase::Finished => Err(Error::GameFinished),
            Phase::Waiting => Err(Error::InvalidState {
                action: if force {
                    "skip the question"
                } else {
                    "show the leaderboard"
                },
                phase: self.phase,
            }),
        }
    }

    /// Resolves a fired countdown
    pub fn countdown_expired(&mut self, index: usize, epoch: u64) -> Step {
        if !self.timers.claim(TimerKind::Countdown, epoch) {
            return Step::Ignored;
        }
        match self.phase {
            Phase::Collecting(i) if i == index => Step::Reveal(i),
            _ => Step::Ignored,
        }
    }

    /// Moves to `Presenting(index)`
    ///
    /// # Errors
    ///
    /// `Error::Corrupted` unless coming from `Waiting` with index 0 or from
    /// `Revealing(index - 1)`.
    pub fn enter_presenting(&mut self, index: usize) -> Result<()> {
        let valid = match self.phase {
            Phase::Waiting => index == 0,
            Phase::Revealing(i) => index == i + 1,
            _ => false,
        } && index == self.current_question.map_or(0, |c| c + 1);

        if !valid {
            return Err(Error::Corrupted(format!(
                "cannot present question {index} while {}",
                self.phase
            )));
        }
        self.current_question = Some(index);
        self.phase = Phase::Presenting(index);
        Ok(())
    }

    /// Moves from `Presenting(i)` to `Collecting(i)` and arms the countdown
    pub fn enter_collecting<S>(&mut self, time_limit: Duration, schedule: S) -> Result<()>
    where
        S: FnOnce(AlarmMessage, Duration) -> Option<AbortHandle>,
    {
        let Phase::Presenting(index) = self.phase else {
            return Err(Error::Corrupted(format!(
                "cannot open answers while {}",
                self.phase
            )));
        };
        self.phase = Phase::Collecting(index);
        self.timers.arm(
            TimerKind::Countdown,
            time_limit,
            |epoch| AlarmMessage::CountdownExpired { index, epoch },
            schedule,
        );
        Ok(())
    }

    /// Moves to `Revealing(i)`, cancelling the countdown
    ///
    /// # Returns
    ///
    /// The index of the revealed question
    pub fn enter_revealing(&mut self) -> Result<usize> {
        let (Phase::Presenting(index) | Phase::Collecting(index)) = self.phase else {
            return Err(Error::Corrupted(format!(
                "cannot reveal while {}",
                self.phase
            )));
        };
        self.timers.cancel(TimerKind::Countdown);
        self.phase = Phase::Revealing(index);
        Ok(index)
    }

    /// Moves from `Revealing(last)` to `Finished`
    pub fn enter_finished(&mut self, question_count: usize) -> Result<()> {
        match self.phase {
            Phase::Revealing(i) if i + 1 == question_count => {
                self.timers.cancel(TimerKind::Countdown);
                self.phase = Phase::Finished;
                Ok(())
            }
            phase => Err(Error::Corrupted(format!(
                "cannot finish a {question_count} question game while {phase}"
            ))),
        }
    }
}
