//! Quiz content owned by a room
//!
//! A [`Quiz`] is what the coordinator receives from its quiz lookup: an
//! ordered list of multiple-choice questions with a correct option, a time
//! limit and a point value each. Content is validated with `garde` before a
//! room accepts it, so the rest of the crate can index into options and
//! divide by time limits without re-checking.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::constants::quiz::{
    MAX_OPTION_COUNT, MAX_OPTION_LENGTH, MAX_POINTS, MAX_QUESTION_COUNT, MAX_QUESTION_LENGTH,
    MAX_TIME_LIMIT, MAX_TITLE_LENGTH, MIN_OPTION_COUNT, MIN_POINTS, MIN_TIME_LIMIT,
};

type ValidationResult = garde::Result;

/// Validates that a duration falls within specified bounds.
///
/// # Generics
///
/// * `MIN_SECONDS` - The minimum allowed duration in seconds (inclusive).
/// * `MAX_SECONDS` - The maximum allowed duration in seconds (inclusive).
///
/// # Errors
///
/// Returns a `garde::Error` if the duration is outside the specified bounds.
pub fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Duration,
    _ctx: &(),
) -> ValidationResult {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_SECONDS},{MAX_SECONDS}]",
        )))
    }
}

fn validate_time_limit(val: &Duration) -> ValidationResult {
    validate_duration::<MIN_TIME_LIMIT, MAX_TIME_LIMIT>(val, &())
}

fn is_valid_option(options: &[String]) -> impl FnOnce(&usize, &()) -> ValidationResult + '_ {
    move |value, _| {
        if *value < options.len() {
            Ok(())
        } else {
            Err(garde::Error::new(format!(
                "correct answer {value} is not one of the {} options",
                options.len()
            )))
        }
    }
}

/// A complete quiz as handed to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    /// The quiz title, shown in summaries
    #[garde(length(max = MAX_TITLE_LENGTH))]
    #[serde(default)]
    pub title: String,
    /// The questions, asked in order
    #[garde(length(min = 1, max = MAX_QUESTION_COUNT), dive)]
    pub questions: Vec<Question>,
}

/// A single multiple-choice question
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// The question text
    #[garde(length(min = 1, max = MAX_QUESTION_LENGTH))]
    pub question: String,
    /// The answer options, addressed by their index
    #[garde(
        length(min = MIN_OPTION_COUNT, max = MAX_OPTION_COUNT),
        inner(length(min = 1, max = MAX_OPTION_LENGTH))
    )]
    pub options: Vec<String>,
    /// Index of the correct option
    #[garde(custom(is_valid_option(&self.options)))]
    pub correct_answer: usize,
    /// Time players have to answer, in whole seconds on the wire
    #[garde(custom(|v, _| validate_time_limit(v)))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub time_limit: Duration,
    /// Points awarded for an instant correct answer
    #[garde(range(min = MIN_POINTS, max = MAX_POINTS))]
    pub points: u64,
}

/// What players see of a question: everything except the correct answer
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    /// The question text
    pub question: String,
    /// The answer options
    pub options: Vec<String>,
    /// Time players have to answer
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub time_limit: Duration,
    /// Points awarded for an instant correct answer
    pub points: u64,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            question: question.question.clone(),
            options: question.options.clone(),
            time_limit: question.time_limit,
            points: question.points,
        }
    }
}

impl Question {
    /// Whether `option` addresses one of this question's options
    pub fn has_option(&self, option: usize) -> bool {
        option < self.options.len()
    }
}

impl Quiz {
    /// Number of questions in the quiz
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the quiz has no questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Gets the question at `index`
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}
