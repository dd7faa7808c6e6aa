//! Answer scoring
//!
//! Points decay linearly with the time a player takes: an instant correct
//! answer earns the question's full value, an answer with no time left
//! earns nothing, and wrong answers always earn nothing. The remaining time
//! reported by a client is never trusted beyond what the server measured
//! itself.
//!
//! Scores are whole points. Quiz validation keeps the point value at least
//! as large as the time limit in seconds, so the score strictly grows with
//! every whole second left; two answers less than a second apart may still
//! tie.

use std::time::Duration;

use serde::Serialize;

use crate::quiz::Question;

/// Calculates the score for a correct answer
///
/// # Arguments
///
/// * `full_duration` - The question's time limit
/// * `remaining_duration` - How much of the time limit was left
/// * `full_points_awarded` - The question's point value
///
/// # Returns
///
/// `round(full_points_awarded × remaining / full)`, with the ratio clamped
/// into `[0, 1]`. A zero `full_duration` yields zero points.
pub fn calculate_score(
    full_duration: Duration,
    remaining_duration: Duration,
    full_points_awarded: u64,
) -> u64 {
    if full_duration.is_zero() {
        return 0;
    }
    let ratio = (remaining_duration.as_secs_f64() / full_duration.as_secs_f64()).clamp(0., 1.);
    (full_points_awarded as f64 * ratio).round() as u64
}

/// Converts a client-reported number of seconds into a duration
///
/// Negative, NaN and infinite values count as no time left.
pub fn remaining_from_secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or_default()
}

/// The clamped remaining time used for scoring
///
/// The client's claim is capped by the question's time limit and by the
/// time the server itself measured as remaining.
pub fn effective_remaining(
    time_limit: Duration,
    claimed: Duration,
    elapsed_on_server: Duration,
) -> Duration {
    claimed
        .min(time_limit)
        .min(time_limit.saturating_sub(elapsed_on_server))
}

/// Scores one selection against a question
///
/// # Returns
///
/// Whether the selection was correct and the points it earns. An absent
/// selection (timeout) is incorrect.
pub fn evaluate(question: &Question, selected: Option<usize>, remaining: Duration) -> (bool, u64) {
    let correct = selected == Some(question.correct_answer);
    let points = if correct {
        calculate_score(question.time_limit, remaining, question.points)
    } else {
        0
    };
    (correct, points)
}

/// A scored answer, as kept in a player's answer log
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    /// Index of the question answered
    pub question_index: usize,
    /// The chosen option, `None` for a timeout
    pub selected: Option<usize>,
    /// Whether the chosen option was correct
    pub correct: bool,
    /// Remaining time the score was computed with
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub time_remaining: Duration,
    /// Points awarded for this answer
    pub points_earned: u64,
}

/// What a submitter is told about their own answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReceipt {
    /// Index of the question answered
    pub question_index: usize,
    /// Whether the answer was correct
    pub correct: bool,
    /// Points awarded for this answer
    pub points_earned: u64,
    /// The player's score after this answer
    pub total_score: u64,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::quiz::tests::question;

    const LIMIT: Duration = Duration::from_secs(30);

    #[test]
    fn test_calculate_score_bounds() {
        assert_eq!(calculate_score(LIMIT, LIMIT, 1000), 1000);
        assert_eq!(calculate_score(LIMIT, Duration::ZERO, 1000), 0);
        assert_eq!(calculate_score(LIMIT, Duration::from_secs(15), 1000), 500);
        assert_eq!(calculate_score(LIMIT, Duration::from_secs(60), 1000), 1000);
        assert_eq!(calculate_score(Duration::ZERO, LIMIT, 1000), 0);
    }

    #[test]
    fn test_calculate_score_is_monotonic() {
        let mut previous = 0;
        for seconds in 1..=30 {
            let score = calculate_score(LIMIT, Duration::from_secs(seconds), 1000);
            assert!(score > previous, "{seconds}s earned {score}, not above {previous}");
            assert!(score <= 1000);
            previous = score;
        }
    }

    #[test]
    fn test_calculate_score_is_monotonic_at_validation_bounds() {
        use crate::constants::quiz::{MAX_TIME_LIMIT, MIN_POINTS, MIN_TIME_LIMIT};

        for limit in [MIN_TIME_LIMIT, MAX_TIME_LIMIT] {
            let full = Duration::from_secs(limit);
            let mut previous = calculate_score(full, Duration::ZERO, MIN_POINTS);
            assert_eq!(previous, 0);
            for seconds in 1..=limit {
                let score = calculate_score(full, Duration::from_secs(seconds), MIN_POINTS);
                assert!(
                    score > previous,
                    "{limit}s limit: {seconds}s earned {score}, not above {previous}"
                );
                previous = score;
            }
            assert_eq!(previous, MIN_POINTS);
        }
    }

    #[test]
    fn test_remaining_from_secs() {
        assert_eq!(remaining_from_secs(2.5), Duration::from_millis(2500));
        assert_eq!(remaining_from_secs(-1.), Duration::ZERO);
        assert_eq!(remaining_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(remaining_from_secs(f64::INFINITY), Duration::ZERO);
    }

    #[test]
    fn test_effective_remaining_trusts_server_clock() {
        let claimed = Duration::from_secs(25);

        assert_eq!(effective_remaining(LIMIT, claimed, Duration::ZERO), claimed);
        assert_eq!(
            effective_remaining(LIMIT, claimed, Duration::from_secs(10)),
            Duration::from_secs(20)
        );
        assert_eq!(
            effective_remaining(LIMIT, Duration::from_secs(90), Duration::ZERO),
            LIMIT
        );
        assert_eq!(
            effective_remaining(LIMIT, claimed, Duration::from_secs(45)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_evaluate() {
        let question = question(1, 30, 1000);

        let (correct, points) = evaluate(&question, Some(1), Duration::from_secs(20));
        assert!(correct);
        assert_eq!(points, 667);

        assert_eq!(evaluate(&question, Some(0), LIMIT), (false, 0));
        assert_eq!(evaluate(&question, None, LIMIT), (false, 0));
        assert_eq!(evaluate(&question, Some(1), Duration::ZERO), (true, 0));
    }
}
