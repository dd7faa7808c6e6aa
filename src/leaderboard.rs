//! Standings and end-of-game statistics
//!
//! Standings are computed from the roster on demand rather than cached:
//! scores only change under the room lock, and every reveal needs a fresh
//! sort anyway.

use itertools::Itertools;
use serde::Serialize;

use crate::room::{Player, PlayerId};

/// One row of a leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    /// 1-based position; tied scores share a rank
    pub rank: usize,
    /// The player's id
    pub player_id: PlayerId,
    /// The player's display name
    pub player_name: String,
    /// The player's cumulative score
    pub score: u64,
}

/// How a single question went across the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    /// Index of the question
    pub question_index: usize,
    /// Players who submitted an answer
    pub answered: usize,
    /// Players who picked the correct option
    pub correct: usize,
}

/// Sorts players by score, highest first
///
/// Players with equal scores keep their join order and share a rank, the
/// next distinct score skipping the tied positions (1, 1, 3).
pub fn standings<'a>(players: impl IntoIterator<Item = &'a Player>) -> Vec<Standing> {
    let sorted = players
        .into_iter()
        .sorted_by(|a, b| b.score.cmp(&a.score))
        .collect_vec();

    let mut rank = 0;
    let mut previous = None;
    sorted
        .into_iter()
        .enumerate()
        .map(|(position, player)| {
            if previous != Some(player.score) {
                rank = position + 1;
                previous = Some(player.score);
            }
            Standing {
                rank,
                player_id: player.player_id.clone(),
                player_name: player.player_name.clone(),
                score: player.score,
            }
        })
        .collect_vec()
}

/// Per-question answer counts for the first `question_count` questions
pub fn question_stats(players: &[Player], question_count: usize) -> Vec<QuestionStats> {
    (0..question_count)
        .map(|question_index| {
            let records = players
                .iter()
                .filter_map(|player| player.answer_for(question_index))
                .collect_vec();
            QuestionStats {
                question_index,
                answered: records.iter().filter(|r| r.selected.is_some()).count(),
                correct: records.iter().filter(|r| r.correct).count(),
            }
        })
        .collect_vec()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scoring::AnswerRecord;

    fn player(id: &str, name: &str, score: u64) -> Player {
        Player::new(PlayerId::parse(id).unwrap(), name.to_string(), None).with_score(score)
    }

    fn answer(question_index: usize, selected: Option<usize>, correct: bool) -> AnswerRecord {
        AnswerRecord {
            question_index,
            selected,
            correct,
            time_remaining: Duration::from_secs(10),
            points_earned: 0,
        }
    }

    #[test]
    fn test_standings_sorted_descending() {
        let players = [player("p1", "Alice", 100), player("p2", "Bob", 700), player("p3", "Cara", 300)];

        let names = standings(&players)
            .into_iter()
            .map(|s| s.player_name)
            .collect_vec();

        assert_eq!(names, vec!["Bob", "Cara", "Alice"]);
    }

    #[test]
    fn test_standings_ties_share_rank_and_keep_join_order() {
        let players = [
            player("p1", "Alice", 500),
            player("p2", "Bob", 900),
            player("p3", "Cara", 500),
            player("p4", "Dan", 0),
        ];

        let rows = standings(&players);
        let ranks = rows.iter().map(|s| (s.player_name.as_str(), s.rank)).collect_vec();

        assert_eq!(ranks, vec![("Bob", 1), ("Alice", 2), ("Cara", 2), ("Dan", 4)]);
    }

    #[test]
    fn test_standings_empty() {
        assert!(standings(&[] as &[Player]).is_empty());
    }

    #[test]
    fn test_question_stats() {
        let mut alice = player("p1", "Alice", 0);
        alice.answers = vec![answer(0, Some(1), true), answer(1, Some(0), false)];
        let mut bob = player("p2", "Bob", 0);
        bob.answers = vec![answer(0, None, false)];

        let stats = question_stats(&[alice, bob], 3);

        assert_eq!(
            stats,
            vec![
                QuestionStats { question_index: 0, answered: 1, correct: 1 },
                QuestionStats { question_index: 1, answered: 1, correct: 0 },
                QuestionStats { question_index: 2, answered: 0, correct: 0 },
            ]
        );
    }
}
