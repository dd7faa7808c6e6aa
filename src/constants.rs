//! Limits and defaults for the quiz coordinator
//!
//! This module contains the bounds used to validate quiz content, player
//! names and game codes, along with the default timing used when no
//! configuration overrides them.

/// Game code constants
pub mod game_code {
    /// Number of characters in a game code
    pub const LENGTH: usize = 6;
    /// Characters a game code is drawn from
    pub const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
}

/// Room constants
pub mod room {
    /// Maximum number of players allowed in a single room
    pub const MAX_PLAYER_COUNT: usize = 1000;
    /// Seconds a finished room is kept before it is torn down
    pub const FINISHED_GRACE_SECS: u64 = 60;
    /// Seconds a room may stay without a host before it is closed
    pub const HOST_GRACE_SECS: u64 = 600;
    /// Finished game records an in-memory store holds before dropping the
    /// oldest
    pub const MAX_RETAINED_RESULTS: usize = 1000;
}

/// Player constants
pub mod player {
    /// Maximum length of a display name in bytes
    pub const MAX_NAME_LENGTH: usize = 30;
    /// Maximum length of a client supplied player id
    pub const MAX_ID_LENGTH: usize = 64;
}

/// Quiz content constants
pub mod quiz {
    /// Maximum length of a quiz title
    pub const MAX_TITLE_LENGTH: usize = 200;
    /// Maximum number of questions in a quiz
    pub const MAX_QUESTION_COUNT: usize = 100;
    /// Maximum length of a question's text
    pub const MAX_QUESTION_LENGTH: usize = 500;
    /// Minimum number of options for a question
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of options for a question
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Maximum length of a single option
    pub const MAX_OPTION_LENGTH: usize = 200;
    /// Minimum time limit in seconds for answering a question
    pub const MIN_TIME_LIMIT: u64 = 5;
    /// Maximum time limit in seconds for answering a question
    pub const MAX_TIME_LIMIT: u64 = 100;
    /// Minimum point value of a question
    ///
    /// Never below [`MAX_TIME_LIMIT`], so every extra whole second left
    /// earns at least one more point.
    pub const MIN_POINTS: u64 = 100;
    /// Maximum point value of a question
    pub const MAX_POINTS: u64 = 5000;
}
