//! Question models shared by tournaments and daily sessions.
//!
//! Storage and random sampling belong to the question bank behind
//! [`crate::db::QuestionBank`].

use serde::{Deserialize, Serialize};

/// Question ID type
pub type QuestionId = i64;

/// Number of answer options per question
pub const OPTION_COUNT: usize = 4;

/// Full question including the correct answer. Never sent to players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub options: [String; OPTION_COUNT],
    pub correct_index: u8,
}

impl Question {
    pub fn is_correct(&self, selected_index: u8) -> bool {
        self.correct_index == selected_index
    }
}

/// Question as broadcast to players, without the answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: QuestionId,
    pub text: String,
    pub options: [String; OPTION_COUNT],
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            text: q.text.clone(),
            options: q.options.clone(),
        }
    }
}
