//! Conversation context for keyword derivation.

use serde::Serialize;

use crate::types::{Conversation, Language};

/// One question with the answer that may be shown alongside it
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Exchange {
    /// The user's question
    pub query: String,
    /// The recorded answer; always `None` for the turn being searched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Input to [`KeywordDeriver::derive_keywords`](super::KeywordDeriver::derive_keywords)
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeywordContext {
    /// Conversation language
    pub lang: Language,
    /// Turns `0..=turn`, the last one without its answer
    pub exchanges: Vec<Exchange>,
}

impl KeywordContext {
    /// Context for searching turn `turn` of `conversation`.
    ///
    /// Holds every query up to and including `turn` and every answer before
    /// it, so the answer being researched never leaks into the search.
    pub fn for_turn(conversation: &Conversation, turn: usize) -> Self {
        let exchanges = conversation
            .contents
            .iter()
            .take(turn + 1)
            .enumerate()
            .map(|(i, t)| Exchange {
                query: t.query.clone(),
                answer: if i < turn { t.answer.clone() } else { None },
            })
            .collect();

        Self {
            lang: conversation.lang.clone(),
            exchanges,
        }
    }

    /// The question being searched.
    pub fn current_query(&self) -> Option<&str> {
        self.exchanges.last().map(|e| e.query.as_str())
    }
}
