//! Session data model and the orchestration around it.
//!
//! [`Session`] is the engine's view of one applicant's attempt: the
//! question list, the answered set (authoritative after each successful
//! upload), and the submission flag. The state machine that paces the
//! interview lives in [`flow`]; the event loop that wires it to the
//! platform collaborators lives in [`engine`].

pub mod engine;
mod events;
mod flow;

pub use engine::{EngineDeps, EngineHandle, SessionEngine};
pub use events::{EngineCommand, UiEvent};
pub use flow::Phase;

use crate::api::SessionPayload;
use crate::error::ApiError;
use std::collections::HashSet;

pub type QuestionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub question_type: String,
}

/// Where the session landed after applying the server's answered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeNotice {
    FreshStart,
    /// Picked up at `index`, the first question still owed an answer.
    Resumed { index: usize },
    /// Everything is answered; the session parks on the last question and
    /// waits for submission.
    AllAnswered,
}

#[derive(Debug, Clone)]
pub struct Session {
    public_id: String,
    questions: Vec<Question>,
    current_index: usize,
    answered: HashSet<QuestionId>,
    submitted: bool,
}

impl Session {
    /// Build the session from the server document and work out where to
    /// resume. The server's answered list wins over its index hint: we
    /// never park the applicant on a question they already answered.
    pub fn from_payload(payload: SessionPayload) -> Result<(Self, ResumeNotice), ApiError> {
        if payload.status.as_deref() == Some("expired") {
            return Err(ApiError::Expired);
        }
        if payload.questions.is_empty() {
            return Err(ApiError::NoQuestions);
        }

        let questions: Vec<Question> = payload
            .questions
            .into_iter()
            .map(|q| Question {
                id: q.id,
                text: q.question_text,
                question_type: q.question_type,
            })
            .collect();
        let known: HashSet<QuestionId> = questions.iter().map(|q| q.id).collect();
        let answered: HashSet<QuestionId> = payload
            .answered_question_ids
            .into_iter()
            .filter(|id| known.contains(id))
            .collect();

        let last = questions.len() - 1;
        let server_index = payload.current_question_index.unwrap_or(0).min(last);
        let first_unanswered = questions.iter().position(|q| !answered.contains(&q.id));

        let (index, notice) = match first_unanswered {
            Some(unanswered) => {
                let index = server_index.max(unanswered).min(last);
                if index > 0 || !answered.is_empty() {
                    (index, ResumeNotice::Resumed { index })
                } else {
                    (0, ResumeNotice::FreshStart)
                }
            }
            None => (last, ResumeNotice::AllAnswered),
        };

        Ok((
            Self {
                public_id: payload.public_id,
                questions,
                current_index: index,
                answered,
                submitted: false,
            },
            notice,
        ))
    }

    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> &Question {
        &self.questions[self.current_index]
    }

    pub fn is_last_question(&self) -> bool {
        self.current_index + 1 == self.questions.len()
    }

    pub fn is_answered(&self, id: QuestionId) -> bool {
        self.answered.contains(&id)
    }

    pub fn answered_count(&self) -> usize {
        self.answered.len()
    }

    pub fn all_answered(&self) -> bool {
        self.answered.len() == self.questions.len()
    }

    pub fn mark_answered(&mut self, id: QuestionId) {
        self.answered.insert(id);
    }

    /// Step to the next question. Does nothing on the last question; the
    /// orchestrator handles the end of the list through submission.
    pub fn advance(&mut self) -> bool {
        if self.is_last_question() {
            return false;
        }
        self.current_index += 1;
        true
    }

    pub fn submitted(&self) -> bool {
        self.submitted
    }

    pub fn mark_submitted(&mut self) {
        self.submitted = true;
    }
}
