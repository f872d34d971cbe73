// src/pool.rs
// Static question pool: the question bank consulted when no follow-up is generated

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{InterviewError, Result};
use crate::session::{Block, Persona};

/// Question bank shipped with the binary
const BUILTIN_BANK: &str = include_str!("../config/questions.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub block: Block,
    pub text: String,
    /// Extracted-data key for the answer. Falls back to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Empty means every persona is eligible
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub personas: Vec<Persona>,
}

impl Question {
    pub fn answer_key(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.id)
    }

    pub fn is_for(&self, persona: Persona) -> bool {
        self.personas.is_empty() || self.personas.contains(&persona)
    }
}

/// Read-only source of static questions
pub trait QuestionPool: Send + Sync {
    fn lookup(&self, question_id: &str) -> Option<Question>;

    /// First unasked question of the block. `None` means end of block.
    fn next_in_block(&self, block: Block, already_asked: &[String]) -> Option<Question>;

    /// Like [`next_in_block`](Self::next_in_block) but skipping questions
    /// reserved for other personas.
    fn next_for_persona(
        &self,
        block: Block,
        _persona: Persona,
        already_asked: &[String],
    ) -> Option<Question> {
        self.next_in_block(block, already_asked)
    }
}

#[derive(Debug, Deserialize)]
struct BankFile {
    #[serde(default)]
    questions: Vec<Question>,
}

/// Question bank held in memory, in file order
#[derive(Debug, Clone, Default)]
pub struct StaticQuestionPool {
    questions: Vec<Question>,
}

impl StaticQuestionPool {
    pub fn new(questions: Vec<Question>) -> Result<Self> {
        let mut seen = HashSet::new();
        for q in &questions {
            if q.id.trim().is_empty() {
                return Err(InterviewError::QuestionBank(
                    "question with empty id".to_string(),
                ));
            }
            if q.id.starts_with(crate::orchestrator::DYNAMIC_ID_PREFIX) {
                return Err(InterviewError::QuestionBank(format!(
                    "question id '{}' uses the reserved '{}' prefix",
                    q.id,
                    crate::orchestrator::DYNAMIC_ID_PREFIX
                )));
            }
            if !seen.insert(q.id.as_str()) {
                return Err(InterviewError::QuestionBank(format!(
                    "duplicate question id '{}'",
                    q.id
                )));
            }
        }
        Ok(Self { questions })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let bank: BankFile = toml::from_str(content)?;
        Self::new(bank.questions)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            InterviewError::QuestionBank(format!("failed to read {}: {}", path.display(), e))
        })?;
        let pool = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            questions = pool.len(),
            "Loaded question bank"
        );
        Ok(pool)
    }

    /// The bank compiled into the binary
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_BANK)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn in_block(&self, block: Block) -> impl Iterator<Item = &Question> {
        self.questions.iter().filter(move |q| q.block == block)
    }
}

fn unasked(q: &Question, already_asked: &[String]) -> bool {
    !already_asked.iter().any(|id| *id == q.id)
}

impl QuestionPool for StaticQuestionPool {
    fn lookup(&self, question_id: &str) -> Option<Question> {
        self.questions.iter().find(|q| q.id == question_id).cloned()
    }

    fn next_in_block(&self, block: Block, already_asked: &[String]) -> Option<Question> {
        self.in_block(block)
            .find(|q| unasked(q, already_asked))
            .cloned()
    }

    fn next_for_persona(
        &self,
        block: Block,
        persona: Persona,
        already_asked: &[String],
    ) -> Option<Question> {
        self.in_block(block)
            .find(|q| q.is_for(persona) && unasked(q, already_asked))
            .cloned()
    }
}
