use serde::{Deserialize, Serialize};

/// One citation: a pointer to the document fragment supporting part of an
/// answer. Two refs are duplicates iff `(origin, page)` match exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    pub origin: String,
    pub page: Option<u32>,
    pub snippet: Option<String>,
}

impl SourceRef {
    pub fn dedup_key(&self) -> (&str, Option<u32>) {
        (self.origin.as_str(), self.page)
    }

    pub fn is_link(&self) -> bool {
        self.origin.starts_with("http://") || self.origin.starts_with("https://")
    }
}

/// Canonical form of one generator response: the answer text (possibly empty)
/// and the deduplicated citations in relevance order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedResult {
    pub answer_text: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Append-only conversation log owned by the session. The cascade reads the
/// most recent user turn when an error path needs the original prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<ChatTurn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last_user_prompt(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
    }
}

/// Which answering mode the turn runs under. Each mode carries its own
/// no-answer sentinel and no-match message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    DocumentSearch,
    Inquiry,
}

/// Terminal result of the fallback cascade; exactly one variant per turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackOutcome {
    Answered { text: String },
    RosterRendered { department: String, row_count: usize },
    SearchHitsRendered { count: usize },
    GenericFallback { reason: String },
    NoMatch { message: String },
}

impl FallbackOutcome {
    /// Text appended to the conversation log for this outcome.
    pub fn display_text(&self) -> &str {
        match self {
            FallbackOutcome::Answered { text } => text,
            FallbackOutcome::RosterRendered { .. } => "Displayed the requested roster.",
            FallbackOutcome::SearchHitsRendered { .. } => {
                "Displayed keyword search results in place of a generated answer."
            }
            FallbackOutcome::GenericFallback { reason } => reason,
            FallbackOutcome::NoMatch { message } => message,
        }
    }
}

/// What `resolve_turn` hands the display layer: the outcome plus the
/// citations to show and, for table-producing strategies, the rendered body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTurn {
    pub outcome: FallbackOutcome,
    pub sources: Vec<SourceRef>,
    pub rendered: Option<String>,
}

impl ResolvedTurn {
    pub fn bare(outcome: FallbackOutcome) -> Self {
        Self {
            outcome,
            sources: Vec::new(),
            rendered: None,
        }
    }
}

/// One loaded document fragment as produced by the loader registry or the
/// retriever collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub question: String,
    #[serde(default = "default_mode")]
    pub mode: AnswerMode,
}

fn default_mode() -> AnswerMode {
    AnswerMode::Inquiry
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
}
