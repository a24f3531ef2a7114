use std::sync::Arc;

use anyhow::Result;

use crate::config::{AppConfig, KeywordSets};
use crate::generator::{AnswerGenerator, GeneratorError, Retriever};
use crate::loaders::LoaderRegistry;
use crate::models::{
    AnswerMode, ConversationState, DocumentChunk, FallbackOutcome, NormalizedResult, ResolvedTurn,
    SourceRef,
};
use crate::normalize::normalize;
use crate::roster;
use crate::search::keyword_search;

const TOPIC_GUIDANCE_REASON: &str =
    "Supplementary information from a general perspective was provided.";

const TOPIC_GUIDANCE_BODY: &str = "\
#### General perspectives on this topic

- Policy and governance: publish a formal policy and assign executive responsibility
- Compliance and targets: track legal obligations and set measurable reduction targets
- Operational measures: energy savings, optimized logistics, reduced paper use
- Certification and review: consider external certification and third-party audits
- Disclosure: report progress on the website and to employees and partners

If formal internal documents on this topic exist, adding them to the data \
folder enables answers grounded in company sources.";

/// The decision engine for one user turn: normalize the generator result (or
/// classify its error), then run exactly one terminal strategy.
pub struct Resolver {
    config: AppConfig,
    registry: Arc<LoaderRegistry>,
    generator: Arc<dyn AnswerGenerator>,
    retriever: Option<Arc<dyn Retriever>>,
}

/// Everything a fallback strategy may consult. Strategies are pure over this
/// context; the priority order lives in the controller's strategy lists, not
/// in control flow.
struct StrategyContext<'a> {
    query: &'a str,
    sources: &'a [SourceRef],
    config: &'a AppConfig,
    registry: &'a LoaderRegistry,
}

trait FallbackStrategy {
    /// `Some` when this strategy's acceptance criterion is met; the first
    /// accepting strategy terminates the cascade.
    fn attempt(&self, cx: &StrategyContext<'_>) -> Option<ResolvedTurn>;
}

impl Resolver {
    pub fn new(
        config: AppConfig,
        registry: Arc<LoaderRegistry>,
        generator: Arc<dyn AnswerGenerator>,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> Self {
        Self {
            config,
            registry,
            generator,
            retriever,
        }
    }

    /// Resolve one user turn to a terminal outcome. Only a generator error
    /// not recognized as quota/rate-limit propagates as an error; every other
    /// condition still produces a rendered outcome.
    pub async fn resolve_turn(
        &self,
        query: &str,
        mode: AnswerMode,
        history: &mut ConversationState,
    ) -> Result<ResolvedTurn> {
        let prior_turns = history.turns().to_vec();
        history.push_user(query);

        // Off-topic queries short-circuit before any generator call; the
        // fixed message wins over every recovery attempt, quota or not.
        if is_off_topic(query, &self.config.keywords) {
            let turn = ResolvedTurn::bare(FallbackOutcome::GenericFallback {
                reason: self.no_match_message(mode).to_string(),
            });
            self.append_assistant(history, &turn);
            return Ok(turn);
        }

        let context = self.retrieve_context(query);

        let turn = match self
            .generator
            .generate(query, &prior_turns, &context)
            .await
        {
            Ok(response) => {
                let normalized = normalize(
                    &response,
                    self.config.retrieval_top_k,
                    self.config.snippet_limit,
                );
                self.resolve_normalized(query, mode, normalized)
            }
            Err(err) if err.is_quota() => {
                tracing::warn!("generator quota exhausted, entering recovery: {err}");
                // Generator errors carry no prompt; recover it from the log.
                let prompt = history.last_user_prompt().unwrap_or(query);
                self.recover_from_quota(prompt, err)?
            }
            // Anything not recognized as quota/rate-limit is fatal to the turn.
            Err(err) => return Err(err.into()),
        };

        self.append_assistant(history, &turn);
        Ok(turn)
    }

    /// Main state machine once a response was normalized.
    fn resolve_normalized(
        &self,
        query: &str,
        mode: AnswerMode,
        normalized: NormalizedResult,
    ) -> ResolvedTurn {
        let text = normalized.answer_text.trim();
        let empty = text.is_empty() || text == self.no_answer_sentinel(mode);

        if !empty {
            return ResolvedTurn {
                outcome: FallbackOutcome::Answered {
                    text: normalized.answer_text.clone(),
                },
                sources: normalized.sources,
                rendered: None,
            };
        }

        if normalized.sources.is_empty() {
            // Nothing to extract from; no roster or topic attempt.
            return ResolvedTurn::bare(FallbackOutcome::NoMatch {
                message: self.no_match_message(mode).to_string(),
            });
        }

        if mode == AnswerMode::DocumentSearch {
            // Search mode has no recovery strategies: report that related
            // documents exist and show them.
            return ResolvedTurn {
                outcome: FallbackOutcome::NoMatch {
                    message: self.config.messages.sources_found.clone(),
                },
                sources: normalized.sources,
                rendered: None,
            };
        }

        let cx = StrategyContext {
            query,
            sources: &normalized.sources,
            config: &self.config,
            registry: self.registry.as_ref(),
        };
        let strategies: [&dyn FallbackStrategy; 3] =
            [&RosterFromCitations, &TopicGuidance, &CitedNoMatch];
        for strategy in strategies {
            if let Some(turn) = strategy.attempt(&cx) {
                return turn;
            }
        }
        unreachable!("CitedNoMatch always accepts");
    }

    /// Recovery branch for a quota/rate-limit failure. Roster extraction runs
    /// against the full document root here, not just cited sources; when no
    /// strategy accepts, the original error is surfaced.
    fn recover_from_quota(&self, query: &str, err: GeneratorError) -> Result<ResolvedTurn> {
        let cx = StrategyContext {
            query,
            sources: &[],
            config: &self.config,
            registry: self.registry.as_ref(),
        };
        let strategies: [&dyn FallbackStrategy; 2] = [&RosterFromRoot, &KeywordSearchFallback];
        for strategy in strategies {
            if let Some(turn) = strategy.attempt(&cx) {
                return Ok(turn);
            }
        }
        Err(err.into())
    }

    fn retrieve_context(&self, query: &str) -> Vec<DocumentChunk> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        match retriever.retrieve(query) {
            Ok(chunks) => chunks,
            Err(err) => {
                // A failing retriever contributes zero documents.
                tracing::warn!("retriever failed, answering without citations: {err:#}");
                Vec::new()
            }
        }
    }

    fn append_assistant(&self, history: &mut ConversationState, turn: &ResolvedTurn) {
        let text = turn.outcome.display_text();
        if text.trim().is_empty() {
            history.push_assistant("Displayed the reference documents.");
        } else {
            history.push_assistant(text);
        }
    }

    fn no_answer_sentinel(&self, mode: AnswerMode) -> &str {
        match mode {
            AnswerMode::DocumentSearch => &self.config.messages.search_no_answer,
            AnswerMode::Inquiry => &self.config.messages.inquiry_no_answer,
        }
    }

    fn no_match_message(&self, mode: AnswerMode) -> &str {
        match mode {
            AnswerMode::DocumentSearch => &self.config.messages.search_no_match,
            AnswerMode::Inquiry => &self.config.messages.inquiry_no_match,
        }
    }
}

/// Off-topic means an off-topic keyword matches and no corpus keyword does.
pub fn is_off_topic(prompt: &str, keywords: &KeywordSets) -> bool {
    let lower = prompt.to_lowercase();
    let off = keywords
        .off_topic
        .iter()
        .any(|word| lower.contains(word.as_str()));
    let corpus = keywords
        .corpus
        .iter()
        .any(|word| lower.contains(word.as_str()));
    off && !corpus
}

pub fn matches_topic(prompt: &str, keywords: &KeywordSets) -> bool {
    let lower = prompt.to_lowercase();
    keywords
        .topic
        .iter()
        .any(|word| lower.contains(word.as_str()))
}

/// Roster extraction over the turn's cited CSV files. Requires the query to
/// name a known department alongside enumeration and person words.
struct RosterFromCitations;

impl FallbackStrategy for RosterFromCitations {
    fn attempt(&self, cx: &StrategyContext<'_>) -> Option<ResolvedTurn> {
        let department = roster::department_from_prompt(cx.query, &cx.config.keywords)?;
        if !roster::is_roster_request(cx.query, &department, &cx.config.keywords) {
            return None;
        }
        let candidates = roster::csv_paths_from_sources(cx.sources, &cx.config.document_root);
        let table = roster::extract_from_files(
            &candidates,
            &department,
            cx.config.roster_min_rows,
            &cx.config.keywords,
        )?;
        Some(ResolvedTurn {
            outcome: FallbackOutcome::RosterRendered {
                department: table.department.clone(),
                row_count: table.row_count(),
            },
            sources: cx.sources.to_vec(),
            rendered: Some(table.to_markdown()),
        })
    }
}

/// Canned general-guidance message for queries matching the configured topic
/// keyword set.
struct TopicGuidance;

impl FallbackStrategy for TopicGuidance {
    fn attempt(&self, cx: &StrategyContext<'_>) -> Option<ResolvedTurn> {
        if !matches_topic(cx.query, &cx.config.keywords) {
            return None;
        }
        Some(ResolvedTurn {
            outcome: FallbackOutcome::GenericFallback {
                reason: TOPIC_GUIDANCE_REASON.to_string(),
            },
            sources: cx.sources.to_vec(),
            rendered: Some(TOPIC_GUIDANCE_BODY.to_string()),
        })
    }
}

/// Terminal strategy: the configured no-match message with the sources still
/// displayed. Always accepts.
struct CitedNoMatch;

impl FallbackStrategy for CitedNoMatch {
    fn attempt(&self, cx: &StrategyContext<'_>) -> Option<ResolvedTurn> {
        Some(ResolvedTurn {
            outcome: FallbackOutcome::NoMatch {
                message: cx.config.messages.inquiry_no_match.clone(),
            },
            sources: cx.sources.to_vec(),
            rendered: None,
        })
    }
}

/// Quota-branch roster extraction against the full document root. The
/// department falls back to the configured default when the query signals a
/// roster request without naming a known one.
struct RosterFromRoot;

impl FallbackStrategy for RosterFromRoot {
    fn attempt(&self, cx: &StrategyContext<'_>) -> Option<ResolvedTurn> {
        let keywords = &cx.config.keywords;
        let department = roster::department_from_prompt(cx.query, keywords)
            .unwrap_or_else(|| cx.config.default_department.to_lowercase());

        let lower = cx.query.to_lowercase();
        let wants_enumeration = keywords
            .enumeration
            .iter()
            .any(|word| lower.contains(word.as_str()));
        let names_people = keywords
            .person
            .iter()
            .any(|word| lower.contains(word.as_str()));
        if !(wants_enumeration && names_people) {
            return None;
        }

        match roster::extract_from_root(
            &cx.config.document_root,
            &department,
            cx.config.roster_min_rows,
            keywords,
        ) {
            Some(table) => Some(ResolvedTurn {
                outcome: FallbackOutcome::RosterRendered {
                    department: table.department.clone(),
                    row_count: table.row_count(),
                },
                sources: Vec::new(),
                rendered: Some(table.to_markdown()),
            }),
            None => Some(ResolvedTurn::bare(FallbackOutcome::NoMatch {
                message: cx.config.messages.roster_failed.clone(),
            })),
        }
    }
}

/// Naive keyword search over the document tree; accepts only when it finds
/// hits, so a zero-hit scan lets the original error surface.
struct KeywordSearchFallback;

impl FallbackStrategy for KeywordSearchFallback {
    fn attempt(&self, cx: &StrategyContext<'_>) -> Option<ResolvedTurn> {
        let hits = keyword_search(
            &cx.config.document_root,
            cx.query,
            cx.registry,
            &cx.config.supported_extensions,
            cx.config.max_search_hits,
            cx.config.snippet_limit,
        );
        if hits.is_empty() {
            return None;
        }
        Some(ResolvedTurn {
            outcome: FallbackOutcome::SearchHitsRendered { count: hits.len() },
            sources: hits,
            rendered: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentMetadata, Role};
    use crate::normalize::{GeneratorResponse, StructuredResponse};
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct FixedGenerator(GeneratorResponse);

    #[async_trait]
    impl AnswerGenerator for FixedGenerator {
        async fn generate(
            &self,
            _query: &str,
            _history: &[crate::models::ChatTurn],
            _context: &[DocumentChunk],
        ) -> Result<GeneratorResponse, GeneratorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingGenerator(&'static str);

    #[async_trait]
    impl AnswerGenerator for FailingGenerator {
        async fn generate(
            &self,
            _query: &str,
            _history: &[crate::models::ChatTurn],
            _context: &[DocumentChunk],
        ) -> Result<GeneratorResponse, GeneratorError> {
            Err(GeneratorError::from_message(self.0))
        }
    }

    const QUOTA_MESSAGE: &str = "Error code: 429 - You exceeded your current quota";

    fn temp_root(files: &[(&str, &[u8])]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("deskqa-cascade-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        for (name, contents) in files {
            std::fs::write(root.join(name), contents).unwrap();
        }
        root
    }

    fn resolver(generator: Arc<dyn AnswerGenerator>, root: &PathBuf) -> Resolver {
        let mut config = AppConfig::from_env();
        config.document_root = root.clone();
        Resolver::new(
            config,
            Arc::new(LoaderRegistry::with_defaults()),
            generator,
            None,
        )
    }

    fn structured(answer: &str, origins: &[&str]) -> GeneratorResponse {
        GeneratorResponse::Structured(StructuredResponse {
            answer: answer.to_string(),
            context: origins
                .iter()
                .map(|origin| DocumentChunk {
                    content: format!("content of {origin}"),
                    metadata: DocumentMetadata {
                        source: origin.to_string(),
                        page: None,
                    },
                })
                .collect(),
        })
    }

    #[tokio::test]
    async fn usable_text_resolves_to_answered() {
        let root = temp_root(&[]);
        let resolver = resolver(
            Arc::new(FixedGenerator(structured(
                "Travel must be booked via the portal.",
                &["policy.txt"],
            ))),
            &root,
        );
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn("What is the travel policy?", AnswerMode::Inquiry, &mut history)
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(
            turn.outcome,
            FallbackOutcome::Answered {
                text: "Travel must be booked via the portal.".to_string()
            }
        );
        assert_eq!(turn.sources.len(), 1);
        assert_eq!(history.turns().len(), 2);
        assert_eq!(history.turns()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn off_topic_query_wins_over_quota_recovery() {
        // Keyword search would find a match, but the off-topic guard must win.
        let root = temp_root(&[("weather.txt", b"weather weather weather".as_slice())]);
        let resolver = resolver(Arc::new(FailingGenerator(QUOTA_MESSAGE)), &root);
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn(
                "What is the weather forecast for tomorrow?",
                AnswerMode::Inquiry,
                &mut history,
            )
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert!(matches!(
            turn.outcome,
            FallbackOutcome::GenericFallback { .. }
        ));
    }

    #[tokio::test]
    async fn quota_error_with_roster_intent_scans_the_document_root() {
        let root = temp_root(&[(
            "employees.csv",
            b"name,department\nA,sales\nB,sales\nC,sales\nD,sales\nE,accounting\n".as_slice(),
        )]);
        let resolver = resolver(Arc::new(FailingGenerator(QUOTA_MESSAGE)), &root);
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn(
                "Please list all employees of the sales department",
                AnswerMode::Inquiry,
                &mut history,
            )
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(
            turn.outcome,
            FallbackOutcome::RosterRendered {
                department: "sales".to_string(),
                row_count: 4
            }
        );
        assert!(turn.rendered.unwrap().contains("| A | sales |"));
    }

    #[tokio::test]
    async fn quota_error_with_roster_intent_below_threshold_is_no_match() {
        let root = temp_root(&[(
            "employees.csv",
            b"name,department\nA,sales\nB,sales\nC,sales\n".as_slice(),
        )]);
        let resolver = resolver(Arc::new(FailingGenerator(QUOTA_MESSAGE)), &root);
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn(
                "Please list all employees of the sales department",
                AnswerMode::Inquiry,
                &mut history,
            )
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert!(matches!(turn.outcome, FallbackOutcome::NoMatch { .. }));
    }

    #[tokio::test]
    async fn quota_error_falls_back_to_keyword_search() {
        let root = temp_root(&[(
            "handbook.txt",
            b"The commuting allowance is paid monthly.".as_slice(),
        )]);
        let resolver = resolver(Arc::new(FailingGenerator(QUOTA_MESSAGE)), &root);
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn("commuting allowance", AnswerMode::Inquiry, &mut history)
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(turn.outcome, FallbackOutcome::SearchHitsRendered { count: 1 });
        assert_eq!(turn.sources.len(), 1);
    }

    #[tokio::test]
    async fn quota_error_with_zero_hits_surfaces_the_error() {
        let root = temp_root(&[]);
        let resolver = resolver(Arc::new(FailingGenerator(QUOTA_MESSAGE)), &root);
        let mut history = ConversationState::new();
        let result = resolver
            .resolve_turn(
                "company matter nothing indexed mentions",
                AnswerMode::Inquiry,
                &mut history,
            )
            .await;
        std::fs::remove_dir_all(&root).ok();

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_quota_errors_are_fatal_to_the_turn() {
        let root = temp_root(&[("handbook.txt", b"company handbook".as_slice())]);
        let resolver = resolver(
            Arc::new(FailingGenerator("connection reset by peer")),
            &root,
        );
        let mut history = ConversationState::new();
        let result = resolver
            .resolve_turn("company handbook question", AnswerMode::Inquiry, &mut history)
            .await;
        std::fs::remove_dir_all(&root).ok();

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_answer_with_sources_yields_no_match_with_sources() {
        let root = temp_root(&[]);
        let resolver = resolver(
            Arc::new(FixedGenerator(structured("", &["policy.txt"]))),
            &root,
        );
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn(
                "What does the company policy say about loans?",
                AnswerMode::Inquiry,
                &mut history,
            )
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert!(matches!(turn.outcome, FallbackOutcome::NoMatch { .. }));
        assert_eq!(turn.sources.len(), 1);
    }

    #[tokio::test]
    async fn sentinel_answer_counts_as_empty() {
        let root = temp_root(&[]);
        let config = AppConfig::from_env();
        let sentinel = config.messages.inquiry_no_answer.clone();
        let resolver = resolver(
            Arc::new(FixedGenerator(structured(&sentinel, &[]))),
            &root,
        );
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn("An internal company question", AnswerMode::Inquiry, &mut history)
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert!(matches!(turn.outcome, FallbackOutcome::NoMatch { .. }));
        assert!(turn.sources.is_empty());
    }

    #[tokio::test]
    async fn empty_answer_with_topic_match_yields_generic_guidance() {
        let root = temp_root(&[]);
        let resolver = resolver(
            Arc::new(FixedGenerator(structured("", &["report.txt"]))),
            &root,
        );
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn(
                "What are the company's environmental sustainability efforts?",
                AnswerMode::Inquiry,
                &mut history,
            )
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert!(matches!(
            turn.outcome,
            FallbackOutcome::GenericFallback { .. }
        ));
        assert!(turn.rendered.unwrap().contains("General perspectives"));
    }

    #[tokio::test]
    async fn empty_answer_with_cited_roster_csv_renders_the_roster() {
        let root = temp_root(&[(
            "members.csv",
            b"name,department\nA,engineering\nB,engineering\nC,engineering\nD,engineering\n"
                .as_slice(),
        )]);
        let cited = root.join("members.csv").display().to_string();
        let resolver = resolver(
            Arc::new(FixedGenerator(structured("", &[cited.as_str()]))),
            &root,
        );
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn(
                "Please list the staff members of the engineering department",
                AnswerMode::Inquiry,
                &mut history,
            )
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(
            turn.outcome,
            FallbackOutcome::RosterRendered {
                department: "engineering".to_string(),
                row_count: 4
            }
        );
    }

    #[tokio::test]
    async fn search_mode_reports_related_documents_when_answer_is_empty() {
        let root = temp_root(&[]);
        let config = AppConfig::from_env();
        let resolver = resolver(
            Arc::new(FixedGenerator(structured("", &["policy.txt"]))),
            &root,
        );
        let mut history = ConversationState::new();
        let turn = resolver
            .resolve_turn(
                "internal company document about expenses",
                AnswerMode::DocumentSearch,
                &mut history,
            )
            .await
            .unwrap();
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(
            turn.outcome,
            FallbackOutcome::NoMatch {
                message: config.messages.sources_found
            }
        );
        assert_eq!(turn.sources.len(), 1);
    }
}
