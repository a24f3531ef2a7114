use std::env;
use std::path::PathBuf;

/// Keyword sets driving the intent classifiers. Supplied as configuration so
/// the heuristics stay locale-adaptable and testable.
#[derive(Clone, Debug)]
pub struct KeywordSets {
    /// Words signaling enumeration intent ("list", "roster", ...).
    pub enumeration: Vec<String>,
    /// Words signaling a person-collection ("employee", "member", ...).
    pub person: Vec<String>,
    /// Substrings identifying department-like table headers.
    pub department_columns: Vec<String>,
    /// Known department names matched against the prompt.
    pub departments: Vec<String>,
    /// Topic keywords triggering the generic guidance fallback.
    pub topic: Vec<String>,
    /// Keywords marking a query as unrelated to the corpus.
    pub off_topic: Vec<String>,
    /// Keywords marking a query as corpus-related, overriding off-topic hits.
    pub corpus: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct MessageConfig {
    /// Sentinel the generator emits in search mode when nothing matched.
    pub search_no_answer: String,
    /// Sentinel the generator emits in inquiry mode when nothing matched.
    pub inquiry_no_answer: String,
    /// Shown in search mode when no documents relate to the input.
    pub search_no_match: String,
    /// Shown in inquiry mode when no strategy produced anything.
    pub inquiry_no_match: String,
    /// Shown in search mode when the answer is empty but sources exist.
    pub sources_found: String,
    /// Shown when the roster extractor finds no acceptable table.
    pub roster_failed: String,
}

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Root of the ingested document tree scanned by the fallback strategies.
    pub document_root: PathBuf,
    /// Citation count cap after dedup; `None` keeps every source.
    pub retrieval_top_k: Option<usize>,
    /// Snippet length cap in code points.
    pub snippet_limit: usize,
    /// Minimum matched rows before a roster table is accepted.
    pub roster_min_rows: usize,
    /// Overall hit cap for the keyword fallback searcher.
    pub max_search_hits: usize,
    /// File extensions the loader registry handles, with leading dot.
    pub supported_extensions: Vec<String>,
    /// Department used when a roster request names no known department.
    pub default_department: String,
    pub keywords: KeywordSets,
    pub messages: MessageConfig,
    pub generator: GeneratorConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("DESKQA_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            document_root: env::var("DESKQA_DOCUMENT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            retrieval_top_k: env::var("DESKQA_RETRIEVAL_TOP_K")
                .ok()
                .and_then(|v| v.parse().ok()),
            snippet_limit: env_usize("DESKQA_SNIPPET_LIMIT", 280),
            roster_min_rows: env_usize("DESKQA_ROSTER_MIN_ROWS", 4),
            max_search_hits: env_usize("DESKQA_MAX_SEARCH_HITS", 5),
            supported_extensions: env_list("DESKQA_SUPPORTED_EXTENSIONS", &[".txt", ".md", ".csv"]),
            default_department: env::var("DESKQA_DEFAULT_DEPARTMENT")
                .unwrap_or_else(|_| "Human Resources".to_string()),
            keywords: KeywordSets {
                enumeration: env_list(
                    "DESKQA_ENUMERATION_KEYWORDS",
                    &["list", "roster", "enumerate", "summarize", "overview"],
                ),
                person: env_list(
                    "DESKQA_PERSON_KEYWORDS",
                    &["employee", "member", "staff", "personnel", "people"],
                ),
                department_columns: env_list(
                    "DESKQA_DEPARTMENT_COLUMN_KEYWORDS",
                    &["department", "dept", "division", "unit", "team"],
                ),
                departments: env_list(
                    "DESKQA_DEPARTMENTS",
                    &[
                        "human resources",
                        "general affairs",
                        "sales",
                        "engineering",
                        "accounting",
                    ],
                ),
                topic: env_list(
                    "DESKQA_TOPIC_KEYWORDS",
                    &[
                        "environment",
                        "environmental",
                        "sustainability",
                        "esg",
                        "carbon",
                        "decarbon",
                        "iso 14001",
                    ],
                ),
                off_topic: env_list(
                    "DESKQA_OFF_TOPIC_KEYWORDS",
                    &[
                        "weather",
                        "forecast",
                        "lottery",
                        "horoscope",
                        "recipe",
                        "movie",
                        "celebrity",
                        "sports score",
                    ],
                ),
                corpus: env_list(
                    "DESKQA_CORPUS_KEYWORDS",
                    &[
                        "company",
                        "internal",
                        "department",
                        "employee",
                        "policy",
                        "regulation",
                        "document",
                        "shareholder",
                        "benefit",
                        "office",
                    ],
                ),
            },
            messages: MessageConfig {
                search_no_answer: env::var("DESKQA_SEARCH_NO_ANSWER_SENTINEL")
                    .unwrap_or_else(|_| "No matching document.".to_string()),
                inquiry_no_answer: env::var("DESKQA_INQUIRY_NO_ANSWER_SENTINEL").unwrap_or_else(
                    |_| "The information needed to answer was not found.".to_string(),
                ),
                search_no_match: env::var("DESKQA_SEARCH_NO_MATCH_MESSAGE").unwrap_or_else(|_| {
                    "No internal documents related to the input were found.".to_string()
                }),
                inquiry_no_match: env::var("DESKQA_INQUIRY_NO_MATCH_MESSAGE").unwrap_or_else(
                    |_| "The information needed to answer was not found.".to_string(),
                ),
                sources_found: env::var("DESKQA_SOURCES_FOUND_MESSAGE").unwrap_or_else(|_| {
                    "Related internal documents were found. Please check the references below."
                        .to_string()
                }),
                roster_failed: env::var("DESKQA_ROSTER_FAILED_MESSAGE").unwrap_or_else(|_| {
                    "Searching the roster tables for that department failed.".to_string()
                }),
            },
            generator: GeneratorConfig {
                base_url: env::var("DESKQA_GENERATOR_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: env::var("DESKQA_GENERATOR_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                api_key: env::var("OPENAI_API_KEY").ok(),
                temperature: env::var("DESKQA_GENERATOR_TEMPERATURE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.1),
            },
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(name: &str, defaults: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(|item| item.trim().to_ascii_lowercase())
            .filter(|item| !item.is_empty())
            .collect(),
        Err(_) => defaults.iter().map(|item| item.to_string()).collect(),
    }
}
