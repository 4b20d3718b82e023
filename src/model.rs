use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single cooperate/defect decision. The runner historically emitted the
/// tokens in upper case; older files carry lower case, so parsing is
/// case-insensitive and storage is canonical lower case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Cooperate,
    Defect,
}

impl Action {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cooperate" => Some(Self::Cooperate),
            "defect" => Some(Self::Defect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cooperate => "cooperate",
            Self::Defect => "defect",
        }
    }
}

/// Parse a result-file timestamp. The runner writes naive local ISO-8601
/// (`datetime.now().isoformat()`); some files carry an RFC 3339 offset.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }
    None
}

/// Canonical text form stored in the database and used for the dedup key.
/// One fixed format so the same instant always compares equal, whatever
/// formatting the source file used.
pub fn timestamp_key(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// One normalized result file, ready for the loader. Root of the record
/// tree: experiment → 2 agents → episodes → rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentDocument {
    /// Name of the file on disk, never taken from inside the JSON.
    pub filename: String,
    pub timestamp: NaiveDateTime,
    pub hostname: Option<String>,
    pub username: String,
    pub elapsed_seconds: Option<f64>,
    pub config: RunConfig,
    pub system_prompt: String,
    pub reflection_template: String,
    /// Source document re-serialized verbatim, kept for reprocessing.
    pub raw_json: String,
    pub agents: Vec<AgentSummary>,
}

/// Run configuration as recorded by the runner. Every field is optional:
/// older format versions simply lack the newer tuning parameters, and a
/// missing knob must never fail an import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub num_episodes: Option<i64>,
    pub rounds_per_episode: Option<i64>,
    pub total_rounds: Option<i64>,
    pub history_window_size: Option<i64>,
    pub temperature: Option<f64>,
    pub reset_between_episodes: Option<bool>,
    pub reflection_type: Option<String>,
    pub decision_token_limit: Option<i64>,
    pub reflection_token_limit: Option<i64>,
    pub http_timeout: Option<f64>,
    pub force_decision_retries: Option<i64>,
}

/// Whole-run aggregate for one of the two agents, plus its episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_idx: usize,
    pub model: String,
    /// Model named in `config.model_{idx}`; absent in older files.
    pub cfg_model: Option<String>,
    /// Inference host the agent ran against; absent in older files.
    pub host: Option<String>,
    pub total_score: i64,
    pub total_cooperations: i64,
    /// Trusted from the source document, never recomputed.
    pub overall_cooperation_rate: f64,
    pub episodes: Vec<EpisodeSummary>,
}

/// Per-episode aggregate for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: i64,
    pub score: i64,
    pub cooperations: i64,
    pub cooperation_rate: f64,
    pub reflection: String,
    pub rounds: Vec<RoundRecord>,
}

/// One decision exchange as seen by one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: i64,
    pub action: Action,
    pub payoff: i64,
    /// Running score within the episode after this round.
    pub cumulative_score: i64,
    pub reasoning: Option<String>,
}
