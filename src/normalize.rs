//! Pure JSON-to-record-tree normalization. No storage dependency: one
//! parsed document in, one validated `ExperimentDocument` out, so the
//! format-drift rules are testable without a database.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ImportError, Result};
use crate::model::{
    parse_timestamp, Action, AgentSummary, EpisodeSummary, ExperimentDocument, RoundRecord,
    RunConfig,
};

/// Raw document shape as written by the experiment runner. Every field is
/// optional here; which ones are actually required, and what the rest
/// default to, is decided in [`normalize`] so the error can name the file
/// and the exact missing key.
#[derive(Debug, Deserialize)]
struct RawDocument {
    timestamp: Option<String>,
    hostname: Option<String>,
    username: Option<String>,
    host_0: Option<String>,
    host_1: Option<String>,
    prompts: Option<RawPrompts>,
    config: Option<RawConfig>,
    elapsed_seconds: Option<f64>,
    agent_0: Option<RawAgentTotals>,
    agent_1: Option<RawAgentTotals>,
    episodes: Option<Vec<RawEpisode>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPrompts {
    system_prompt: Option<String>,
    reflection_template: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    num_episodes: Option<i64>,
    rounds_per_episode: Option<i64>,
    total_rounds: Option<i64>,
    history_window_size: Option<i64>,
    temperature: Option<f64>,
    reset_between_episodes: Option<bool>,
    reflection_type: Option<String>,
    model_0: Option<String>,
    model_1: Option<String>,
    decision_token_limit: Option<i64>,
    reflection_token_limit: Option<i64>,
    http_timeout: Option<f64>,
    force_decision_retries: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawAgentTotals {
    model: Option<String>,
    total_score: Option<i64>,
    total_cooperations: Option<i64>,
    overall_cooperation_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawEpisode {
    episode: Option<i64>,
    rounds: Option<Vec<RawRound>>,
    agent_0: Option<RawEpisodeStats>,
    agent_1: Option<RawEpisodeStats>,
}

#[derive(Debug, Deserialize)]
struct RawEpisodeStats {
    episode_score: Option<i64>,
    cooperations: Option<i64>,
    cooperation_rate: Option<f64>,
    reflection: Option<String>,
}

/// Round rows are flattened per agent in the source: `agent_0_action`,
/// `agent_1_action`, and so on in one object.
#[derive(Debug, Deserialize)]
struct RawRound {
    round: Option<i64>,
    agent_0_action: Option<String>,
    agent_0_reasoning: Option<String>,
    agent_0_payoff: Option<i64>,
    agent_0_episode_score: Option<i64>,
    agent_1_action: Option<String>,
    agent_1_reasoning: Option<String>,
    agent_1_payoff: Option<i64>,
    agent_1_episode_score: Option<i64>,
}

/// Normalize one parsed result document into the record tree.
///
/// `filename` is the name of the file on disk — identity comes from the
/// path, never from inside the JSON. `default_username` backfills the
/// `username` field for older format versions; without either, the
/// document is rejected.
pub fn normalize(
    value: &Value,
    filename: &str,
    default_username: Option<&str>,
) -> Result<ExperimentDocument> {
    let raw = RawDocument::deserialize(value).map_err(|e| ImportError::Malformed {
        file: filename.to_string(),
        source: e,
    })?;

    let ts_raw = raw
        .timestamp
        .ok_or_else(|| ImportError::missing(filename, "timestamp"))?;
    let timestamp = parse_timestamp(&ts_raw).ok_or_else(|| ImportError::InvalidTimestamp {
        file: filename.to_string(),
        value: ts_raw.clone(),
    })?;

    let username = raw
        .username
        .or_else(|| default_username.map(str::to_string))
        .ok_or_else(|| ImportError::missing(filename, "username"))?;

    let prompts = raw.prompts.unwrap_or_default();
    let config = raw.config.unwrap_or_default();
    let episodes_raw = raw
        .episodes
        .ok_or_else(|| ImportError::missing(filename, "episodes"))?;

    let hosts = [raw.host_0, raw.host_1];
    let cfg_models = [config.model_0.clone(), config.model_1.clone()];

    let mut agents = Vec::with_capacity(2);
    for (agent_idx, totals) in [raw.agent_0, raw.agent_1].into_iter().enumerate() {
        let block = format!("agent_{agent_idx}");
        let totals = totals.ok_or_else(|| ImportError::missing(filename, block.clone()))?;
        let require = |field: Option<i64>, name: &str| {
            field.ok_or_else(|| ImportError::missing(filename, format!("{block}.{name}")))
        };

        let model = totals
            .model
            .ok_or_else(|| ImportError::missing(filename, format!("{block}.model")))?;
        let total_score = require(totals.total_score, "total_score")?;
        let total_cooperations = require(totals.total_cooperations, "total_cooperations")?;
        let overall_cooperation_rate = totals.overall_cooperation_rate.ok_or_else(|| {
            ImportError::missing(filename, format!("{block}.overall_cooperation_rate"))
        })?;

        let mut episodes = Vec::with_capacity(episodes_raw.len());
        for (pos, episode) in episodes_raw.iter().enumerate() {
            episodes.push(normalize_episode(episode, agent_idx, pos, filename)?);
        }

        agents.push(AgentSummary {
            agent_idx,
            model,
            cfg_model: cfg_models[agent_idx].clone(),
            host: hosts[agent_idx].clone(),
            total_score,
            total_cooperations,
            overall_cooperation_rate,
            episodes,
        });
    }

    Ok(ExperimentDocument {
        filename: filename.to_string(),
        timestamp,
        hostname: raw.hostname,
        username,
        elapsed_seconds: raw.elapsed_seconds,
        config: RunConfig {
            num_episodes: config.num_episodes,
            rounds_per_episode: config.rounds_per_episode,
            total_rounds: config.total_rounds,
            history_window_size: config.history_window_size,
            temperature: config.temperature,
            reset_between_episodes: config.reset_between_episodes,
            reflection_type: config.reflection_type,
            decision_token_limit: config.decision_token_limit,
            reflection_token_limit: config.reflection_token_limit,
            http_timeout: config.http_timeout,
            force_decision_retries: config.force_decision_retries,
        },
        system_prompt: prompts.system_prompt.unwrap_or_default(),
        reflection_template: prompts.reflection_template.unwrap_or_default(),
        raw_json: value.to_string(),
        agents,
    })
}

fn normalize_episode(
    episode: &RawEpisode,
    agent_idx: usize,
    pos: usize,
    filename: &str,
) -> Result<EpisodeSummary> {
    let at =
        |field: String| ImportError::missing(filename, format!("episodes[{pos}].{field}"));

    let number = episode.episode.ok_or_else(|| at("episode".into()))?;
    let stats = match agent_idx {
        0 => episode.agent_0.as_ref(),
        _ => episode.agent_1.as_ref(),
    }
    .ok_or_else(|| at(format!("agent_{agent_idx}")))?;

    let score = stats
        .episode_score
        .ok_or_else(|| at(format!("agent_{agent_idx}.episode_score")))?;
    let cooperations = stats
        .cooperations
        .ok_or_else(|| at(format!("agent_{agent_idx}.cooperations")))?;
    let cooperation_rate = stats
        .cooperation_rate
        .ok_or_else(|| at(format!("agent_{agent_idx}.cooperation_rate")))?;
    let reflection = stats
        .reflection
        .clone()
        .ok_or_else(|| at(format!("agent_{agent_idx}.reflection")))?;

    let rounds_raw = episode.rounds.as_ref().ok_or_else(|| at("rounds".into()))?;
    let mut rounds = Vec::with_capacity(rounds_raw.len());
    for (round_pos, round) in rounds_raw.iter().enumerate() {
        rounds.push(normalize_round(round, agent_idx, pos, round_pos, filename)?);
    }

    Ok(EpisodeSummary {
        episode: number,
        score,
        cooperations,
        cooperation_rate,
        reflection,
        rounds,
    })
}

fn normalize_round(
    round: &RawRound,
    agent_idx: usize,
    episode_pos: usize,
    pos: usize,
    filename: &str,
) -> Result<RoundRecord> {
    let at = |field: String| {
        ImportError::missing(
            filename,
            format!("episodes[{episode_pos}].rounds[{pos}].{field}"),
        )
    };

    let number = round.round.ok_or_else(|| at("round".into()))?;
    let (action, reasoning, payoff, cumulative) = if agent_idx == 0 {
        (
            &round.agent_0_action,
            &round.agent_0_reasoning,
            round.agent_0_payoff,
            round.agent_0_episode_score,
        )
    } else {
        (
            &round.agent_1_action,
            &round.agent_1_reasoning,
            round.agent_1_payoff,
            round.agent_1_episode_score,
        )
    };

    let action_raw = action
        .as_deref()
        .ok_or_else(|| at(format!("agent_{agent_idx}_action")))?;
    let action = Action::parse(action_raw).ok_or_else(|| ImportError::InvalidAction {
        file: filename.to_string(),
        value: action_raw.to_string(),
    })?;
    let payoff = payoff.ok_or_else(|| at(format!("agent_{agent_idx}_payoff")))?;
    let cumulative_score =
        cumulative.ok_or_else(|| at(format!("agent_{agent_idx}_episode_score")))?;

    Ok(RoundRecord {
        round: number,
        action,
        payoff,
        cumulative_score,
        reasoning: reasoning.clone(),
    })
}
