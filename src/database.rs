use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::{ImportError, Result};
use crate::model::{timestamp_key, ExperimentDocument};

/// Handle on the forge results database.
///
/// Opened once per batch; the schema is created on open and every file's
/// insert sequence runs inside a single transaction, so readers never see
/// a partial experiment.
pub struct ForgeDb {
    conn: Connection,
}

impl ForgeDb {
    /// Create or open the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ImportError::Config(format!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            ImportError::Config(format!("cannot open database {}: {e}", path.display()))
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ImportError::Config(format!("cannot open in-memory database: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Cascading deletes depend on FK enforcement, which SQLite leaves
        // off per connection unless asked.
        conn.pragma_update(None, "foreign_keys", true)?;
        let db = Self { conn };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Create the database schema
    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute(
            r#"CREATE TABLE IF NOT EXISTS experiments (
                experiment_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                hostname TEXT,
                username TEXT NOT NULL,
                elapsed_seconds REAL,
                cfg_num_episodes INTEGER,
                cfg_rounds_per_episode INTEGER,
                cfg_total_rounds INTEGER,
                cfg_history_window_size INTEGER,
                cfg_temperature REAL,
                cfg_reset_between_episodes INTEGER,
                cfg_reflection_type TEXT,
                cfg_decision_token_limit INTEGER,
                cfg_reflection_token_limit INTEGER,
                cfg_http_timeout REAL,
                cfg_force_decision_retries INTEGER,
                system_prompt TEXT NOT NULL DEFAULT '',
                reflection_template TEXT NOT NULL DEFAULT '',
                raw_json TEXT NOT NULL,
                imported_at TEXT NOT NULL,
                UNIQUE(filename, timestamp)
            )"#,
            [],
        )?;

        self.conn.execute(
            r#"CREATE TABLE IF NOT EXISTS agents (
                agent_id TEXT PRIMARY KEY,
                experiment_id TEXT NOT NULL
                    REFERENCES experiments(experiment_id) ON DELETE CASCADE,
                agent_idx INTEGER NOT NULL,
                model TEXT NOT NULL,
                cfg_model TEXT,
                host TEXT,
                total_score INTEGER NOT NULL,
                total_cooperations INTEGER NOT NULL,
                overall_cooperation_rate REAL NOT NULL,
                UNIQUE(experiment_id, agent_idx)
            )"#,
            [],
        )?;

        self.conn.execute(
            r#"CREATE TABLE IF NOT EXISTS episodes (
                episode_id TEXT PRIMARY KEY,
                experiment_id TEXT NOT NULL
                    REFERENCES experiments(experiment_id) ON DELETE CASCADE,
                agent_idx INTEGER NOT NULL,
                episode INTEGER NOT NULL,
                score INTEGER NOT NULL,
                cooperations INTEGER NOT NULL,
                cooperation_rate REAL NOT NULL,
                reflection TEXT NOT NULL,
                UNIQUE(experiment_id, agent_idx, episode)
            )"#,
            [],
        )?;

        self.conn.execute(
            r#"CREATE TABLE IF NOT EXISTS rounds (
                round_id TEXT PRIMARY KEY,
                episode_id TEXT NOT NULL
                    REFERENCES episodes(episode_id) ON DELETE CASCADE,
                round INTEGER NOT NULL,
                action TEXT NOT NULL,
                payoff INTEGER NOT NULL,
                ep_cumulative_score INTEGER NOT NULL,
                reasoning TEXT,
                UNIQUE(episode_id, round)
            )"#,
            [],
        )?;

        // Indexes for the access paths the importer itself uses.
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_experiments_timestamp ON experiments(timestamp DESC)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_episodes_experiment ON episodes(experiment_id)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rounds_episode ON rounds(episode_id)",
            [],
        )?;

        Ok(())
    }

    // ========================================================================
    // Dedup gate
    // ========================================================================

    /// Is an experiment with this (filename, timestamp) pair already loaded?
    pub fn experiment_exists(&self, filename: &str, timestamp: &str) -> Result<bool> {
        let result = self.conn.query_row(
            "SELECT 1 FROM experiments WHERE filename = ?1 AND timestamp = ?2",
            params![filename, timestamp],
            |_| Ok(()),
        );

        match result {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Transactional loader
    // ========================================================================

    /// Insert one normalized experiment tree as a single atomic unit:
    /// experiment row, then agents, then episodes, then rounds. Any failure
    /// unwinds the transaction and leaves nothing visible.
    ///
    /// Returns the new experiment id. A uniqueness violation on
    /// (filename, timestamp) surfaces as a `Storage` error the caller
    /// translates into a skip (see `ImportError::is_duplicate_experiment`).
    pub fn load_experiment(&mut self, doc: &ExperimentDocument) -> Result<String> {
        let tx = self.conn.transaction()?;

        let experiment_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO experiments (
                experiment_id, filename, timestamp, hostname, username,
                elapsed_seconds, cfg_num_episodes, cfg_rounds_per_episode,
                cfg_total_rounds, cfg_history_window_size, cfg_temperature,
                cfg_reset_between_episodes, cfg_reflection_type,
                cfg_decision_token_limit, cfg_reflection_token_limit,
                cfg_http_timeout, cfg_force_decision_retries,
                system_prompt, reflection_template, raw_json, imported_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                       ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            params![
                experiment_id,
                doc.filename,
                timestamp_key(&doc.timestamp),
                doc.hostname,
                doc.username,
                doc.elapsed_seconds,
                doc.config.num_episodes,
                doc.config.rounds_per_episode,
                doc.config.total_rounds,
                doc.config.history_window_size,
                doc.config.temperature,
                doc.config.reset_between_episodes,
                doc.config.reflection_type,
                doc.config.decision_token_limit,
                doc.config.reflection_token_limit,
                doc.config.http_timeout,
                doc.config.force_decision_retries,
                doc.system_prompt,
                doc.reflection_template,
                doc.raw_json,
                Utc::now().to_rfc3339(),
            ],
        )?;

        for agent in &doc.agents {
            tx.execute(
                "INSERT INTO agents (
                    agent_id, experiment_id, agent_idx, model, cfg_model, host,
                    total_score, total_cooperations, overall_cooperation_rate
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    Uuid::new_v4().to_string(),
                    experiment_id,
                    agent.agent_idx as i64,
                    agent.model,
                    agent.cfg_model,
                    agent.host,
                    agent.total_score,
                    agent.total_cooperations,
                    agent.overall_cooperation_rate,
                ],
            )?;

            for episode in &agent.episodes {
                let episode_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO episodes (
                        episode_id, experiment_id, agent_idx, episode,
                        score, cooperations, cooperation_rate, reflection
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        episode_id,
                        experiment_id,
                        agent.agent_idx as i64,
                        episode.episode,
                        episode.score,
                        episode.cooperations,
                        episode.cooperation_rate,
                        episode.reflection,
                    ],
                )?;

                for round in &episode.rounds {
                    tx.execute(
                        "INSERT INTO rounds (
                            round_id, episode_id, round, action,
                            payoff, ep_cumulative_score, reasoning
                         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            Uuid::new_v4().to_string(),
                            episode_id,
                            round.round,
                            round.action.as_str(),
                            round.payoff,
                            round.cumulative_score,
                            round.reasoning,
                        ],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(experiment_id)
    }

    // ========================================================================
    // Audit helpers
    // ========================================================================

    /// Row counts across all four tables.
    pub fn table_counts(&self) -> Result<TableCounts> {
        Ok(TableCounts {
            experiments: self.count("experiments")?,
            agents: self.count("agents")?,
            episodes: self.count("episodes")?,
            rounds: self.count("rounds")?,
        })
    }

    /// Episode rows for one agent of one experiment.
    pub fn count_episodes(&self, experiment_id: &str, agent_idx: usize) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM episodes WHERE experiment_id = ?1 AND agent_idx = ?2",
            params![experiment_id, agent_idx as i64],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Round rows across every episode of one experiment.
    pub fn count_rounds(&self, experiment_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM rounds r
             JOIN episodes e ON e.episode_id = r.episode_id
             WHERE e.experiment_id = ?1",
            params![experiment_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count(&self, table: &str) -> Result<i64> {
        let count =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
        Ok(count)
    }
}

/// Row counts across the four tables, for audit logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    pub experiments: i64,
    pub agents: i64,
    pub episodes: i64,
    pub rounds: i64,
}
