//! Configuration resolution.
//!
//! `tx` has no CLI front-end, so the resolution chain is environment
//! variable over built-in default — the CLI-flag and config-file tiers a
//! front-end would add are the embedding host's concern, not the core's.

use std::env;

/// Retrieval score weights (§4.9 step 5, §9 open question resolved).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalWeights {
    pub recency: f64,
    pub outcome: f64,
    pub frequency: f64,
    pub feedback: f64,
}

impl Default for RetrievalWeights {
    fn default() -> Self {
        Self {
            recency: 0.15,
            outcome: 0.2,
            frequency: 0.1,
            feedback: 0.15,
        }
    }
}

/// Graph expansion parameters (§4.10).
#[derive(Debug, Clone, PartialEq)]
pub struct GraphExpansionConfig {
    pub depth: u32,
    pub decay_factor: f64,
    pub max_nodes: u32,
    /// `None` means all edge types are followed.
    pub edge_types: Option<Vec<String>>,
}

impl Default for GraphExpansionConfig {
    fn default() -> Self {
        Self {
            depth: 2,
            decay_factor: 0.7,
            max_nodes: 100,
            edge_types: None,
        }
    }
}

/// Which embedder backend to use, if any (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    Auto,
    OpenAi,
    Local,
    Noop,
}

impl EmbedderKind {
    fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "openai" => Some(Self::OpenAi),
            "local" => Some(Self::Local),
            "noop" => Some(Self::Noop),
            _ => None,
        }
    }
}

/// Fully resolved configuration for the `tx` engine (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub worker_pool_size: u32,
    pub heartbeat_interval_seconds: u64,
    pub lease_duration_seconds: u64,
    pub max_renewals: u32,
    pub dead_missed_heartbeats: u32,
    pub embedder: EmbedderKind,
    pub feedback_enabled: bool,
    pub retrieval_weights: RetrievalWeights,
    pub rrf_k: u32,
    pub graph_expansion: GraphExpansionConfig,
}

impl Config {
    /// Default database path used when no environment variable is set.
    pub const DEFAULT_DB_PATH: &str = "tx.db";

    /// Build a config from the environment, falling back to defaults chosen
    /// so a renewal tick comfortably fits inside one lease window (§9).
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("TX_DB_PATH").unwrap_or_else(|_| Self::DEFAULT_DB_PATH.to_owned()),
            worker_pool_size: env_parse("TX_WORKER_POOL_SIZE").unwrap_or(4),
            heartbeat_interval_seconds: env_parse("TX_HEARTBEAT_INTERVAL_SECONDS").unwrap_or(10),
            lease_duration_seconds: env_parse("TX_LEASE_DURATION_SECONDS").unwrap_or(60),
            max_renewals: env_parse("TX_MAX_RENEWALS").unwrap_or(5),
            dead_missed_heartbeats: env_parse("TX_DEAD_MISSED_HEARTBEATS").unwrap_or(3),
            embedder: env::var("TX_EMBEDDER")
                .ok()
                .and_then(|s| EmbedderKind::from_str_loose(&s))
                .unwrap_or(EmbedderKind::Noop),
            feedback_enabled: env_parse("TX_FEEDBACK_ENABLED").unwrap_or(true),
            retrieval_weights: RetrievalWeights::default(),
            rrf_k: env_parse("TX_RRF_K").unwrap_or(60),
            graph_expansion: GraphExpansionConfig::default(),
        }
    }

    /// Build a config from an explicit path (useful for tests).
    pub fn with_db_path(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            db_path: Self::DEFAULT_DB_PATH.to_owned(),
            worker_pool_size: 4,
            heartbeat_interval_seconds: 10,
            lease_duration_seconds: 60,
            max_renewals: 5,
            dead_missed_heartbeats: 3,
            embedder: EmbedderKind::Noop,
            feedback_enabled: true,
            retrieval_weights: RetrievalWeights::default(),
            rrf_k: 60,
            graph_expansion: GraphExpansionConfig::default(),
        }
    }

    /// SQLite connection URL for this config's `db_path`.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_db_path() {
        let cfg = Config::with_db_path(Config::DEFAULT_DB_PATH);
        assert_eq!(cfg.db_path, "tx.db");
    }

    #[test]
    fn database_url_formats_sqlite_uri() {
        let cfg = Config::with_db_path("/tmp/example.db");
        assert_eq!(cfg.database_url(), "sqlite:///tmp/example.db?mode=rwc");
    }

    #[test]
    fn lease_and_renewal_defaults_fit_together() {
        let cfg = Config::defaults();
        // A renewal roughly every third of the lease leaves margin before expiry.
        assert!(cfg.lease_duration_seconds / 3 > 0);
        assert!(cfg.max_renewals > 0);
    }

    #[test]
    fn retrieval_weights_default_are_positive_and_bounded() {
        let w = RetrievalWeights::default();
        for v in [w.recency, w.outcome, w.frequency, w.feedback] {
            assert!(v > 0.0 && v < 1.0);
        }
    }

    #[test]
    fn graph_expansion_default_matches_spec() {
        let g = GraphExpansionConfig::default();
        assert_eq!(g.depth, 2);
        assert_eq!(g.decay_factor, 0.7);
        assert_eq!(g.max_nodes, 100);
        assert!(g.edge_types.is_none());
    }
}
