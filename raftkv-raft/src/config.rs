//! Tunable timing for a node. `node_id`/`node_ids` are deliberately not
//! here -- they arrive only via the one-shot `raft_init` wire message
//! (see `crate::node`), never from a config file or CLI flag.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RaftConfig {
    /// Base election timeout; the effective timeout is this multiplied
    /// by a uniform random factor in [1, 2).
    pub election_timeout: Duration,
    /// Period of the leader's replication tick, which drives both
    /// heartbeats and progress for lagging peers. Must be strictly less
    /// than the minimum possible election timeout.
    pub replication_tick: Duration,
    /// Upper bound on how long the transport's non-blocking receive may
    /// go before the loop checks timers again.
    pub idle_sleep: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            election_timeout: Duration::from_millis(2000),
            replication_tick: Duration::from_millis(300),
            idle_sleep: Duration::from_millis(1),
        }
    }
}

impl RaftConfig {
    /// Load overrides from a `config`-crate source (e.g. a `Config.toml`
    /// or environment layer), falling back to defaults for anything not
    /// present. Unknown keys are ignored; malformed values are a startup
    /// error, not a panic.
    pub fn from_sources(sources: config::Config) -> raftkv_core::error::Result<RaftConfig> {
        let mut cfg = RaftConfig::default();
        if let Ok(ms) = sources.get_int("election_timeout_ms") {
            cfg.election_timeout = Duration::from_millis(ms as u64);
        }
        if let Ok(ms) = sources.get_int("replication_tick_ms") {
            cfg.replication_tick = Duration::from_millis(ms as u64);
        }
        if cfg.replication_tick >= cfg.election_timeout {
            return Err(raftkv_core::error::Error::Fatal(format!(
                "replication_tick ({:?}) must be less than election_timeout ({:?})",
                cfg.replication_tick, cfg.election_timeout
            )));
        }
        Ok(cfg)
    }
}
