//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;

use crate::game::physics::MovementStats;
use crate::util::rate_limit::INPUT_RATE_LIMIT;
use crate::util::time::{interval_secs, ticks_for_millis, DEFAULT_SEND_RATE, DEFAULT_TICK_RATE};

/// Default squared-distance threshold for prediction errors
pub const DEFAULT_RECONCILE_EPSILON: f32 = 1e-4;

/// Simulation tuning shared by client and server roles
#[derive(Clone, Debug)]
pub struct SimSettings {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// World state messages per second (server)
    pub send_rate: u32,
    /// Squared position error above which the client replays
    pub reconcile_epsilon: f32,
    /// Age of the last server state after which the client stops trusting it
    pub max_stale_server_ms: u32,
    /// Force neutral input while the server state is stale
    pub freeze_on_stale: bool,
    /// Let the rate adjuster scale the client tick interval
    pub time_dilation: bool,
    /// Remote entities are interpolated one send interval behind
    pub client_interp: bool,
    /// Bleed off small positive leads as well as large ones
    pub aggressive_lag_reduction: bool,
    /// Upper bound on ticks run per clock advance
    pub max_catchup_ticks: u32,
    /// Upper bound on frames per outbound input batch
    pub max_batch_frames: u32,
    /// Encode orientations with smallest-three quantization
    pub quat_compression: bool,
    /// Probability per server tick of nudging every entity (debug aid)
    pub debug_physics_error_chance: f32,
    /// Movement model constants
    pub movement: MovementStats,
}

impl SimSettings {
    /// Fixed step duration in seconds
    pub fn tick_interval(&self) -> f32 {
        interval_secs(self.tick_rate)
    }

    /// World state send interval in seconds
    pub fn send_interval(&self) -> f32 {
        interval_secs(self.send_rate)
    }

    /// Staleness bound expressed in ticks
    pub fn max_stale_ticks(&self) -> u32 {
        ticks_for_millis(self.max_stale_server_ms, self.tick_rate)
    }
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            send_rate: DEFAULT_SEND_RATE,
            reconcile_epsilon: DEFAULT_RECONCILE_EPSILON,
            max_stale_server_ms: 500,
            freeze_on_stale: false,
            time_dilation: true,
            client_interp: true,
            aggressive_lag_reduction: true,
            max_catchup_ticks: 8,
            max_batch_frames: 64,
            quat_compression: true,
            debug_physics_error_chance: 0.0,
            movement: MovementStats::default(),
        }
    }
}

/// Simulated network conditions applied to loopback links
#[derive(Clone, Debug)]
pub struct LinkSettings {
    pub latency_min_ms: u32,
    pub latency_max_ms: u32,
    /// Percentage of sequenced packets dropped (0-100)
    pub packet_loss_percent: u32,
}

impl LinkSettings {
    /// A lossless link with zero latency
    pub fn ideal() -> Self {
        Self {
            latency_min_ms: 0,
            latency_max_ms: 0,
            packet_loss_percent: 0,
        }
    }

    /// Mean one-way latency in milliseconds
    pub fn mean_latency_ms(&self) -> u32 {
        let max = self.latency_max_ms.max(self.latency_min_ms);
        self.latency_min_ms + (max - self.latency_min_ms) / 2
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            latency_min_ms: 30,
            latency_max_ms: 60,
            packet_loss_percent: 2,
        }
    }
}

/// Soak run settings for the binary
#[derive(Clone, Debug)]
pub struct SoakSettings {
    pub matches: usize,
    pub clients_per_match: usize,
    /// Zero runs until interrupted
    pub duration_secs: u64,
    pub seed: u64,
    /// Input batches per second accepted from a single connection
    pub input_rate_limit: u32,
}

impl Default for SoakSettings {
    fn default() -> Self {
        Self {
            matches: 2,
            clients_per_match: 4,
            duration_secs: 30,
            seed: 0x7ac0_5eed,
            input_rate_limit: INPUT_RATE_LIMIT,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
    pub sim: SimSettings,
    pub link: LinkSettings,
    pub soak: SoakSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = SimSettings::default();
        let sim = SimSettings {
            tick_rate: parse_var("TICK_RATE", defaults.tick_rate)?,
            send_rate: parse_var("SEND_RATE", defaults.send_rate)?,
            reconcile_epsilon: parse_var("RECONCILE_EPSILON", defaults.reconcile_epsilon)?,
            max_stale_server_ms: parse_var("MAX_STALE_SERVER_MS", defaults.max_stale_server_ms)?,
            freeze_on_stale: parse_var("FREEZE_ON_STALE", defaults.freeze_on_stale)?,
            time_dilation: parse_var("TIME_DILATION", defaults.time_dilation)?,
            client_interp: parse_var("CLIENT_INTERP", defaults.client_interp)?,
            aggressive_lag_reduction: parse_var(
                "AGGRESSIVE_LAG_REDUCTION",
                defaults.aggressive_lag_reduction,
            )?,
            max_catchup_ticks: parse_var("MAX_CATCHUP_TICKS", defaults.max_catchup_ticks)?,
            max_batch_frames: parse_var("MAX_BATCH_FRAMES", defaults.max_batch_frames)?,
            quat_compression: parse_var("QUAT_COMPRESSION", defaults.quat_compression)?,
            debug_physics_error_chance: parse_var(
                "DEBUG_PHYSICS_ERROR_CHANCE",
                defaults.debug_physics_error_chance,
            )?,
            movement: defaults.movement,
        };

        if sim.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if sim.send_rate == 0 {
            return Err(ConfigError::Invalid("SEND_RATE"));
        }
        if sim.max_batch_frames == 0 {
            return Err(ConfigError::Invalid("MAX_BATCH_FRAMES"));
        }

        let link_defaults = LinkSettings::default();
        let link = LinkSettings {
            latency_min_ms: parse_var("LINK_LATENCY_MIN_MS", link_defaults.latency_min_ms)?,
            latency_max_ms: parse_var("LINK_LATENCY_MAX_MS", link_defaults.latency_max_ms)?,
            packet_loss_percent: parse_var("LINK_PACKET_LOSS", link_defaults.packet_loss_percent)?,
        };
        if link.packet_loss_percent > 100 {
            return Err(ConfigError::Invalid("LINK_PACKET_LOSS"));
        }

        let soak_defaults = SoakSettings::default();
        let soak = SoakSettings {
            matches: parse_var("SOAK_MATCHES", soak_defaults.matches)?,
            clients_per_match: parse_var("SOAK_CLIENTS", soak_defaults.clients_per_match)?,
            duration_secs: parse_var("SOAK_SECONDS", soak_defaults.duration_secs)?,
            seed: parse_var("SOAK_SEED", soak_defaults.seed)?,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", soak_defaults.input_rate_limit)?,
        };

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: parse_var("LOG_JSON", false)?,
            sim,
            link,
            soak,
        })
    }
}

/// Read `name` from the environment, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::Invalid(name)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
