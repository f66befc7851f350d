//! Configuration management using environment variables

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;

/// Harness configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Executor configuration
    pub executor: ExecutorConfig,

    /// Per-flow defaults
    pub flow: FlowConfig,
}

/// Executor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Size of the tokio worker-thread pool the harness is expected to run on
    pub pool_size: usize,

    /// Number of concurrent pipeline workers spawned per testing flow
    pub workers_per_flow: usize,
}

/// Defaults applied to every testing flow unless overridden by params
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// Awaiter polling interval in milliseconds
    pub poll_interval_ms: u64,

    /// Credit assigned to every user created on the target
    pub user_account_amount: i64,

    /// Slow-start ramp step interval in milliseconds
    pub ramp_interval_ms: u64,
}

impl HarnessConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Ok(Self {
            executor: ExecutorConfig {
                pool_size: env::var("EXECUTOR_POOL_SIZE")
                    .unwrap_or_else(|_| "16".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid EXECUTOR_POOL_SIZE: {}", e)))?,
                workers_per_flow: env::var("WORKERS_PER_FLOW")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid WORKERS_PER_FLOW: {}", e)))?,
            },
            flow: FlowConfig {
                poll_interval_ms: env::var("POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid POLL_INTERVAL_MS: {}", e)))?,
                user_account_amount: env::var("USER_ACCOUNT_AMOUNT")
                    .unwrap_or_else(|_| i64::MAX.to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid USER_ACCOUNT_AMOUNT: {}", e)))?,
                ramp_interval_ms: env::var("RAMP_INTERVAL_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .map_err(|e| Error::config(format!("Invalid RAMP_INTERVAL_MS: {}", e)))?,
            },
        })
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig {
                pool_size: 16,
                workers_per_flow: 100,
            },
            flow: FlowConfig {
                poll_interval_ms: 100,
                user_account_amount: i64::MAX,
                ramp_interval_ms: 1000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.executor.pool_size, 16);
        assert_eq!(config.executor.workers_per_flow, 100);
        assert_eq!(config.flow.poll_interval_ms, 100);
        assert_eq!(config.flow.ramp_interval_ms, 1000);
    }

    #[test]
    fn test_from_env_uses_defaults() {
        // No harness variables set in the test environment
        let config = HarnessConfig::from_env().unwrap();
        assert_eq!(config.executor.pool_size, 16);
        assert_eq!(config.flow.user_account_amount, i64::MAX);
    }
}
