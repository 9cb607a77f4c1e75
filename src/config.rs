// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Runtime settings.
//!
//! Loaded from an optional TOML file, then overridden by environment variables
//! named `DONATIONS_<SECTION>__<KEY>`, e.g. `DONATIONS_ENGINE__MAX_RETRIES=3`.
//! Every field has a default, so an empty configuration is valid.
//!
//! ```toml
//! [engine]
//! lock_timeout_ms = 2000
//! max_retries = 5
//! retry_backoff_ms = 5
//!
//! [limits]
//! max_attributed = 5000000   # cents; 0 disables the ceiling
//! max_anonymous = 1000000
//!
//! [store]
//! backend = "sqlite"
//! path = "ledger.db"
//! busy_timeout_ms = 5000
//! ```

use crate::base::Amount;
use crate::limits::DonationLimits;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "DONATIONS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub limits: LimitsConfig,
    pub store: StoreSettings,
}

impl Settings {
    /// Reads `file` (if given and present) and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(false));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// Retry and locking behavior of the [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest wait for a single row lock (memory store).
    pub lock_timeout_ms: u64,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
    /// Sleep before retry `n` is `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            max_retries: 5,
            retry_backoff_ms: 5,
        }
    }
}

/// Donation ceilings in cents. Zero disables a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_attributed: i64,
    pub max_anonymous: i64,
}

impl LimitsConfig {
    pub fn to_limits(self) -> DonationLimits {
        let ceiling = |cents: i64| (cents > 0).then_some(Amount(cents));
        DonationLimits {
            max_attributed: ceiling(self.max_attributed),
            max_anonymous: ceiling(self.max_anonymous),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_attributed: DonationLimits::DEFAULT_MAX_ATTRIBUTED.0,
            max_anonymous: DonationLimits::DEFAULT_MAX_ANONYMOUS.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: Backend,
    /// SQLite database file. Required for the sqlite backend.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    /// Pooled SQLite connections.
    pub pool_size: u32,
}

impl StoreSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            path: None,
            busy_timeout_ms: 5_000,
            pool_size: 8,
        }
    }
}
