// Copyright 2025 Webmobix Solutions AG
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUTHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime configuration for model runs.
//!
//! Settings come from the command line; authentication is resolved
//! separately by [`crate::auth`].

use std::path::PathBuf;
use std::time::Duration;

/// Which spreadsheet a run drives.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTarget {
    /// An already provisioned model sheet.
    Sheet(String),
    /// A template to copy into the owner's folder first.
    Template { url: String, owner: String },
}

/// Backoff settings for transient Google API failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: usize,
    /// Base wait for rate limits and generic network errors.
    pub base_delay: Duration,
    /// Base wait after TLS handshake failures.
    pub tls_base_delay: Duration,
    /// Cap on the exponential multiplier.
    pub max_multiplier: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            tls_base_delay: Duration::from_secs(3),
            max_multiplier: 16,
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)`, multiplier capped.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as u32;
        let multiplier = 2_u64.saturating_pow(exponent).min(self.max_multiplier);
        self.base_delay * multiplier as u32
    }

    /// `base * attempt`, with the TLS base after handshake failures.
    pub fn linear(&self, attempt: usize, tls: bool) -> Duration {
        let base = if tls {
            self.tls_base_delay
        } else {
            self.base_delay
        };
        base * attempt.min(u32::MAX as usize) as u32
    }
}

/// Knobs for the sensitivity grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensitivitySettings {
    /// Cap rates and prices per header.
    pub grid_size: usize,
    /// Wait after each input write before reading recalculated outputs.
    pub settle_delay: Duration,
    /// Extra reads when an output cell comes back empty.
    pub read_retries: usize,
}

impl Default for SensitivitySettings {
    fn default() -> Self {
        Self {
            grid_size: 5,
            settle_delay: Duration::from_millis(100),
            read_retries: 2,
        }
    }
}

/// Settings for one `run` invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: ModelTarget,
    /// Underwriting payload JSON.
    pub payload_path: PathBuf,
    /// Where the run output is written; stdout when unset.
    pub output_path: Option<PathBuf>,
    /// Drive folder that owner folders are created under.
    pub parent_folder: Option<String>,
    /// Plan only, touch nothing remote beyond reading the mapping.
    pub dry_run: bool,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn new(
        target: ModelTarget,
        payload_path: PathBuf,
        output_path: Option<PathBuf>,
        parent_folder: Option<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            target,
            payload_path,
            output_path,
            parent_folder,
            dry_run,
            retry: RetryPolicy::default(),
        }
    }

    /// Checks everything that can be checked before talking to Google.
    ///
    /// # Errors
    ///
    /// * If the sheet id, template URL or owner is empty
    /// * If the payload file does not exist or is not a file
    /// * If the retry policy allows no attempt
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.target {
            ModelTarget::Sheet(sheet_id) if sheet_id.trim().is_empty() => {
                anyhow::bail!("Sheet ID cannot be empty");
            }
            ModelTarget::Template { url, .. } if url.trim().is_empty() => {
                anyhow::bail!("Template URL cannot be empty");
            }
            ModelTarget::Template { owner, .. } if owner.trim().is_empty() => {
                anyhow::bail!("Owner cannot be empty when copying a template");
            }
            _ => {}
        }

        if !self.payload_path.exists() {
            anyhow::bail!("Payload file does not exist: {:?}", self.payload_path);
        }

        if !self.payload_path.is_file() {
            anyhow::bail!("Payload path is not a file: {:?}", self.payload_path);
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("Retry policy must allow at least one attempt");
        }

        Ok(())
    }
}

impl SensitivitySettings {
    pub fn new(settle_ms: u64, read_retries: usize) -> Self {
        Self {
            settle_delay: Duration::from_millis(settle_ms),
            read_retries,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.grid_size == 0 {
            anyhow::bail!("Sensitivity grid size must be positive");
        }
        if self.settle_delay.is_zero() {
            anyhow::bail!("Settle delay must be positive");
        }
        if self.settle_delay > Duration::from_secs(30) {
            anyhow::bail!(
                "Settle delay of {:?} is too long, use at most 30s",
                self.settle_delay
            );
        }
        Ok(())
    }
}
