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

//! Google credentials for the Sheets and Drive clients.
//!
//! Two sources are supported: a service-account key (the usual choice for
//! unattended runs) and installed-flow OAuth2 tokens cached by the `auth`
//! command. Either way the result is one [`Authenticator`] shared by both
//! API hubs.

use crate::utils::ModelError;
use anyhow::{Context, Result};
use google_sheets4::hyper_rustls;
use google_sheets4::yup_oauth2::{
    self, ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    ServiceAccountAuthenticator,
};
use hyper_util::client::legacy::connect::HttpConnector;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Spreadsheet edits plus Drive copy/export.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];

/// Hidden folder holding tokens and the client secret, locally or in `$HOME`.
pub const CACHE_DIR: &str = ".proforma-sheets";
const TOKEN_FILE: &str = "tokens.json";
const CLIENT_SECRET_FILE: &str = "client_secret.json";
pub const SERVICE_ACCOUNT_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

pub type Authenticator =
    yup_oauth2::authenticator::Authenticator<hyper_rustls::HttpsConnector<HttpConnector>>;

/// Google Cloud Console client secret file format
#[derive(Debug, Serialize, Deserialize)]
struct GoogleClientSecretFile {
    installed: ApplicationSecret,
}

/// Where the run's Google identity comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ServiceAccount(PathBuf),
    InstalledTokens(PathBuf),
}

impl Credentials {
    /// Precedence: `--service-account`, `--token-path`,
    /// `GOOGLE_APPLICATION_CREDENTIALS`, then cached tokens from the
    /// local or home cache folder.
    pub fn resolve(service_account: Option<PathBuf>, token_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = service_account {
            return Self::service_account(path);
        }
        if token_path.is_some() {
            return AuthManager::resolve_token_path(token_path).map(Credentials::InstalledTokens);
        }
        if let Some(path) = std::env::var_os(SERVICE_ACCOUNT_ENV) {
            debug!("🔑 Using service account from {}", SERVICE_ACCOUNT_ENV);
            return Self::service_account(PathBuf::from(path));
        }
        AuthManager::resolve_token_path(None).map(Credentials::InstalledTokens)
    }

    fn service_account(path: PathBuf) -> Result<Self> {
        if !path.is_file() {
            return Err(ModelError::Auth(format!(
                "Service account key not found: {}",
                path.display()
            ))
            .into());
        }
        info!("🔐 Using service account key at: {}", path.display());
        Ok(Credentials::ServiceAccount(path))
    }

    /// Builds the authenticator without ever starting a browser flow.
    pub async fn authenticator(&self, auth_manager: &AuthManager) -> Result<Authenticator> {
        let auth = match self {
            Credentials::ServiceAccount(path) => {
                let key = yup_oauth2::read_service_account_key(path)
                    .await
                    .with_context(|| format!("Failed to read service account key {:?}", path))?;
                ServiceAccountAuthenticator::builder(key)
                    .build()
                    .await
                    .context("Failed to build service account authenticator")?
            }
            Credentials::InstalledTokens(token_path) => {
                let client_secret = auth_manager
                    .load_client_secret()
                    .await
                    .context("Failed to load client secret for Google APIs")?;
                InstalledFlowAuthenticator::builder(
                    client_secret,
                    InstalledFlowReturnMethod::HTTPRedirect,
                )
                .persist_tokens_to_disk(token_path.clone())
                .build()
                .await
                .context("Failed to build non-interactive authenticator")?
            }
        };

        debug!("🔍 Testing authenticator with scopes: {:?}", SCOPES);
        if let Err(e) = auth.token(SCOPES).await {
            return Err(ModelError::Auth(format!(
                "could not obtain a token without interactive auth: {}. \
                 The stored credentials are invalid or expired.",
                e
            ))
            .into());
        }
        Ok(auth)
    }
}

/// Google OAuth2 authentication manager.
///
/// Runs the browser-based installed flow for the `auth` command and finds
/// cached tokens and the client secret for later runs.
pub struct AuthManager {
    /// Optional path to cache authentication tokens
    auth_cache_path: Option<PathBuf>,
    /// Path to client secrets JSON file
    client_secret_path: Option<PathBuf>,
}

impl AuthManager {
    pub fn new(auth_cache_path: Option<PathBuf>) -> Self {
        Self {
            auth_cache_path,
            client_secret_path: None,
        }
    }

    pub fn with_client_secret(
        auth_cache_path: Option<PathBuf>,
        client_secret_path: PathBuf,
    ) -> Self {
        Self {
            auth_cache_path,
            client_secret_path: Some(client_secret_path),
        }
    }

    /// Performs the complete OAuth2 flow, launching the browser for consent
    /// and persisting tokens to the cache path.
    ///
    /// # Errors
    ///
    /// * If the client secret cannot be loaded
    /// * If the OAuth2 flow or token exchange fails
    pub async fn authenticate(&self) -> Result<()> {
        info!("🔑 Starting OAuth2 authentication flow");

        let client_secret = self
            .load_client_secret()
            .await
            .context("Failed to load client secret")?;

        let auth = InstalledFlowAuthenticator::builder(
            client_secret,
            InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(
            self.auth_cache_path
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("proforma_sheets_tokens.json")),
        )
        .build()
        .await
        .context("Failed to create authenticator")?;

        auth.token(SCOPES)
            .await
            .context("Failed to obtain access token")?;

        info!("✅ Authentication successful");
        Ok(())
    }

    /// Local cache folder first, then the home one.
    pub fn cache_dirs() -> Vec<PathBuf> {
        let mut dirs = vec![PathBuf::from(".").join(CACHE_DIR)];
        if let Ok(home_dir) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            dirs.push(PathBuf::from(home_dir).join(CACHE_DIR));
        }
        dirs
    }

    /// Resolves a usable token cache path, validating discovered files.
    ///
    /// # Errors
    ///
    /// Returns an error with remediation tips when no valid tokens can be found.
    pub fn resolve_token_path(token_override: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = token_override {
            Self::validate_token_file(&path)?;
            info!("🔐 Using authentication tokens at: {}", path.display());
            return Ok(path);
        }

        match Self::find_existing_token(&Self::cache_dirs()) {
            Some(path) => {
                info!("🔐 Using authentication tokens at: {}", path.display());
                Ok(path)
            }
            None => anyhow::bail!(
                "❌ No Google credentials found.\n\n\
                Either pass a service account key:\n\
                • --service-account /path/to/key.json (or set {})\n\
                or authenticate first:\n\
                • Default (home directory): proforma-sheets auth\n\
                • Local directory:         proforma-sheets auth --local-cache\n\
                • Custom location:         proforma-sheets auth --auth-cache /path/to/tokens.json",
                SERVICE_ACCOUNT_ENV
            ),
        }
    }

    /// First valid `tokens.json` among `dirs`. Invalid files are reported
    /// and skipped.
    pub fn find_existing_token(dirs: &[PathBuf]) -> Option<PathBuf> {
        let mut invalid_files = Vec::new();

        for dir in dirs {
            let path = dir.join(TOKEN_FILE);
            if !path.exists() {
                debug!("🔍 No tokens at {}", path.display());
                continue;
            }
            match Self::validate_token_file(&path) {
                Ok(()) => {
                    debug!("🔑 Found valid authentication tokens at {}", path.display());
                    return Some(path);
                }
                Err(err) => invalid_files.push(format!("{}: {}", path.display(), err)),
            }
        }

        if !invalid_files.is_empty() {
            warn!("⚠️  Found token files but they are invalid:");
            for invalid in &invalid_files {
                warn!("   - {}", invalid);
            }
            warn!("Please re-authenticate to refresh your tokens.");
        }
        None
    }

    fn validate_token_file(token_path: &Path) -> Result<()> {
        if !token_path.exists() {
            anyhow::bail!("Token file not found at specified path: {:?}", token_path);
        }

        if !token_path.is_file() {
            anyhow::bail!("Token path is not a file: {:?}", token_path);
        }

        let metadata = fs::metadata(token_path)
            .with_context(|| format!("Failed to read token metadata: {:?}", token_path))?;

        if metadata.len() == 0 {
            anyhow::bail!("Token file is empty: {:?}", token_path);
        }

        Ok(())
    }

    /// Custom path if one was given, else the first `client_secret.json`
    /// in the cache folders.
    fn find_client_secret_file(&self) -> Result<PathBuf> {
        if let Some(path) = &self.client_secret_path {
            if path.exists() {
                return Ok(path.clone());
            }
            anyhow::bail!("Custom client secret file not found: {:?}", path);
        }

        if let Some(path) = Self::cache_dirs()
            .into_iter()
            .map(|dir| dir.join(CLIENT_SECRET_FILE))
            .find(|path| path.exists())
        {
            debug!("🔑 Found client secret at {}", path.display());
            return Ok(path);
        }

        anyhow::bail!(
            "❌ No client_secret.json file found.\n\n\
            Please create a Google Cloud OAuth2 application and place the downloaded\n\
            client_secret.json file in one of these locations:\n\
            • Local directory:  ./{dir}/client_secret.json\n\
            • Home directory:   ~/{dir}/client_secret.json",
            dir = CACHE_DIR
        )
    }

    /// Loads the OAuth2 client secret, accepting both the Cloud Console
    /// download (with its `installed` wrapper) and a bare secret.
    pub async fn load_client_secret(&self) -> Result<ApplicationSecret> {
        let secret_path = self.find_client_secret_file()?;

        let secret_json = fs::read_to_string(&secret_path)
            .with_context(|| format!("Failed to read client secret from {:?}", secret_path))?;

        if let Ok(google_format) = serde_json::from_str::<GoogleClientSecretFile>(&secret_json) {
            return Ok(google_format.installed);
        }

        let secret: ApplicationSecret = serde_json::from_str(&secret_json)
            .with_context(|| format!("Failed to parse client secret JSON from {:?}. Expected the Google Cloud Console download or a bare ApplicationSecret.", secret_path))?;

        Ok(secret)
    }

    /// Clears cached authentication tokens.
    pub fn clear_cache(&self) -> Result<()> {
        if let Some(cache_path) = &self.auth_cache_path
            && cache_path.exists()
        {
            fs::remove_file(cache_path).context("Failed to remove auth cache file")?;
            info!("🗑️  Authentication cache cleared");
        }
        Ok(())
    }
}
