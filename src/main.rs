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

mod auth;
mod config;
mod engine;
mod model;
mod plan;
mod sheets;
mod utils;

use anyhow::Context;
use auth::{AuthManager, Authenticator, Credentials};
use clap::{Parser, Subcommand, ValueEnum};
use config::{Config, ModelTarget, RetryPolicy, SensitivitySettings};
use engine::provision::{self, Provisioner};
use engine::{ModelRun, SensitivitySolver};
use model::UnderwritingPayload;
use serde::Serialize;
use sheets::{GoogleDriveBackend, GoogleSheetsBackend};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_env_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Authenticate with Google and save tokens
    Auth {
        /// Custom path to store authentication tokens
        #[arg(long)]
        auth_cache: Option<PathBuf>,

        /// Store tokens in ./.proforma-sheets/tokens.json
        #[arg(long)]
        local_cache: bool,

        /// Client secret JSON downloaded from the Google Cloud Console
        #[arg(long)]
        client_secret: Option<PathBuf>,

        /// Remove previously cached tokens before authenticating
        #[arg(long)]
        reset: bool,
    },
    /// Build a model from an underwriting payload and extract its results
    Run {
        /// Existing model sheet to drive
        #[arg(long, conflicts_with = "template_url", required_unless_present = "template_url")]
        sheet_id: Option<String>,

        /// Template to copy into the owner's Drive folder first
        #[arg(long, requires = "owner")]
        template_url: Option<String>,

        /// Owner folder name for template copies, usually an email address
        #[arg(long)]
        owner: Option<String>,

        /// Underwriting payload JSON
        #[arg(long)]
        payload: PathBuf,

        /// Write the run output here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Drive folder that owner folders are created under
        #[arg(long)]
        parent_folder: Option<String>,

        /// Plan only; read the mapping but write nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Fill the IRR and MOIC sensitivity tables of a model sheet
    Sensitivity {
        #[arg(long)]
        sheet_id: String,

        /// Highest acquisition price in the grid
        #[arg(long)]
        max_price: f64,

        /// Lowest exit cap rate in the grid, in percent
        #[arg(long)]
        min_cap_rate: f64,

        /// Wait after each input write before reading outputs
        #[arg(long, default_value_t = 100)]
        settle_ms: u64,

        /// Extra reads when an output comes back empty
        #[arg(long, default_value_t = 2)]
        read_retries: usize,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Export a model sheet as an Excel workbook without its mapping tabs
    Export {
        #[arg(long)]
        sheet_id: String,

        #[arg(long, default_value = "exported_model.xlsx")]
        output: PathBuf,
    },
}

#[derive(Parser)]
#[command(name = "proforma-sheets")]
#[command(about = "Drive templated Google Sheets underwriting models")]
#[command(version)]
struct Cli {
    /// Controls verbosity of log output (overrides RUST_LOG when provided)
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Service account key file; takes precedence over cached tokens
    #[arg(long, global = true)]
    service_account: Option<PathBuf>,

    /// Custom path to read authentication tokens
    #[arg(long, global = true)]
    token_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn init_logging(level: &LogLevel) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level.as_env_filter()))?;

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize default crypto provider for rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Auth {
            auth_cache,
            local_cache,
            client_secret,
            reset,
        } => {
            handle_auth_command(auth_cache, local_cache, client_secret, reset).await?;
        }
        Commands::Run {
            sheet_id,
            template_url,
            owner,
            payload,
            output,
            parent_folder,
            dry_run,
        } => {
            let target = match (sheet_id, template_url) {
                (Some(sheet_id), _) => ModelTarget::Sheet(sheet_id),
                (None, Some(url)) => ModelTarget::Template {
                    url,
                    owner: owner.unwrap_or_default(),
                },
                (None, None) => {
                    return Err(utils::ModelError::Config(
                        "either --sheet-id or --template-url is required".to_string(),
                    )
                    .into());
                }
            };
            let config = Config::new(target, payload, output, parent_folder, dry_run);
            config.validate()?;
            let auth = authenticate(cli.service_account, cli.token_path).await?;
            handle_run_command(&config, auth).await?;
        }
        Commands::Sensitivity {
            sheet_id,
            max_price,
            min_cap_rate,
            settle_ms,
            read_retries,
            output,
        } => {
            let settings = SensitivitySettings::new(settle_ms, read_retries);
            settings.validate()?;
            let auth = authenticate(cli.service_account, cli.token_path).await?;
            let sheets = GoogleSheetsBackend::new(auth, RetryPolicy::default())?;
            let result = SensitivitySolver::new(&sheets, &sheet_id, settings)
                .run(max_price, min_cap_rate)
                .await?;
            emit(&result, output.as_deref())?;
        }
        Commands::Export { sheet_id, output } => {
            let auth = authenticate(cli.service_account, cli.token_path).await?;
            let sheets = GoogleSheetsBackend::new(auth.clone(), RetryPolicy::default())?;
            let drive = GoogleDriveBackend::new(auth, RetryPolicy::default())?;
            Provisioner::new(&drive, None)
                .export_xlsx(&sheets, &sheet_id, &output)
                .await?;
        }
    }

    Ok(())
}

async fn authenticate(
    service_account: Option<PathBuf>,
    token_path: Option<PathBuf>,
) -> anyhow::Result<Authenticator> {
    let credentials = Credentials::resolve(service_account, token_path)?;
    credentials.authenticator(&AuthManager::new(None)).await
}

/// Pretty JSON to `path`, or stdout.
fn emit<T: Serialize>(value: &T, path: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write output: {}", path.display()))?;
            info!("💾 Output written to: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn handle_auth_command(
    auth_cache: Option<PathBuf>,
    local_cache: bool,
    client_secret: Option<PathBuf>,
    reset: bool,
) -> anyhow::Result<()> {
    info!("🔑 Starting authentication flow");

    // Determine where to save tokens based on flags
    let token_cache_path = if local_cache {
        let local_cache_dir = PathBuf::from(".").join(auth::oauth::CACHE_DIR);

        if !local_cache_dir.exists() {
            info!("📁 Creating directory: {}", local_cache_dir.display());
            std::fs::create_dir_all(&local_cache_dir).with_context(|| {
                format!("Failed to create directory: {}", local_cache_dir.display())
            })?;
        }

        let local_path = local_cache_dir.join("tokens.json");
        info!(
            "📁 Will save tokens to local directory: {}",
            local_path.display()
        );
        local_path
    } else if let Some(path) = auth_cache {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            info!("📁 Creating directory: {}", parent.display());
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        info!("📁 Will save tokens to custom location: {}", path.display());
        path
    } else {
        let home_dir = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .with_context(|| "Cannot determine home directory. Use --auth-cache to specify a custom location.")?;

        let cache_dir = PathBuf::from(home_dir).join(auth::oauth::CACHE_DIR);

        if !cache_dir.exists() {
            info!("📁 Creating directory: {}", cache_dir.display());
            std::fs::create_dir_all(&cache_dir)
                .with_context(|| format!("Failed to create directory: {}", cache_dir.display()))?;
        }

        let token_path = cache_dir.join("tokens.json");
        info!(
            "📁 Will save tokens to home directory: {}",
            token_path.display()
        );
        token_path
    };

    let auth_manager = match client_secret {
        Some(secret) => AuthManager::with_client_secret(Some(token_cache_path.clone()), secret),
        None => AuthManager::new(Some(token_cache_path.clone())),
    };
    if reset {
        auth_manager.clear_cache()?;
    }

    match auth_manager.authenticate().await {
        Ok(()) => {
            info!("✅ Authentication completed successfully");
            info!("💾 Tokens saved to: {}", token_cache_path.display());
            info!("You can now run model commands:");
            info!("  proforma-sheets run --sheet-id YOUR_SHEET_ID --payload payload.json");
            info!("  proforma-sheets sensitivity --sheet-id YOUR_SHEET_ID --max-price 10000000 --min-cap-rate 5.5");
        }
        Err(err) => {
            anyhow::bail!(
                "❌ Authentication failed: {}\n\n\
                Troubleshooting tips:\n\
                • Make sure your browser can access Google authentication\n\
                • Check that the Sheets and Drive APIs are enabled in your Google Cloud project\n\
                • Ensure you have permissions to the model sheet or template\n\
                • Try using a custom client_secret.json file",
                err
            );
        }
    }

    Ok(())
}

async fn handle_run_command(config: &Config, auth: Authenticator) -> anyhow::Result<()> {
    if config.dry_run {
        info!("🔍 Running in dry-run mode - no changes will be made");
    }

    let payload = UnderwritingPayload::from_json_file(&config.payload_path)?;
    let sheets = GoogleSheetsBackend::new(auth.clone(), config.retry)?;

    let (spreadsheet_id, sheet_url) = match &config.target {
        ModelTarget::Sheet(sheet_id) => (sheet_id.clone(), provision::sheet_url(sheet_id)),
        ModelTarget::Template { url, owner } => {
            let template_id = provision::template_id_from_url(url)?;
            if config.dry_run {
                info!("🔍 Dry run plans against the template itself, no copy is made");
                (template_id.clone(), provision::sheet_url(&template_id))
            } else {
                let drive = GoogleDriveBackend::new(auth, config.retry)?;
                let sheet = Provisioner::new(&drive, config.parent_folder.as_deref())
                    .with_retry(config.retry)
                    .provision_copy(owner, &template_id)
                    .await?;
                (sheet.id, sheet.url)
            }
        }
    };

    info!("📊 Sheet ID: {}", spreadsheet_id);
    let outcome = ModelRun::new(&sheets)
        .execute(&spreadsheet_id, &sheet_url, &payload, config.dry_run)
        .await?;
    emit(&outcome, config.output_path.as_deref())
}
