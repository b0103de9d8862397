//! porter - SNS のエクスポートを Nostr に移すワーカー
//!
//! Usage:
//!   porter run --job job.json --key <hex>
//!   porter run --job job.json --signer remote
//!   porter keygen
//!
//! Environment variables:
//!   PORTER_SECRET_KEY - secret key for `--signer local`
//!   PORTER_CONFIG     - TOML config file
//!   RUST_LOG          - log filter (default: porter=info)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use porter_core::app::{JobProgress, Migrator, Pipeline, PorterConfig};
use porter_core::crypto::Keys;
use porter_core::domain::{JobId, JobSpec};
use porter_core::impls::{HttpMediaSource, InMemoryTaskStore};
use porter_core::ports::{SystemClock, UlidGenerator};
use porter_core::relay::WebSocketConnector;
use porter_core::remote::RemoteSession;
use porter_core::signer::SignerRegistry;
use porter_core::upload::BlossomClient;

const WAIT_POLL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "porter")]
#[command(about = "Migrate exported posts to Nostr")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "PORTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one migration job to the end.
    Run(RunArgs),
    /// Print a fresh keypair.
    Keygen,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Job description (JSON)
    #[arg(long)]
    job: PathBuf,

    #[arg(long, value_enum, default_value_t = SignerKind::Local)]
    signer: SignerKind,

    /// Hex secret key, required with `--signer local`
    #[arg(long, env = "PORTER_SECRET_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Override the configured relays
    #[arg(long = "relay")]
    relays: Vec<String>,

    /// Override the configured number of workers
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SignerKind {
    Local,
    Remote,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("porter=info,porter_core=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Keygen => {
            let keys = Keys::generate();
            println!("secret: {}", keys.secret_hex());
            println!("pubkey: {}", keys.public_key().to_hex());
            Ok(())
        }
        Command::Run(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            if !args.relays.is_empty() {
                config.relays = args.relays.clone();
            }
            if let Some(n) = args.concurrency {
                config.concurrency = n;
            }
            run(config, args).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PorterConfig> {
    let Some(path) = path else {
        return Ok(PorterConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn build_migrator(config: PorterConfig) -> Result<Migrator> {
    let clock = Arc::new(SystemClock);
    let pipeline = Pipeline {
        store: Arc::new(InMemoryTaskStore::new()),
        media: Arc::new(HttpMediaSource::new(config.fetch_timeout())?),
        blobs: Arc::new(BlossomClient::new(&config.upload_base_url, config.fetch_timeout())?),
        relays: Arc::new(WebSocketConnector::new(config.connect_timeout())),
        signers: SignerRegistry::new(),
        clock: clock.clone(),
        ids: Arc::new(UlidGenerator::new(clock)),
    };
    Ok(Migrator::new(pipeline, config)?)
}

async fn run(config: PorterConfig, args: RunArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.job)
        .with_context(|| format!("reading job {}", args.job.display()))?;
    let spec: JobSpec = serde_json::from_str(&raw).context("parsing job description")?;
    let migrator = build_migrator(config)?;

    let job_id = match args.signer {
        SignerKind::Local => {
            let Some(secret) = args.key.as_deref() else {
                bail!("--key (or PORTER_SECRET_KEY) is required with --signer local");
            };
            let keys = Keys::from_secret_hex(secret.trim()).context("invalid secret key")?;
            migrator.submit_embedded(spec, keys).await?
        }
        SignerKind::Remote => {
            let (job_id, session) = migrator.submit_remote(spec).await?;
            connect(&migrator, job_id, session).await?;
            job_id
        }
    };

    let pool = migrator.spawn_workers();
    let outcome = tokio::select! {
        progress = drive(&migrator, job_id) => progress,
        _ = tokio::signal::ctrl_c() => {
            warn!(%job_id, "interrupted, cancelling job");
            migrator.cancel(job_id).await.map_err(Into::into)
        }
    };
    pool.shutdown_and_join().await;

    let progress = outcome?;
    println!("{}", serde_json::to_string_pretty(&progress)?);
    if progress.error > 0 {
        warn!(errors = progress.error, "some posts were not migrated");
    }
    Ok(())
}

/// Wait for the job, re-pairing the remote signer whenever its session drops.
async fn drive(migrator: &Migrator, job_id: JobId) -> Result<JobProgress> {
    loop {
        let progress = migrator.wait(job_id, WAIT_POLL).await?;
        if progress.is_settled() {
            return Ok(progress);
        }
        warn!(
            %job_id,
            reason = progress.job_error.as_deref().unwrap_or("unknown"),
            "signer lost, pair again to continue"
        );
        connect(migrator, job_id, migrator.new_session()).await?;
    }
}

async fn connect(migrator: &Migrator, job_id: JobId, session: RemoteSession) -> Result<()> {
    println!("Open this in your signer app:\n\n  {}\n", session.descriptor().to_uri());
    let user = match migrator.connect_remote(job_id, session).await {
        Ok(user) => user,
        Err(e) => {
            migrator.fail(job_id, &format!("remote signer not paired: {e}")).await?;
            return Err(e.into());
        }
    };
    info!(%job_id, user = %user.to_hex(), "remote signer paired");
    Ok(())
}
