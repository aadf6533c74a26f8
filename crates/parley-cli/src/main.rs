//! Parley CLI
//!
//! Runs the interview service and renders stored interview transcripts.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use parley_gateway::{AudioStore, GeminiClient, ModelGateway, ModelSpeech, ModelTranscriber};
use parley_orchestrator::{
    create_router, validator_from_config, AppState, Config, CredentialValidator, FileStore,
    MemoryStore, SessionManager, SessionStore, StoreBackend,
};
use parley_report::{json::JsonGenerator, MarkdownGenerator, Report};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// URL prefix synthesized audio is served under.
const AUDIO_URL_PREFIX: &str = "/audio";

/// Parley - Adaptive Mock Interviews
///
/// Asks resume-based interview questions, analyzes each answer and adapts
/// the difficulty of the next question.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP, SSE and WebSocket service
    Serve {
        /// Path to configuration file (default: parley.json in current directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port for the HTTP API server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Render the transcript of a stored session
    Report {
        /// Session to render
        #[arg(value_name = "SESSION_ID")]
        session_id: String,

        /// Path to configuration file (default: parley.json in current directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,

        /// Session directory (default: store.dataDir from the configuration)
        #[arg(long, value_name = "DIR")]
        data_dir: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Secrets such as GEMINI_API_KEY may live in a local .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing subscriber with appropriate filter
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match args.command {
        Command::Serve { config, host, port } => serve(config.as_deref(), &host, port).await,
        Command::Report {
            session_id,
            config,
            data_dir,
            format,
            output,
        } => {
            report(
                &session_id,
                config.as_deref(),
                data_dir.as_deref(),
                format,
                output.as_deref(),
            )
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Boots the service and runs until Ctrl+C.
async fn serve(config_path: Option<&str>, host: &str, port: u16) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    print_config(&config);

    let client = GeminiClient::from_env(&config.gateway.api_key_env, &config.gateway.model)
        .map_err(|e| {
            anyhow::anyhow!(
                "{e}\n\nSuggestion: Export {} or add it to a .env file",
                config.gateway.api_key_env
            )
        })?
        .with_tts_model(&config.gateway.tts_model)
        .with_voice(&config.gateway.voice);
    let retry = config.retry_policy();

    let store = open_store(&config).await?;
    let gateway = Arc::new(ModelGateway::new(client.clone(), retry));
    let mut manager = SessionManager::new(config.clone(), store, gateway);

    let validator: Arc<dyn CredentialValidator> = Arc::from(validator_from_config(&config.auth)?);

    let state = if config.speech.enabled {
        tokio::fs::create_dir_all(&config.speech.audio_dir)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create audio directory: {e}\n\nPath: {}",
                    config.speech.audio_dir
                )
            })?;
        let audio = AudioStore::new(&config.speech.audio_dir, AUDIO_URL_PREFIX);
        manager = manager.with_speech(Arc::new(ModelSpeech::new(client.clone(), audio)));
        AppState::new(Arc::new(manager), validator)
            .with_transcriber(Arc::new(ModelTranscriber::new(client, retry)))
    } else {
        AppState::new(Arc::new(manager), validator)
    };

    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        anyhow::anyhow!("Invalid address '{host}:{port}': {e}\n\nSuggestion: Pass an IP address with --host")
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("Parley listening on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Renders a stored session to stdout or a file.
async fn report(
    session_id: &str,
    config_path: Option<&str>,
    data_dir: Option<&str>,
    format: ReportFormat,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let data_dir = data_dir.unwrap_or(&config.store.data_dir);

    let store = FileStore::open(data_dir).await?;
    let session = store.get(session_id).await?.ok_or_else(|| {
        anyhow::anyhow!(
            "Session not found: '{session_id}'\n\nSuggestion: Check the id or point --data-dir at the session directory"
        )
    })?;
    let report = session.to_report(config.max_questions)?;

    match output {
        Some(path) => {
            write_report(&report, format, path)?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", render_report(&report, format)?),
    }
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Opens the configured session store.
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn SessionStore>> {
    match config.store.backend {
        StoreBackend::File => {
            let store = FileStore::open(&config.store.data_dir).await?;
            tracing::info!(dir = %store.dir().display(), "Using file session store");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory session store; sessions are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn render_report(report: &Report, format: ReportFormat) -> anyhow::Result<String> {
    Ok(match format {
        ReportFormat::Markdown => MarkdownGenerator::new(report).generate(),
        ReportFormat::Json => JsonGenerator::new(report).generate_pretty()?,
    })
}

fn write_report(report: &Report, format: ReportFormat, path: &Path) -> anyhow::Result<()> {
    match format {
        ReportFormat::Json => JsonGenerator::new(report).write_to_file(path, true)?,
        ReportFormat::Markdown => std::fs::write(path, MarkdownGenerator::new(report).generate())?,
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    println!();
    println!("Shutting down...");
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Model: {}", config.gateway.model);
    println!("  Questions per interview: {}", config.max_questions);
    println!("  Difficulty policy: {:?}", config.difficulty_policy);
    println!("  Store: {:?} ({})", config.store.backend, config.store.data_dir);
    println!("  Auth: {:?}", config.auth.mode);
    println!("  Speech: {}", if config.speech.enabled { "enabled" } else { "disabled" });
}
