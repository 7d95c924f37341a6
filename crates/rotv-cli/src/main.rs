mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use rotv_core::{AuthRecord, GatewayConfig, ModuleContext, ModuleRegistry, ProviderModule};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        // Leak is fine — called once, lives for the program's lifetime.
        Box::leak(VERSION.to_string().into_boxed_str())
    } else {
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Streaming provider gateway — one HTTP surface over Romanian media providers.
#[derive(Parser)]
#[command(name = "rotv-gateway", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Refresh and print a module's channel list from the command line
    /// (no API server).
    Channels {
        /// Module id, e.g. digi24 or antena-play.
        module: String,

        /// Log in with these credentials first and persist the tokens.
        #[arg(long, requires = "password")]
        username: Option<String>,

        #[arg(long, requires = "username")]
        password: Option<String>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => {
            run_serve(listen, config).await;
        }
        Commands::Channels {
            module,
            username,
            password,
            config,
        } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            run_channels(module, username, password, config).await;
        }
    }
}

fn load_config(config_path: Option<&PathBuf>) -> Option<config::AppConfig> {
    let path = config_path?;
    match config::AppConfig::load(path) {
        Ok(c) => Some(c),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: Option<PathBuf>) {
    let app_config = load_config(config_path.as_ref());
    match &app_config {
        Some(c) => {
            init_tracing(&c.server.log_format);
            if let Some(path) = config_path.as_ref() {
                tracing::info!(path = %path.display(), "Loaded config file");
            }
        }
        None => init_tracing("pretty"),
    }

    let listen = listen_override
        .or(app_config.as_ref().map(|c| c.server.listen))
        .unwrap_or_else(|| "0.0.0.0:8080".parse().unwrap());

    let gateway_config = app_config
        .as_ref()
        .map(|c| c.to_gateway_config())
        .unwrap_or_default();

    let credentials = app_config
        .as_ref()
        .map(|c| c.credentials())
        .unwrap_or_default();

    let persist_path = app_config.as_ref().and_then(|c| c.cache.persist_path.clone());

    let state = rotv_api::state::AppState::new(gateway_config).with_credentials(credentials);

    if let Some(ref path) = persist_path {
        state.cache.load(path);
        tracing::info!(path = %path.display(), entries = state.cache.len(), "Restored cache snapshot");
    }

    let modules = state.registry.ids();
    tracing::info!(%listen, modules = ?modules, "Starting provider gateway");

    let cache = state.cache.clone();
    if let Err(e) = rotv_api::serve_with_state(listen, state, rotv_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received");

    if let Some(ref path) = persist_path {
        match cache.save(path) {
            Ok(()) => tracing::info!(path = %path.display(), "Saved cache snapshot"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to save cache snapshot"),
        }
    }

    tracing::info!("Shutdown complete");
}

async fn run_channels(
    module_id: String,
    username: Option<String>,
    password: Option<String>,
    config_path: Option<PathBuf>,
) {
    let gateway_config = load_config(config_path.as_ref())
        .map(|c| c.to_gateway_config())
        .unwrap_or_else(GatewayConfig::default);

    let registry = ModuleRegistry::new(ModuleContext::new(gateway_config));
    let module = match registry.resolve(&module_id) {
        Ok(m) => m,
        Err(e) => {
            eprintln!(
                "{} {e} (available: {})",
                style("error:").red().bold(),
                registry.ids().join(", ")
            );
            std::process::exit(1);
        }
    };

    println!(
        "{} {}",
        style("rotv-gateway").bold(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!(
        "  {} {}",
        style("module:").dim(),
        style(module.display_name()).bold()
    );
    println!();

    let spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {wide_msg}").expect("valid template"),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));

    if let (Some(username), Some(password)) = (username, password) {
        spinner.set_message(format!("Logging in to {}", module.display_name()));
        match module.login(&username, &password).await {
            Ok(tokens) if tokens.first().is_some_and(|t| !t.is_empty()) => {
                let record = AuthRecord {
                    username,
                    password,
                    auth_tokens: tokens,
                    last_updated: Utc::now(),
                };
                if let Err(e) = module.set_auth(&record) {
                    spinner.finish_and_clear();
                    eprintln!("{} failed to persist tokens: {e}", style("error:").red().bold());
                    std::process::exit(1);
                }
                spinner.println(format!("  {} tokens persisted", style("login:").dim()));
            }
            Ok(_) => {
                spinner.finish_and_clear();
                eprintln!(
                    "{} login returned no usable token",
                    style("error:").red().bold()
                );
                std::process::exit(1);
            }
            Err(e) => {
                spinner.finish_and_clear();
                eprintln!("{} {e}", style("error:").red().bold());
                std::process::exit(1);
            }
        }
    }

    spinner.set_message("Refreshing channel list");
    let channels = match module.update_channels().await {
        Ok(channels) => channels,
        Err(e) => {
            spinner.finish_and_clear();
            eprintln!("{} {e}", style("error:").red().bold());
            std::process::exit(1);
        }
    };
    spinner.finish_and_clear();

    if channels.is_empty() {
        println!("{}", style("No channels returned.").dim());
        return;
    }

    for channel in &channels {
        let category = channel
            .category
            .as_deref()
            .map(|c| format!("  {}", style(c).dim()))
            .unwrap_or_default();
        println!("  {:<24} {}{}", style(&channel.id).bold(), channel.name, category);
    }
    println!();
    println!("{}", style(format!("{} channels", channels.len())).dim());
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
