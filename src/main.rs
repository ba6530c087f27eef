mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use rw_av::ToolRegistry;
use rw_core::config::Config;
use rw_source::RealDebridClient;

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    config.apply_env();

    // CLI flags win over the config file and the environment.
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting reelway");
    tracing::info!("Server will listen on {}:{}", config.server.host, config.server.port);

    rw_server::start(config).await?;
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let mut config = Config::load_or_default(config_path);
    config.apply_env();
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available && tool.meets_minimum {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        if tool.available && !tool.meets_minimum {
            print!(" [version too old]");
        }

        println!();
    }

    match config.providers.debrid_token.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(token) => {
            let client = RealDebridClient::new(
                &config.providers.debrid_base_url,
                token.to_string(),
                Duration::from_secs(config.providers.request_timeout_secs),
            );
            let rt = tokio::runtime::Runtime::new()?;
            match rt.block_on(client.validate_token()) {
                Ok(account) => println!(
                    "✓ debrid account {} ({}, expires {})",
                    account.username,
                    account.account_type,
                    account.expiration.as_deref().unwrap_or("never")
                ),
                Err(e) => {
                    all_ok = false;
                    println!("✗ debrid token: {e}");
                }
            }
        }
        None => {
            all_ok = false;
            println!("✗ debrid token not configured");
        }
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some checks failed. Remux, HLS and subtitle extraction need ffmpeg and ffprobe; resolution needs a debrid token.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let mut config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration parsed");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };
    config.apply_env();

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Database: {}", config.server.db_path.display());
    println!("  Cache dir: {}", config.server.cache_dir.display());
    println!("  Indexer: {}", config.providers.indexer_url);
    println!("  Debrid token: {}", if config.providers.debrid_token.is_some() { "set" } else { "missing" });
    println!("  TMDB key: {}", if config.providers.tmdb_api_key.is_some() { "set" } else { "missing" });
    println!("  Hardware acceleration: {}", config.transcode.hw_accel);
    println!("  Playback sessions: {}", config.playback.sessions_enabled);

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ No warnings");
    } else {
        println!("Warnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelway=trace,rw_server=trace,rw_source=debug,rw_av=debug,rw_db=debug,tower_http=debug".to_string()
        } else {
            "reelway=info,rw_server=info,rw_source=info,rw_av=info,rw_db=warn,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate { config: config_path } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
