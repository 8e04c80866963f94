mod check_command;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "bunnydrop", about = "Bunnydrop: Telegram video relay into Bunny storage")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: ./bunnydrop.toml, then ~/.config/bunnydrop/).
    #[arg(long, global = true, env = "BUNNYDROP_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value and `PORT`).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (default when no subcommand is provided).
    Serve,
    /// Validate the configuration and report errors/warnings.
    Check {
        /// Skip the Telegram settings (for `relay`-only setups).
        #[arg(long)]
        offline: bool,
    },
    /// Relay one link from the terminal and print its public URL.
    Relay {
        /// A link, or "<filename> <link>".
        #[arg(required = true, num_args = 1..=2)]
        input: Vec<String>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    match cli.command {
        // Default: run the bot when no subcommand is provided
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "bunnydrop starting");
            let (config, path) = bunnydrop_config::discover_and_load(cli.config.as_deref())
                .context("failed to load configuration")?;
            if let Some(path) = &path {
                info!(path = %path.display(), "loaded config file");
            }

            // CLI args override config values
            let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
            let port = cli.port.unwrap_or(config.server.port);
            bunnydrop_gateway::start_gateway(config, &bind, port).await
        },
        Some(Commands::Check { offline }) => {
            if !check_command::check(cli.config.as_deref(), offline)? {
                std::process::exit(1);
            }
            Ok(())
        },
        Some(Commands::Relay { input }) => {
            let (config, _) = bunnydrop_config::discover_and_load(cli.config.as_deref())
                .context("failed to load configuration")?;
            let uploaded = bunnydrop_gateway::relay_once(&config, &input.join(" ")).await?;
            info!(bytes = uploaded.bytes, filename = %uploaded.filename, "relayed");
            println!("{}", uploaded.public_url);
            Ok(())
        },
    }
}
