//! dbb - manage a Docker-hosted Buildbot worker.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dbb")]
#[command(about = "Build and run Docker-hosted Buildbot workers")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./config.yaml, then the install tree's)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Worker to operate on (defaults to the worker configured for this host)
    #[arg(short = 'H', long = "docker-hostname", global = true)]
    worker: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the worker's Docker image
    Build,

    /// Initialize the worker in a fresh container
    Init,

    /// Create and start the worker's container
    Run {
        /// Command to run instead of supervisord
        #[arg(last = true)]
        cmd: Vec<String>,
    },

    /// Attach a terminal to the running container
    Attach,

    /// Stop the running container
    Stop,

    /// Remove the stopped container
    Remove,

    /// Print the resolved configuration
    DumpConfig,

    /// Print the generated Dockerfile
    DumpDockerfile,

    /// Print the generated Debian control file
    DumpDebControl,

    /// Write the build context tar archive to stdout
    DumpContext,

    /// Print Docker, container and image information
    DumpContainer,

    /// Manage the worker's DigitalOcean droplet
    Droplet {
        #[command(subcommand)]
        action: DropletAction,
    },
}

#[derive(Subcommand)]
enum DropletAction {
    /// Create the droplet and wait until it is active
    Start,
    /// Destroy the droplet and wait until it is gone
    Stop,
    /// Show the droplet's current state
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    // A pending stdin read left behind by `attach` would block runtime shutdown.
    std::process::exit(0);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref(), cli.worker.as_deref())?;

    match cli.command {
        Commands::Build => commands::container::build(config).await,
        Commands::Init => commands::container::init(config).await,
        Commands::Run { cmd } => commands::container::run(config, cmd).await,
        Commands::Attach => commands::container::attach(config).await,
        Commands::Stop => commands::container::stop(config).await,
        Commands::Remove => commands::container::remove(config).await,
        Commands::DumpConfig => commands::dump::config(&config),
        Commands::DumpDockerfile => commands::dump::dockerfile(&config),
        Commands::DumpDebControl => commands::dump::deb_control(&config),
        Commands::DumpContext => commands::dump::context(config).await,
        Commands::DumpContainer => commands::container::dump(config).await,
        Commands::Droplet { action } => match action {
            DropletAction::Start => commands::cloud::start(&config).await,
            DropletAction::Stop => commands::cloud::stop(&config).await,
            DropletAction::Status => commands::cloud::status(&config).await,
        },
    }
}
