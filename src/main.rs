use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "panelctl")]
#[command(version, about = "Deploy the server panel: schema migrations and a TLS reverse proxy")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, list, or apply database migrations
    Migrate {
        #[command(subcommand)]
        command: MigrateCommands,
    },
    /// Build, migrate, and serve the panel until interrupted
    Deploy(DeployArgs),
    /// View, validate, or create panel.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective settings (file plus PANEL_* overrides)
    Show,
    /// Validate panel.toml and show any warnings
    Validate,
    /// Write a default panel.toml
    Init,
}

#[derive(Subcommand, Clone)]
pub enum MigrateCommands {
    /// Create a new timestamped migration file
    Create {
        /// Human-readable name, turned into the file slug
        name: String,
    },
    /// Show every migration and whether it has been applied
    List,
    /// Apply pending migrations
    Run {
        /// Re-run every migration, including ones already applied
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Clone, Debug)]
pub struct DeployArgs {
    /// Re-run every migration before serving
    #[arg(long)]
    pub force: bool,

    /// Deployment mode: local or domain
    #[arg(long)]
    pub mode: Option<String>,

    /// Public domain name (implies --mode domain)
    #[arg(long)]
    pub domain: Option<String>,

    /// Directory holding privkey.pem and fullchain.pem
    #[arg(long)]
    pub ssl_path: Option<PathBuf>,

    /// Port the backend listens on
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Port for the public listener in local mode
    #[arg(long)]
    pub web_port: Option<u16>,

    /// Directory containing the built UI bundle
    #[arg(long)]
    pub ui_path: Option<PathBuf>,

    /// Deployment file to read (defaults to server.deploy_file from panel.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the resolved configuration back to the deployment file
    #[arg(long)]
    pub save: bool,

    #[arg(long)]
    pub skip_migrations: bool,

    /// Skip the backend build command
    #[arg(long)]
    pub skip_build: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    panelctl::logging::init_logging(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Migrate { command } => match command {
            MigrateCommands::Create { name } => cmd::cmd_migrate_create(&cli, project_dir, name)?,
            MigrateCommands::List => cmd::cmd_migrate_list(&cli, project_dir)?,
            MigrateCommands::Run { force } => cmd::cmd_migrate_run(&cli, project_dir, *force)?,
        },
        Commands::Deploy(args) => cmd::cmd_deploy(&cli, project_dir, args).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
