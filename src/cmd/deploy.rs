//! `panelctl deploy`: resolve the deployment, build, migrate, then serve
//! until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tracing::{info, warn};

use panelctl::config::PanelConfig;
use panelctl::deploy::server::{self, ServerSettings, ServerState};
use panelctl::deploy::supervisor::{self, BackendCommand, ShutdownSignal, Supervisor};
use panelctl::deploy::{DeployConfig, DeployFile, DeployOverrides, DeploymentMode, Scheme};
use panelctl::migrate::{DirectorySource, Migrator};
use panelctl::ui::StepProgress;
use panelctl::ui::icons::{GLOBE, LOCK, ROCKET, WARN};

use super::super::{Cli, DeployArgs};
use super::migrate::{confirm_force, run_migrations};

fn overrides_from_args(args: &DeployArgs) -> Result<DeployOverrides> {
    let mode = args
        .mode
        .as_deref()
        .map(str::parse::<DeploymentMode>)
        .transpose()?;
    Ok(DeployOverrides {
        api_port: args.api_port,
        web_port: args.web_port,
        mode,
        domain: args.domain.clone(),
        ssl_path: args.ssl_path.clone(),
        dist_dir: args.ui_path.clone(),
    })
}

pub async fn cmd_deploy(cli: &Cli, project_dir: PathBuf, args: &DeployArgs) -> Result<()> {
    let config = PanelConfig::with_cli_args(project_dir, cli.verbose, cli.yes)?;
    for warning in config.validate() {
        eprintln!("{}{}", WARN, style(warning).yellow());
    }

    // Everything up to `listen_plan` must fail before any side effect.
    let deploy_path = match &args.config {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => config.project_dir.join(path),
        None => config.deploy_file(),
    };
    let file = DeployFile::load_or_default(&deploy_path)?;
    let overrides = overrides_from_args(args)?;
    let deploy = DeployConfig::resolve(&file, &overrides, &config.project_dir)?;
    let plan = deploy.listen_plan()?;

    info!(
        mode = %deploy.mode,
        api_port = deploy.api_port,
        dist = %deploy.dist_dir.display(),
        "Deployment configuration resolved"
    );
    if !deploy.dist_dir.join("index.html").is_file() {
        warn!(
            "No index.html in {}; UI routes will return 404",
            deploy.dist_dir.display()
        );
    }

    if !args.skip_build
        && let Some(build) = &config.toml.backend.build_command
    {
        let progress = StepProgress::start("Build");
        match supervisor::run_build(build, &config.backend_dir()).await {
            Ok(()) => progress.finish_ok(build),
            Err(e) => {
                progress.finish_err("failed");
                return Err(e.into());
            }
        }
    }

    if args.skip_migrations {
        info!("Skipping migrations");
    } else {
        if args.force && !confirm_force(config.yes) {
            println!("Deployment cancelled.");
            return Ok(());
        }
        let source = DirectorySource::new(config.migrations_dir());
        let mut migrator = Migrator::open(&config.database_path(), source)
            .context("Failed to open database")?;
        run_migrations(&mut migrator, args.force)?;
    }

    let settings = ServerSettings {
        api_prefix: config.toml.server.api_prefix.clone(),
        proxy_timeout: config.proxy_timeout(),
        ..ServerSettings::default()
    };
    let state = Arc::new(ServerState::new(&deploy, &settings)?);

    let backend = BackendCommand {
        command: config.toml.backend.command.clone(),
        dir: config.backend_dir(),
        port: deploy.api_port,
    };
    // The backend gets its own process group, so Ctrl+C from here on must
    // reach our handler rather than the default one.
    let mut shutdown = ShutdownSignal::register()?;
    let mut process = supervisor::spawn_backend(&backend)?;

    let redirect_host = deploy.domain.as_deref().unwrap_or("localhost");
    let started = tokio::select! {
        started = server::start(&plan, state, settings.bind_ip, redirect_host) => Some(started),
        _ = shutdown.recv() => None,
    };
    let running = match started {
        Some(Ok(running)) => running,
        Some(Err(e)) => {
            process.terminate(config.shutdown_grace()).await;
            return Err(e.into());
        }
        None => {
            info!("Shutdown requested during startup");
            process.terminate(config.shutdown_grace()).await;
            return Ok(());
        }
    };

    // Only a configuration that actually came up is persisted.
    if args.save {
        match deploy.to_file().save(&deploy_path) {
            Ok(()) => info!("Saved deployment configuration to {}", deploy_path.display()),
            Err(e) => warn!("{}", e),
        }
    }

    println!();
    println!("{}{}", ROCKET, style("Panel is up").bold().green());
    for listener in running.listeners() {
        let icon = if listener.scheme == Scheme::Https {
            LOCK
        } else {
            GLOBE
        };
        println!("   {}{} ({})", icon, listener.addr, listener.scheme);
    }
    if running.tls_fallback {
        println!(
            "   {}{}",
            WARN,
            style("HTTPS could not start; serving plain HTTP").yellow()
        );
    }
    println!("   Backend: http://localhost:{}", deploy.api_port);
    println!("   Press Ctrl+C to stop.");
    println!();

    Supervisor::new(process, running, config.shutdown_grace())
        .run(shutdown.recv())
        .await?;
    Ok(())
}
