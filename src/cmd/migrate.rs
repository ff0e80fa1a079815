//! Migration commands: `panelctl migrate create|list|run`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use console::style;

use panelctl::config::PanelConfig;
use panelctl::migrate::{DirectorySource, Migrator, RunReport};
use panelctl::ui::StepProgress;
use panelctl::ui::icons::{CHECK, FILE_NEW, PENDING, WARN};

use super::super::Cli;

fn load_config(cli: &Cli, project_dir: PathBuf) -> Result<PanelConfig> {
    let config = PanelConfig::with_cli_args(project_dir, cli.verbose, cli.yes)?;
    for warning in config.validate() {
        eprintln!("{}{}", WARN, style(warning).yellow());
    }
    Ok(config)
}

fn open_migrator(config: &PanelConfig) -> Result<Migrator<DirectorySource>> {
    let source = DirectorySource::new(config.migrations_dir());
    Migrator::open(&config.database_path(), source).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database_path().display()
        )
    })
}

/// Ask before replaying already-applied migrations. `--yes` skips the prompt;
/// a non-interactive terminal counts as "no".
pub(crate) fn confirm_force(yes: bool) -> bool {
    eprintln!(
        "{}{}",
        WARN,
        style("--force re-runs EVERY migration, including ones already applied.").yellow()
    );
    eprintln!("   Non-idempotent migrations may fail or corrupt data.");
    if yes {
        return true;
    }

    use dialoguer::Confirm;
    Confirm::new()
        .with_prompt("Replay all migrations?")
        .default(false)
        .interact()
        .unwrap_or(false)
}

pub fn cmd_migrate_create(cli: &Cli, project_dir: PathBuf, name: &str) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let source = DirectorySource::new(config.migrations_dir());
    let path = source.create(name)?;

    println!("{}Created {}", FILE_NEW, path.display());
    Ok(())
}

pub fn cmd_migrate_list(cli: &Cli, project_dir: PathBuf) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let migrator = open_migrator(&config)?;
    let report = migrator.status()?;

    if report.units.is_empty() {
        println!();
        println!(
            "No migrations found in {}. Run 'panelctl migrate create <name>' to add one.",
            config.migrations_dir().display()
        );
        println!();
    } else {
        println!();
        println!("{:<4} {:<40} Applied at", "", "Migration");
        for unit in &report.units {
            match &unit.applied {
                Some(entry) => println!("{:<4} {:<40} {}", CHECK, unit.id, entry.executed_at),
                None => println!(
                    "{:<4} {:<40} {}",
                    PENDING,
                    unit.id,
                    style("pending").dim()
                ),
            }
        }
        println!();

        let applied = report.units.iter().filter(|u| u.applied.is_some()).count();
        println!(
            "{} migrations ({} applied, {} pending)",
            report.units.len(),
            applied,
            report.units.len() - applied
        );
    }

    if !report.orphaned.is_empty() {
        println!();
        println!(
            "{}{} applied migration(s) have no file on disk:",
            WARN,
            report.orphaned.len()
        );
        for entry in &report.orphaned {
            println!("  - {} (applied {})", entry.id, entry.executed_at);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_migrate_run(cli: &Cli, project_dir: PathBuf, force: bool) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    if force && !confirm_force(config.yes) {
        println!("Migration cancelled.");
        return Ok(());
    }

    let mut migrator = open_migrator(&config)?;
    if run_migrations(&mut migrator, force)?.is_empty() {
        println!("No pending migrations.");
    }
    Ok(())
}

/// Apply migrations behind a spinner and print a one-line summary.
pub(crate) fn run_migrations(
    migrator: &mut Migrator<DirectorySource>,
    force: bool,
) -> Result<RunReport> {
    let progress = StepProgress::start("Migrations");
    match migrator.run(force) {
        Ok(report) => {
            let detail = if report.is_empty() {
                "up to date".to_string()
            } else if report.replayed.is_empty() {
                format!("{} applied", report.applied.len())
            } else {
                format!(
                    "{} applied ({} replayed)",
                    report.applied.len(),
                    report.replayed.len()
                )
            };
            progress.finish_ok(detail);
            for id in &report.applied {
                println!("   {}", style(id).dim());
            }
            Ok(report)
        }
        Err(e) => {
            progress.finish_err("failed");
            Err(e).context("Migration run aborted")
        }
    }
}
