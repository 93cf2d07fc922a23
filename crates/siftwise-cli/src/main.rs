mod commands;
mod interrupt;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use siftwise_core::config::load_configuration;
use siftwise_core::plan::preview::PreviewRow;
use siftwise_core::{AppConfig, DraftOptions, Error, SiftEngine};
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();
    let command = match args.command {
        Some(command) => command,
        None => {
            let _ = Cli::command().print_long_help();
            return;
        }
    };

    let config = match load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(2);
        }
    };

    if let Err(err) = run(command, config) {
        error!("Error: {}", err);
        process::exit(err.exit_code());
    }
}

fn run(command: Commands, config: AppConfig) -> Result<(), Error> {
    let reporter = Arc::new(CliReporter::new());
    let engine = SiftEngine::new(config).with_reporter(reporter.clone());
    if let Err(err) = interrupt::install(engine.cancel_token()) {
        warn!("Could not install interrupt handler: {}", err);
    }

    match command {
        Commands::DraftStructure {
            root,
            dest_root,
            preserve,
            no_rules,
        } => {
            let options = DraftOptions {
                preserve: preserve.map(Into::into),
                no_rules,
            };
            let result = engine.draft_structure(&root, &dest_root, &options)?;
            println!();
            info!(
                "{} files scanned, {} unreadable, {} intact units, {} rules",
                format!("{}", result.files_scanned).green(),
                format!("{}", result.unscannable).yellow(),
                format!("{}", result.units).cyan(),
                result.rules_loaded,
            );
            print_preview(&result.preview);
            info!(
                "{} entries, {} residual; artifacts in {}",
                result.entries,
                format!("{}", result.residuals).yellow(),
                result.sift_dir.display()
            );
        }
        Commands::ReviewStructure { dest_root } => {
            let review = engine.review_structure(&dest_root);
            if let Some(run) = &review.run {
                println!(
                    "Plan for {} -> {} (pass {}, preserve {})",
                    run.scan_root.display(),
                    run.dest_root.display(),
                    run.pass_id,
                    run.preserve
                );
            }
            if let Some(outline) = &review.outline {
                println!("{}", outline);
            }
            print_preview(&review.preview);
            for (action, count) in &review.totals {
                println!("  {:<8} {}", action.as_str(), count);
            }
            if let Some(refine) = &review.refine {
                println!(
                    "Last refinement: {} -> {} residuals ({:?})",
                    refine.initial_residuals, refine.final_residuals, refine.stop_reason
                );
            }
            println!("{} residual entries", format!("{}", review.residuals).yellow());
            for (status, count) in &review.journal {
                println!("  journal {:<10} {}", status.as_str(), count);
            }
            if !review.entity_folders.is_empty() {
                println!("Frequent names that could become folders:");
                for folder in &review.entity_folders {
                    println!("  {:<20} {:?}, {} files", folder.name.cyan(), folder.kind, folder.files);
                }
            }
            for warning in &review.warnings {
                warn!("{}", warning.yellow());
            }
        }
        Commands::Execute { dest_root, what_if } => {
            let report = engine.execute(&dest_root, what_if)?;
            if report.what_if {
                for op in &report.pending {
                    println!(
                        "  would {} {} -> {}",
                        op.operation.as_str(),
                        op.source.display(),
                        op.dest.display()
                    );
                }
                info!(
                    "What-if: {} operations pending, {} already applied",
                    format!("{}", report.pending.len()).cyan(),
                    report.already_applied
                );
                return Ok(());
            }
            info!(
                "{} applied ({} resumed), {} already applied, {} failed",
                format!("{}", report.applied).green(),
                report.resumed,
                report.already_applied,
                format!("{}", report.failed.len()).red(),
            );
            for (path, reason) in &report.failed {
                error!("{}: {}", path.display(), reason);
            }
            if report.cancelled() {
                warn!("Cancelled; {} operations were not started", report.not_dispatched);
            }
        }
        Commands::RefineResiduals {
            dest_root,
            max_passes,
        } => {
            let summary = engine.refine_residuals(&dest_root, max_passes)?;
            info!(
                "Residuals {} -> {} after {} passes ({:?})",
                summary.initial_residuals,
                format!("{}", summary.final_residuals).yellow(),
                summary.passes.len(),
                summary.stop_reason,
            );
        }
        Commands::PromoteSuggested { dest_root, label } => {
            let promoted = engine.promote_suggested(&dest_root, label.as_deref())?;
            info!("{} suggested entries promoted", format!("{}", promoted).green());
        }
        Commands::Undo { dest_root, yes } => {
            if !yes && !confirm_undo(&dest_root)? {
                return Ok(());
            }
            let report = engine.undo(&dest_root)?;
            reporter.finish_bar();
            info!(
                "{} rolled back, {} planned leftovers closed, {} conflicts",
                format!("{}", report.rolled_back).green(),
                report.closed,
                format!("{}", report.conflicts.len()).red(),
            );
            for (path, reason) in &report.conflicts {
                warn!("{}: {}", path.display(), reason);
            }
        }
        Commands::PrintConfig => {
            println!("Configuration: {:#?}", engine.config());
        }
    }

    Ok(())
}

fn print_preview(rows: &[PreviewRow]) {
    for row in rows {
        let label = if row.label.is_empty() { "(none)" } else { row.label.as_str() };
        println!("  {:<20} {:<8} {}", label, row.action.as_str(), row.count);
    }
}

fn confirm_undo(dest_root: &Path) -> io::Result<bool> {
    prompt_confirm(
        &format!("Undo every applied operation recorded under {}?", dest_root.display()),
        Some(false),
    )
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
