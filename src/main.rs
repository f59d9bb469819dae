use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod batch;
mod cli;
mod config;
mod depth;
mod error;
mod io;
mod reduction;
#[cfg(test)]
mod test_support;
mod window;

use batch::{run_batch, units, write_report};
use cli::{CleanupArgs, Command, MaxDepthArgs, get_args};
use config::{AggregationMode, BatchConfig, SnapshotPattern, UnitConfig, VariableNames, WindowConfig};
use io::cleanup::{read_run_id_file, remove_run_directories};

fn main() -> Result<()> {
    let cli = get_args();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::MaxDepth(args) => max_depth(args),
        Command::Cleanup(args) => cleanup(args),
    }
}

fn max_depth(args: MaxDepthArgs) -> Result<()> {
    // Configuration errors surface before any snapshot is touched
    let aggregation: AggregationMode = args.aggregation.parse()?;
    let window = WindowConfig::new(args.start_index, args.end_index)?;

    let config = BatchConfig {
        input_root: args.input_root,
        output_root: args.output_root,
        workers: args.workers.unwrap_or_else(num_cpus::get),
        unit: UnitConfig {
            window,
            pattern: SnapshotPattern::new(args.prefix, args.suffix),
            aggregation,
            variables: VariableNames::new(),
            shards: args.shards.max(1),
            retries: args.retries,
        },
    };
    let todo = units(&args.run_ids, &args.grids);

    println!("Max depth configuration:");
    println!("  Input root: {}", config.input_root.display());
    println!(
        "  Window: timesteps {} to {} ({:?})",
        window.start_index, window.end_index, aggregation
    );
    println!("  Units: {}", todo.len());
    println!("  Workers: {}", config.workers);

    let pb = ProgressBar::new(todo.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} units ({eta})")?
            .progress_chars("#>-"),
    );

    let outcomes = run_batch(&todo, &config, args.fail_fast, &pb)?;
    pb.finish_and_clear();

    if let Some(report) = &args.report {
        write_report(report, &outcomes)
            .with_context(|| format!("Failed to write report: {:?}", report))?;
    }

    let mut failed = 0;
    for outcome in &outcomes {
        let unit = &outcome.unit;
        match &outcome.result {
            Ok(summary) => println!(
                "  {} / {}: ok, {} snapshots, {} nodes, {} faces -> {}",
                unit.run_id,
                unit.grid_id,
                summary.snapshots,
                summary.nodes,
                summary.faces,
                summary.artifacts.max_depth.display()
            ),
            Err(e) => {
                failed += 1;
                println!("  {} / {}: {} ({})", unit.run_id, unit.grid_id, e.kind(), e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} units failed", failed, outcomes.len());
    }
    println!("\nDone with {} units.", outcomes.len());
    Ok(())
}

fn cleanup(args: CleanupArgs) -> Result<()> {
    let mut run_ids = args.run_ids;
    if let Some(path) = &args.run_id_file {
        run_ids.extend(read_run_id_file(path)?);
    }
    if run_ids.is_empty() {
        bail!("No run ids given");
    }

    println!("Removing directories of {} runs under {}", run_ids.len(), args.root.display());
    let outcomes = remove_run_directories(&args.root, &run_ids);
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("{} successfully removed!", outcome.path.display()),
            Err(e) => println!("Error: {} : {} (run {})", outcome.path.display(), e, outcome.run_id),
        }
    }
    // Best effort: failures are reported above, not escalated
    Ok(())
}
