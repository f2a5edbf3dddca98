use std::process::ExitCode;

use clap::Parser;
use treemerge_core::config::TreemergeConfig;
use treemerge_core::resolver::{AlwaysPreferNewerResolver, AlwaysPreferOlderResolver, Resolver};
use treemerge_core::{install_signal_handler, CoreError, RunOptions, ShutdownFlag};

mod cli;
mod logging;
mod progress_display;
mod resolver_interactive;

use cli::{Cli, OnConflict};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            exit_code_for(&err)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, CoreError> {
    for (label, path) in [("source_a", &cli.source_a), ("source_b", &cli.source_b)] {
        if !path.exists() {
            return Err(CoreError::Usage {
                detail: format!("{label} does not exist: {}", path.display()),
            });
        }
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.destination.join("treemerge.toml"));
    let config = TreemergeConfig::load(&config_path)
        .map_err(|e| CoreError::Usage { detail: e.to_string() })?;

    let pool_size = cli.jobs.unwrap_or(config.concurrency.apply_pool_size);
    let reflink = cli.reflink.into();

    let opts = RunOptions {
        a_root: canonicalize(&cli.source_a)?,
        b_root: canonicalize(&cli.source_b)?,
        dest_root: cli.destination.clone(),
        db_path: cli.db.clone(),
        reset: cli.reset,
        pool_size,
        reflink,
    };

    std::fs::create_dir_all(&opts.dest_root)
        .map_err(|e| CoreError::DestinationFatal { detail: e.to_string() })?;

    let resolver = build_resolver(cli.on_conflict);

    let shutdown = ShutdownFlag::new();
    install_signal_handler(shutdown.clone())
        .map_err(|e| CoreError::Usage { detail: format!("failed to install signal handler: {e}") })?;

    let (progress_tx, progress_rx) = treemerge_core::progress::channel();
    let quiet = cli.quiet;
    let display_handle = std::thread::spawn(move || progress_display::run(&progress_rx, quiet));

    let outcome = treemerge_core::coordinator::run(&opts, resolver.as_ref(), &shutdown, Some(&progress_tx));
    drop(progress_tx);
    let _ = display_handle.join();

    let outcome = outcome?;

    if outcome.aborted {
        eprintln!("interrupted; {} rows left for a later run", outcome.final_snapshot.outstanding());
        return Ok(ExitCode::from(2));
    }
    if outcome.final_snapshot.failed > 0 {
        eprintln!("completed with {} failed rows (see row errors above)", outcome.final_snapshot.failed);
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::from(0))
}

fn build_resolver(choice: OnConflict) -> Box<dyn Resolver> {
    match choice {
        OnConflict::Interactive => Box::new(resolver_interactive::InteractiveResolver),
        OnConflict::PreferNewer => Box::new(AlwaysPreferNewerResolver),
        OnConflict::PreferOlder => Box::new(AlwaysPreferOlderResolver),
    }
}

fn canonicalize(path: &std::path::Path) -> Result<std::path::PathBuf, CoreError> {
    path.canonicalize().map_err(|e| CoreError::Usage {
        detail: format!("cannot resolve {}: {e}", path.display()),
    })
}

fn exit_code_for(err: &CoreError) -> ExitCode {
    match err {
        CoreError::Usage { .. } => ExitCode::from(3),
        CoreError::ResolverAborted => ExitCode::from(2),
        CoreError::StoreUnavailable { .. }
        | CoreError::SchemaVersionMismatch { .. }
        | CoreError::RootMismatch { .. }
        | CoreError::DestinationFatal { .. } => ExitCode::from(4),
    }
}
