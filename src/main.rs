use std::{sync::Arc, time::Duration};

use clap::Parser;
use docfuse::{DataDir, Engine, error, tasks::TaskState};
use tracing_subscriber::EnvFilter;

mod cli;
mod output;

use cli::{Cli, Command, ConfigAction};

const LOG_ENV_VAR: &str = "DOCFUSE_LOG";
const TASK_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var(LOG_ENV_VAR) {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let engine = Arc::new(Engine::open(data_dir)?);

    match cli.command {
        Command::Ingest(args) => cmd_ingest(&engine, args)?,
        Command::Query(args) => {
            let k = match args.count {
                Some(k) => k,
                None => engine.settings()?.retrieval_k,
            };
            let hits = engine.query(&args.query, k)?;
            if args.json {
                output::print_json(&hits)?;
            } else {
                output::print_hits(&hits);
            }
        }
        Command::Remove { source } => {
            if !engine.remove(&source)? {
                return Err(error::Error::NotFound {
                    kind: "source",
                    name: source,
                });
            }
            println!("Successfully removed {source} from index.");
        }
        Command::Stats { json } => {
            let stats = engine.stats()?;
            if json {
                output::print_json(&stats)?;
            } else {
                output::print_stats(&stats);
            }
        }
        Command::Sources => output::print_sources(&engine.sources()?),
        Command::Clear => {
            engine.clear()?;
            println!("Index cleared successfully.");
        }
        Command::Show { path } => print!("{}", engine.extract_text(&path)?),
        Command::Graph(args) => {
            let graph = engine.graph(args.max_docs, args.terms)?;
            if args.json {
                output::print_json(&graph)?;
            } else {
                output::print_graph(&graph);
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Show { json } => {
                let settings = engine.settings()?;
                if json {
                    output::print_json(&settings)?;
                } else {
                    output::print_settings(&settings);
                }
            }
            ConfigAction::Set { key, value } => {
                engine.set_setting(&key, &value)?;
                println!("Set {key} = {value}");
            }
            ConfigAction::Reset => {
                engine.reset_settings()?;
                println!("Settings reset to defaults.");
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_ingest(engine: &Arc<Engine>, args: cli::IngestArgs) -> error::Result<()> {
    let report = if args.background {
        let id = engine.submit_ingest(args.paths);
        tracing::info!(%id, "ingestion submitted");
        match engine.tasks().wait(id, TASK_POLL_INTERVAL) {
            Some(TaskState::Completed(report)) => report,
            Some(TaskState::Failed(reason)) => {
                return Err(error::Error::TaskFailed(format!("{id}: {reason}")));
            }
            Some(TaskState::Processing) | None => {
                return Err(error::Error::NotFound {
                    kind: "task",
                    name: id.to_string(),
                });
            }
        }
    } else {
        engine.ingest(&args.paths)?
    };

    if args.json {
        output::print_json(&report)?;
    } else {
        output::print_report(&report);
    }
    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}
