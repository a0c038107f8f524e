use clap::{Arg, ArgAction, ArgMatches, Command};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use segrelay::config::Config;
use segrelay::logging::*;
use segrelay::pipeline::Pipeline;
use segrelay::shutdown::{setup_signal_handlers, ShutdownSignal};
use segrelay::types::{CycleOutcome, SegmentState};

///////////////////////
// Utility functions //
///////////////////////

fn cli() -> Command {
	Command::new("segrelay")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Verified, crash-safe replication of recorded audio segments")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Config file (TOML, or JSON with a .json extension)"),
		)
		.arg(
			Arg::new("dry-run")
				.long("dry-run")
				.action(ArgAction::SetTrue)
				.global(true)
				.help("Log what would be transferred or removed without doing it"),
		)
		.arg(
			Arg::new("log-level")
				.long("log-level")
				.value_name("LEVEL")
				.global(true)
				.help("Default log filter when RUST_LOG is unset"),
		)
		.subcommand(Command::new("run").about("Poll and replicate until SIGINT/SIGTERM"))
		.subcommand(Command::new("once").about("Run a single cycle and exit"))
		.subcommand(Command::new("status").about("Show the ledger state of every segment"))
		.subcommand(
			Command::new("serve-digest")
				.about("Answer digest requests on stdin/stdout (used over ssh)")
				.arg(Arg::new("dir").required(true)),
		)
}

/// `--config`, else `~/.segrelay/config.toml` when present, else defaults
fn load_config(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
	let mut config = match matches.get_one::<String>("config") {
		Some(path) => Config::load(Path::new(path))?,
		None => {
			let default_path = Config::default().state_dir.join("config.toml");
			if default_path.exists() {
				Config::load(&default_path)?
			} else {
				Config::default()
			}
		}
	};

	if matches.get_flag("dry-run") {
		config.dry_run = true;
	}
	if let Some(level) = matches.get_one::<String>("log-level") {
		config.log_level = level.clone();
	}
	Ok(config)
}

async fn start(config: Config) -> Result<(Pipeline, segrelay::state::StateLock), Box<dyn Error>> {
	let lock = config.state().lock().await?;
	let pipeline = Pipeline::new(config).await?;
	pipeline.ensure_available().await?;
	Ok((pipeline, lock))
}

async fn dispatch(matches: ArgMatches) -> Result<ExitCode, Box<dyn Error>> {
	let config = load_config(&matches)?;

	match matches.subcommand() {
		Some(("serve-digest", sub)) => {
			// stdout carries the protocol, so only warnings go to stderr by default
			segrelay::logging::init_tracing("warn", None)?;
			let dir = sub.get_one::<String>("dir").ok_or("serve-digest: directory argument required")?;
			segrelay::serve::serve(&PathBuf::from(dir), config.verify.chunk_size)
				.await
				.map_err(|e| e.to_string())?;
			Ok(ExitCode::SUCCESS)
		}
		Some(("status", _)) => {
			segrelay::logging::init_tracing(&config.log_level, config.log_file.as_deref())?;
			let mut pipeline = Pipeline::new(config).await?;
			let mut counts: BTreeMap<SegmentState, usize> = BTreeMap::new();
			for (key, state) in pipeline.status().await? {
				println!("{:<12} {}", state.to_string(), key);
				*counts.entry(state).or_default() += 1;
			}
			let summary: Vec<String> =
				counts.iter().map(|(state, count)| format!("{} {}", count, state)).collect();
			println!("{}", if summary.is_empty() { "no segments".to_string() } else { summary.join(", ") });
			Ok(ExitCode::SUCCESS)
		}
		Some(("once", _)) => {
			segrelay::logging::init_tracing(&config.log_level, config.log_file.as_deref())?;
			let (mut pipeline, _lock) = start(config).await?;
			let report = pipeline.run_cycle().await;
			Ok(match report.outcome {
				CycleOutcome::Completed => ExitCode::SUCCESS,
				_ => ExitCode::FAILURE,
			})
		}
		Some(("run", _)) => {
			segrelay::logging::init_tracing(&config.log_level, config.log_file.as_deref())?;
			let (mut pipeline, _lock) = start(config).await?;
			let shutdown = ShutdownSignal::new();
			setup_signal_handlers(shutdown.clone());
			pipeline.run(&shutdown).await;
			Ok(ExitCode::SUCCESS)
		}
		_ => Err("unknown subcommand".into()),
	}
}

#[tokio::main]
async fn main() -> ExitCode {
	match dispatch(cli().get_matches()).await {
		Ok(code) => code,
		Err(e) => {
			error!("{}", e);
			eprintln!("segrelay: {}", e);
			ExitCode::FAILURE
		}
	}
}

// vim: ts=4
