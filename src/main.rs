//! `daq_script` command-line front end.
//!
//! ```bash
//! # validate, then run against the hardware
//! daq_script run measurement.dsc
//!
//! # validate only
//! daq_script run measurement.dsc --check-only
//!
//! # run against recording mock transports
//! daq_script --log-level debug run measurement.dsc --simulate
//!
//! # show known instruments and their commands
//! daq_script list --definitions ./instruments
//!
//! # check one generic definition line
//! daq_script parse-definition 'setT | SETP %d | Loop [1,2]'
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_script::adapters::{DefaultTransports, MockTransports, TransportFactory};
use daq_script::instrument::parse_descriptor;
use daq_script::scripting::RhaiEngine;
use daq_script::{logging, Dispatcher, HandlerRegistry, PassOutcome, Settings};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Validate and run instrument scripts
#[derive(Parser, Debug)]
#[command(name = "daq_script", version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "daq_script.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a script, then run it
    Run {
        /// Script file
        script: PathBuf,

        /// Stop after the validating pass
        #[arg(long)]
        check_only: bool,

        /// Use recording mock transports instead of real connections
        #[arg(long)]
        simulate: bool,

        /// Directory of generic instrument definition files
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// List registered instruments and their commands
    List {
        /// Directory of generic instrument definition files
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// Parse one generic definition line and print it as JSON
    ParseDefinition {
        /// The definition line
        line: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // a missing file means defaults
    let mut settings = match Settings::load_from(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(2);
        }
    };
    if let Some(level) = &cli.log_level {
        settings.application.log_level = level.to_lowercase();
        if let Err(e) = settings.validate() {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    }
    logging::init(&settings.application.log_level, settings.application.json_logs);

    let code = match run(cli.command, settings).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    process::exit(code);
}

async fn run(command: Command, mut settings: Settings) -> Result<i32> {
    match command {
        Command::Run {
            script,
            check_only,
            simulate,
            definitions,
        } => {
            if let Some(dir) = definitions {
                settings.paths.definitions_dir = Some(dir);
            }
            if settings.paths.project_dir.is_none() {
                settings.paths.project_dir = script.parent().map(Path::to_path_buf);
            }
            run_script(&script, check_only, simulate, settings).await
        }
        Command::List { definitions } => {
            if let Some(dir) = definitions {
                settings.paths.definitions_dir = Some(dir);
            }
            list(&settings)?;
            Ok(0)
        }
        Command::ParseDefinition { line } => {
            let descriptor = parse_descriptor(&line)?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
            Ok(0)
        }
    }
}

fn build_registry(settings: &Settings) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::with_builtins()?;
    let names = registry.scan(Some(&settings.definitions_dir()))?;
    tracing::info!(count = names.len(), "instrument registry ready");
    Ok(registry)
}

async fn run_script(script: &Path, check_only: bool, simulate: bool, settings: Settings) -> Result<i32> {
    let text = tokio::fs::read_to_string(script)
        .await
        .with_context(|| format!("cannot read script {}", script.display()))?;
    let lines: Vec<String> = text.lines().map(str::to_string).collect();

    let registry = build_registry(&settings)?;
    let mock = MockTransports::new();
    let transports: Arc<dyn TransportFactory> = if simulate {
        Arc::new(mock.clone())
    } else {
        Arc::new(DefaultTransports::new(settings.transport.clone()))
    };
    let snippets = Arc::new(RhaiEngine::new(settings.dispatcher.snippet_max_operations));
    let dispatcher = Dispatcher::new(registry, transports, snippets, Arc::new(settings));

    let controller = dispatcher.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted");
            controller.stop().await;
        }
    });

    let result = if check_only {
        dispatcher.run(&lines).await
    } else {
        dispatcher.execute(&lines).await
    };

    if simulate {
        for record in mock.sent() {
            println!("{} <- {}", record.endpoint, record.message);
        }
    }

    match result {
        Ok(PassOutcome::Completed) => {
            println!("{}: {}", script.display(), if check_only { "valid" } else { "done" });
            Ok(0)
        }
        Ok(PassOutcome::Stopped) => {
            println!("{}: stopped", script.display());
            Ok(130)
        }
        Err(failure) => {
            eprintln!("{failure}");
            Ok(1)
        }
    }
}

fn list(settings: &Settings) -> Result<()> {
    let registry = build_registry(settings)?;
    for info in registry.iter() {
        let transports: Vec<String> = info.transports().iter().map(|t| t.to_string()).collect();
        println!(
            "{}  [{}]  {}",
            info.display_name(),
            transports.join(", "),
            info.implementation_id()
        );

        let handler = info.instantiate();
        let reflected = handler.list_commands();
        let generic = info.generic_commands();
        for command in reflected.iter().chain(generic.iter()) {
            match &command.description {
                Some(description) => println!("    {}  {}", command.signature(), description),
                None => println!("    {}", command.signature()),
            }
        }
    }
    Ok(())
}
