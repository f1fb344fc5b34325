//! CLI entry point for thermo_daq
//!
//! Provides command-line access to:
//! - the polling daemon (`run`)
//! - one-off instrument operations (`poll`, `get-config`, `set-config`, `dump`, `param`)
//! - configuration checking (`check`)
//!
//! # Usage
//!
//! ```bash
//! thermo_daq --config config/thermo.toml run
//! thermo_daq poll tei49i --no-save
//! thermo_daq dump tei49i --kind lrec
//! thermo_daq param set tei49c "o3 conc" 50
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thermo_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use thermo_daq::endpoint::InstrumentEndpoint;
use thermo_daq::logging;
use thermo_daq::scheduler::Scheduler;
use thermo_daq::session::{CommandOutcome, InstrumentSession, Persistence, RecordKind};
use tracing::info;

#[derive(Parser)]
#[command(name = "thermo_daq")]
#[command(about = "Poll Thermo ozone instruments and stage binned data files", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure every enabled endpoint, then poll until Ctrl-C
    Run,

    /// Query one reading
    Poll {
        endpoint: String,

        /// Command to send instead of the endpoint's default
        #[arg(long)]
        command: Option<String>,

        /// Do not append the reading to the data file
        #[arg(long)]
        no_save: bool,
    },

    /// Query the configured get-config commands
    GetConfig { endpoint: String },

    /// Sync the clock and issue the configured set-config commands
    SetConfig { endpoint: String },

    /// Download the whole record buffer
    Dump {
        endpoint: String,

        /// lrec or srec
        #[arg(long, default_value = "lrec")]
        kind: RecordKind,
    },

    /// Read or write a single instrument parameter
    Param {
        #[command(subcommand)]
        action: ParamAction,
    },

    /// Load and validate the configuration
    Check {
        /// Print the effective configuration as TOML
        #[arg(long)]
        dump: bool,
    },
}

#[derive(Subcommand)]
enum ParamAction {
    Get { endpoint: String, name: String },
    Set {
        endpoint: String,
        name: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_settings(&settings).context("initializing logging")?;

    match cli.command {
        Commands::Run => {
            let scheduler = Scheduler::from_settings(&settings)?;
            info!(endpoints = scheduler.len(), "starting {}", settings.application.name);
            scheduler.run().await?;
        }
        Commands::Poll {
            endpoint,
            command,
            no_save,
        } => {
            let mut session = open_session(&settings, &endpoint)?;
            let reading = tokio::task::spawn_blocking(move || {
                session.get_data(command.as_deref(), !no_save)
            })
            .await??;
            println!("{}", reading.text);
            match reading.persistence {
                Persistence::Written(appended) => {
                    eprintln!("saved to {}", appended.file.display());
                    if let Some(rotation) = appended.rotation {
                        eprintln!("finished {}", rotation.finished.display());
                    }
                }
                Persistence::Failed(e) => eprintln!("not saved: {e}"),
                Persistence::Suppressed => {}
            }
        }
        Commands::GetConfig { endpoint } => {
            let mut session = open_session(&settings, &endpoint)?;
            let outcomes = tokio::task::spawn_blocking(move || session.get_config()).await??;
            print_outcomes(&outcomes);
        }
        Commands::SetConfig { endpoint } => {
            let mut session = open_session(&settings, &endpoint)?;
            let outcomes = tokio::task::spawn_blocking(move || session.set_config()).await??;
            print_outcomes(&outcomes);
        }
        Commands::Dump { endpoint, kind } => {
            let mut session = open_session(&settings, &endpoint)?;
            let dump =
                tokio::task::spawn_blocking(move || session.get_all_buffered(kind)).await??;
            print_outcomes(&dump.chunks);
            println!("{} records written to {}", dump.records, dump.path.display());
            if let Some(e) = &dump.write_error {
                eprintln!("dump incomplete: {e}");
            }
            match dump.staged {
                Some(Ok(artifact)) => println!("staged as {}", artifact.path.display()),
                Some(Err(e)) => eprintln!("staging failed: {e}"),
                None => {}
            }
        }
        Commands::Param { action } => {
            let reply = match action {
                ParamAction::Get { endpoint, name } => {
                    let mut session = open_session(&settings, &endpoint)?;
                    tokio::task::spawn_blocking(move || session.get_parameter(&name)).await??
                }
                ParamAction::Set {
                    endpoint,
                    name,
                    value,
                } => {
                    let mut session = open_session(&settings, &endpoint)?;
                    tokio::task::spawn_blocking(move || session.set_parameter(&name, &value))
                        .await??
                }
            };
            println!("{reply}");
        }
        Commands::Check { dump } => {
            if dump {
                print!("{}", settings.to_toml_string()?);
            } else {
                println!(
                    "{}: {} endpoint(s), {} enabled",
                    cli.config.display(),
                    settings.endpoints.len(),
                    settings.enabled_endpoints().count()
                );
            }
        }
    }
    Ok(())
}

fn open_session(settings: &Settings, name: &str) -> Result<InstrumentSession> {
    let config = settings.endpoint(name)?;
    let endpoint = InstrumentEndpoint::from_config(config, settings)?;
    Ok(InstrumentSession::new(endpoint))
}

fn print_outcomes(outcomes: &[CommandOutcome]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(reply) => println!("{}: {}", outcome.command, reply),
            Err(e) => eprintln!("{}: error: {}", outcome.command, e),
        }
    }
}
