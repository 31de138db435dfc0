//! stepwise - drive step-by-step execution traces from the command line
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::builder::RangedU64ValueParser;
use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::eyre::eyre;

use stepwise::{open_session, run_repl, run_trace, TraceOptions, TraceTarget};
use stepwise_app::config::{init_config_file, load_config, resolve_config_path, Settings};
use stepwise_app::{TraceRunner, TracerRegistry};

/// Drive step-by-step execution traces through external tracer processes
#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(about = "Drive step-by-step execution traces", long_about = None)]
struct Args {
    /// Config file (default: $STEPWISE_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured languages
    Languages,

    /// Trace a program to its end, printing NDJSON events
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Skip stdout lines that are not result batches
        #[arg(long)]
        lenient: bool,

        /// Maximum number of steps
        #[arg(long, value_parser = positive::<usize>())]
        steps: Option<usize>,

        /// Per-command time limit in milliseconds
        #[arg(long, value_parser = positive::<u64>())]
        timeout_ms: Option<u64>,

        /// Value sent with `input` after start (repeatable)
        #[arg(long = "input", value_name = "VALUE")]
        inputs: Vec<String>,
    },

    /// Read start/step/input/stop commands from stdin
    Repl {
        #[command(flatten)]
        target: TargetArgs,

        /// Skip stdout lines that are not result batches
        #[arg(long)]
        lenient: bool,

        /// Per-command time limit in milliseconds
        #[arg(long, value_parser = positive::<u64>())]
        timeout_ms: Option<u64>,
    },

    /// Write a default config file
    Init,
}

/// Limits given on the command line follow the config rule: zero is rejected.
fn positive<T: TryFrom<u64>>() -> RangedU64ValueParser<T> {
    RangedU64ValueParser::new().range(1..)
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
struct TargetArgs {
    /// Language from the config's [tracers] table
    #[arg(long)]
    language: Option<String>,

    /// Tracer command line, run through the shell
    #[arg(long)]
    command: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> color_eyre::Result<TraceTarget> {
        match (&self.language, &self.command) {
            (Some(language), _) => Ok(TraceTarget::Language(language.clone())),
            (None, Some(command)) => Ok(TraceTarget::Command(command.clone())),
            (None, None) => Err(eyre!("one of --language or --command is required")),
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let logging = match stepwise_core::logging::init() {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Logging disabled: {}", e);
            None
        }
    };
    let apply_verbose = |settings: &Settings| {
        if let Some(handle) = &logging {
            handle.set_verbose(settings.output.verbose);
        }
    };

    match args.command {
        Command::Init => {
            let path = resolve_config_path(args.config.as_deref())
                .ok_or_else(|| eyre!("no config directory on this platform"))?;
            if init_config_file(&path)? {
                eprintln!("Created {}", path.display());
            } else {
                eprintln!("{} already exists", path.display());
            }
            Ok(())
        }
        Command::Languages => {
            let settings = load_config(args.config.as_deref())?;
            for language in TracerRegistry::from_settings(&settings).languages() {
                println!("{}", language);
            }
            Ok(())
        }
        Command::Run {
            target,
            lenient,
            steps,
            timeout_ms,
            inputs,
        } => {
            let settings = load_config(args.config.as_deref())?;
            apply_verbose(&settings);
            let options = TraceOptions {
                steps,
                timeout_ms,
                lenient,
                inputs,
            };
            if !run_trace(&settings, &target.target()?, &options).await? {
                if let Some(handle) = &logging {
                    eprintln!("Trace failed, details in {}", handle.directory().display());
                }
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Repl {
            target,
            lenient,
            timeout_ms,
        } => {
            let settings = load_config(args.config.as_deref())?;
            apply_verbose(&settings);
            let options = TraceOptions {
                timeout_ms,
                ..Default::default()
            };
            let session = open_session(&settings, &target.target()?, lenient)?;
            let runner = TraceRunner::new(options.limits(&settings));
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_repl(&session, &runner, stdin).await?;
            Ok(())
        }
    }
}
