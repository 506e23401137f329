//! Expedite CLI
//!
//! Host for the wizard automation core: loads the settings document, feeds
//! identifiers to a run and relays resume/abort input from the terminal.
//!
//! Usage:
//!   expedite run alice1 bob22          # Process identifiers
//!   expedite run --file ids.txt        # One identifier per line
//!   expedite probe                     # Live cursor position for calibration
//!   expedite settings show             # Print the current settings
//!   expedite settings set --key-delay 0.1 --field-offset 1080,444

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use expedite::{
    create_platform, Configuration, LogChannel, LogEvent, LogKind, LogSink, Offset, PauseReason,
    PauseStatus, RunController, RunRequest, RunStatus, Settings, SettingsStore,
};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

mod utils;

const SETUP_REMINDER: &str = "\
Before the first run:
  1. Open the target application and leave its main window visible.
  2. Use `expedite probe` to read click offsets relative to the main window.
  3. Store them with `expedite settings set --primary-offset X,Y --tab-offset X,Y --field-offset X,Y`.
  4. Keep hands off the keyboard and mouse while a run holds the input.
";

#[derive(Parser)]
#[command(name = "expedite")]
#[command(about = "Drives the access assignment wizard for a list of identifiers")]
struct Cli {
    /// Settings document to use instead of the default location
    #[clap(long = "settings-file", global = true, env = "EXPEDITE_SETTINGS")]
    settings_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process identifiers against the target application
    Run(RunArgs),
    /// Report the cursor position relative to the main window until Ctrl+C
    Probe,
    /// Inspect or change the stored settings
    #[command(subcommand)]
    Settings(SettingsCommands),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Identifiers to process, in order
    ids: Vec<String>,

    /// Read identifiers from a file, one per line
    #[clap(long, short)]
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the settings document
    Show,
    /// Print where the settings document lives
    Path,
    /// Restore defaults
    Reset,
    /// Change individual values
    Set(SetArgs),
}

#[derive(Args, Debug, Default)]
struct SetArgs {
    /// Delay after each click, in seconds
    #[clap(long, value_parser = parse_seconds)]
    click_delay: Option<Duration>,
    /// Delay after each key press, in seconds
    #[clap(long, value_parser = parse_seconds)]
    key_delay: Option<Duration>,
    /// Delay between identifiers, in seconds
    #[clap(long, value_parser = parse_seconds)]
    between_delay: Option<Duration>,
    /// Primary action offset as X,Y
    #[clap(long, value_parser = parse_offset)]
    primary_offset: Option<Offset>,
    /// Secondary tab offset as X,Y
    #[clap(long, value_parser = parse_offset)]
    tab_offset: Option<Offset>,
    /// Identifier field offset as X,Y
    #[clap(long, value_parser = parse_offset)]
    field_offset: Option<Offset>,
    /// Emit numbered action lines
    #[clap(long)]
    debug_actions: Option<bool>,
    /// Show the setup reminder on next launch
    #[clap(long)]
    show_setup_reminder: Option<bool>,
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("'{value}' must be a non-negative number of seconds"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("'{value}': {e}"))
}

fn parse_offset(value: &str) -> Result<Offset, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("'{value}' is not in X,Y form"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<i32>()
            .map_err(|_| format!("'{part}' is not an integer"))
    };
    let offset = Offset::new(parse(x)?, parse(y)?);
    if !offset.is_positive() {
        return Err(format!("{offset} must be positive integers"));
    }
    Ok(offset)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = match &cli.settings_file {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_location(),
    };

    let log_dir = store.path().parent().map(|dir| dir.join("logs"));
    if let Some(dir) = &log_dir {
        // Logging to the console alone is fine when the directory is unusable.
        let _ = fs::create_dir_all(dir);
    }
    let _log_guard = utils::init_logging(log_dir.as_deref().filter(|dir| dir.is_dir()))?;

    match cli.command {
        Commands::Run(args) => run(&store, args).await,
        Commands::Probe => probe(&store).await,
        Commands::Settings(command) => settings(&store, command),
    }
}

/// Prints run output as it arrives
fn console_sink() -> LogSink {
    LogSink::new(|event: LogEvent| {
        let mut stdout = io::stdout().lock();
        let _ = match (event.channel, &event.kind) {
            (LogChannel::Setup, LogKind::Replace(text)) => {
                write!(stdout, "\r{:<32}", text.trim_end().replace('\n', "  "))
            }
            (_, kind) => {
                let text = match kind {
                    LogKind::Append(text) | LogKind::Replace(text) => text,
                };
                if text.contains("PAUSED") {
                    write!(stdout, "{}", text.yellow().bold())
                } else {
                    write!(stdout, "{text}")
                }
            }
        };
        let _ = stdout.flush();
    })
}

fn show_setup_reminder(store: &SettingsStore, settings: &Settings) -> Result<()> {
    if !settings.ui.show_setup_reminder {
        return Ok(());
    }
    println!("{}", SETUP_REMINDER.cyan());
    let mut ui = settings.ui.clone();
    ui.show_setup_reminder = false;
    store
        .save_ui(&ui)
        .with_context(|| format!("Failed to save {}", store.path().display()))
}

fn collect_identifiers(args: &RunArgs) -> Result<Vec<String>> {
    let mut ids = args.ids.clone();
    if let Some(path) = &args.file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read identifiers from {}", path.display()))?;
        ids.extend(text.lines().map(str::to_string));
    }
    Ok(ids)
}

async fn run(store: &SettingsStore, args: RunArgs) -> Result<()> {
    let settings = store.load();
    show_setup_reminder(store, &settings)?;
    let request = RunRequest::new(collect_identifiers(&args)?, settings.config);
    info!("Starting run with {} identifiers", request.identifiers.len());

    let controller = RunController::new(create_platform()?);
    let mut status = controller.coordinator().subscribe();
    let handle = controller.start_workflow(request, console_sink())?;

    // Pause prompt
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            if let PauseStatus::Paused(reason) = current {
                let hint = match reason {
                    PauseReason::SubjectChoice => "after selecting the subject",
                    PauseReason::Correction => "after closing the pop-up",
                };
                println!(
                    "{}",
                    format!("Press Enter {hint} to resume, or Ctrl+C to abort.").bold()
                );
            }
        }
    });

    // Resume on Enter. A plain thread because stdin reads cannot be cancelled.
    let resume = controller.clone();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            if line.is_err() {
                break;
            }
            if !resume.resume() {
                debug!("Enter pressed while not paused");
            }
        }
    });

    let abort = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let outcome = handle.wait().await?;
    match outcome.status {
        RunStatus::Completed | RunStatus::Aborted => Ok(()),
        RunStatus::Failed(message) => {
            bail!("Run failed after {} identifiers: {message}", outcome.processed)
        }
    }
}

async fn probe(store: &SettingsStore) -> Result<()> {
    let settings = store.load();
    show_setup_reminder(store, &settings)?;
    let controller = RunController::new(create_platform()?);
    let handle = controller.start_probe(settings.config, console_sink())?;
    println!("Move the cursor over the target window. Ctrl+C to stop.");

    let abort = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    handle.wait().await??;
    println!();
    Ok(())
}

fn settings(store: &SettingsStore, command: SettingsCommands) -> Result<()> {
    match command {
        SettingsCommands::Show => {
            let settings = store.load();
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommands::Path => println!("{}", store.path().display()),
        SettingsCommands::Reset => {
            store.save(&Settings::default())?;
            println!("Settings reset to defaults");
        }
        SettingsCommands::Set(args) => {
            let mut settings = store.load();
            apply(&mut settings.config, &args);
            if let Some(show) = args.show_setup_reminder {
                settings.ui.show_setup_reminder = show;
            }
            store
                .save(&settings)
                .with_context(|| format!("Failed to save {}", store.path().display()))?;
            println!("Saved {}", store.path().display());
        }
    }
    Ok(())
}

fn apply(config: &mut Configuration, args: &SetArgs) {
    if let Some(delay) = args.click_delay {
        config.click_delay = delay;
    }
    if let Some(delay) = args.key_delay {
        config.key_delay = delay;
    }
    if let Some(delay) = args.between_delay {
        config.between_records_delay = delay;
    }
    if let Some(offset) = args.primary_offset {
        config.primary_action_offset = offset;
    }
    if let Some(offset) = args.tab_offset {
        config.secondary_tab_offset = offset;
    }
    if let Some(offset) = args.field_offset {
        config.field_offset = offset;
    }
    if let Some(debug_actions) = args.debug_actions {
        config.debug_actions = debug_actions;
    }
}
