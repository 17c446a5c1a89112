//! Bulk Dispatch CLI
//!
//! Load contacts and a message template, then send through the channel driver.

use anyhow::{bail, Context};
use bulk_dispatch::channel::ChannelConnector;
use bulk_dispatch::config::{Config, DispatchSettings};
use bulk_dispatch::contacts::ContactQueue;
use bulk_dispatch::dispatcher::{DispatchJob, Dispatcher, RunStatus, RunSummary};
use bulk_dispatch::driver::DriverConnector;
use bulk_dispatch::gate::{read_login_status, SessionGate};
use bulk_dispatch::progress::{ProgressRecord, ProgressStore};
use bulk_dispatch::template::MessageTemplate;
use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Bulk Dispatch - send a personalized message to a contact list
#[derive(Parser)]
#[command(name = "bulk-dispatch")]
#[command(about = "Rate-limited, resumable bulk message sender")]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Channel driver program
    #[arg(long, global = true)]
    driver: Option<PathBuf>,

    /// Directory for progress and login state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TemplateArgs {
    /// Message text; `%name%` is replaced with each contact's name
    #[arg(short, long, conflicts_with = "template_file")]
    template: Option<String>,

    /// Read the message text from a file
    #[arg(short = 'f', long)]
    template_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send the message to every contact
    Send {
        /// Contacts file: JSON array of {"name", "phone"}
        #[arg(short, long)]
        contacts: PathBuf,

        #[command(flatten)]
        template: TemplateArgs,

        /// Resume saved progress without asking
        #[arg(long, conflicts_with = "restart")]
        resume: bool,

        /// Ignore saved progress and start from the first contact
        #[arg(long)]
        restart: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render the message for one name without sending
    Preview {
        #[command(flatten)]
        template: TemplateArgs,

        /// Name to substitute
        #[arg(short, long, default_value = "Cliente Teste")]
        name: String,
    },

    /// Show saved progress and last login state
    Status,

    /// Delete saved progress
    Reset {
        /// Also remove a lock left by a crashed run
        #[arg(long)]
        unlock: bool,
    },

    /// Check the channel login, waiting for interactive login if needed
    Login,

    /// Write the default settings file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// How to treat a saved progress record
#[derive(Debug, Clone, Copy, PartialEq)]
enum ResumeChoice {
    Resume,
    Restart,
    Ask,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;

    match cli.command {
        Commands::Send {
            contacts,
            template,
            resume,
            restart,
            json,
        } => {
            let choice = match (resume, restart) {
                (true, _) => ResumeChoice::Resume,
                (_, true) => ResumeChoice::Restart,
                _ => ResumeChoice::Ask,
            };
            cmd_send(&config, &contacts, &template, choice, json).await
        }
        Commands::Preview { template, name } => cmd_preview(&template, &name),
        Commands::Status => cmd_status(&config),
        Commands::Reset { unlock } => cmd_reset(&config, unlock),
        Commands::Login => cmd_login(&config).await,
        Commands::InitConfig { force } => cmd_init_config(&config, force),
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(path) = &cli.config {
        config.settings_file = path.clone();
    }
    if let Some(path) = &cli.driver {
        config.driver = path.clone();
    }
    if let Some(dir) = &cli.state_dir {
        config.state_dir = dir.clone();
        config.progress_file = dir.join("progress.json");
        config.login_status_file = dir.join("login_status.json");
    }
    config
        .with_settings_file()
        .context("failed to load settings")
}

fn load_template(args: &TemplateArgs) -> anyhow::Result<MessageTemplate> {
    let body = match (&args.template, &args.template_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read template {}", path.display()))?,
        (None, None) => bail!("provide --template or --template-file"),
    };
    Ok(MessageTemplate::new(body.trim_end())?)
}

/// Pick the starting cursor from a saved record and the user's choice
///
/// `confirm` is only consulted for `Ask` with a usable record.
fn choose_start(
    record: Option<&ProgressRecord>,
    total: usize,
    choice: ResumeChoice,
    confirm: impl FnOnce(&ProgressRecord) -> bool,
) -> usize {
    let Some(record) = record else {
        return 0;
    };
    let Some(cursor) = record.resume_cursor(total) else {
        warn!(
            saved_total = record.total,
            total, "Saved progress is for a different contact list, starting over"
        );
        return 0;
    };

    match choice {
        ResumeChoice::Resume => cursor,
        ResumeChoice::Restart => 0,
        ResumeChoice::Ask => {
            if confirm(record) {
                cursor
            } else {
                0
            }
        }
    }
}

fn ask_resume(record: &ProgressRecord) -> bool {
    if !std::io::stdin().is_terminal() {
        return true;
    }
    print!(
        "Unfinished run from {}: {} of {} sent. Resume from contact {}? [Y/n] ",
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.cursor,
        record.total,
        record.cursor + 1
    );
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return true;
    }
    !matches!(answer.trim().to_lowercase().as_str(), "n" | "no")
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current message");
            trigger.cancel();
        }
    });
    cancel
}

async fn cmd_send(
    config: &Config,
    contacts_path: &Path,
    template: &TemplateArgs,
    choice: ResumeChoice,
    json: bool,
) -> anyhow::Result<()> {
    let contacts = ContactQueue::load(contacts_path)
        .with_context(|| format!("failed to load contacts {}", contacts_path.display()))?;
    let template = load_template(template)?;
    if !template.has_placeholder() {
        warn!("Template has no %name% placeholder; every contact gets the same text");
    }

    let malformed = contacts.malformed_count();
    if malformed > 0 {
        warn!(malformed, "Some contacts have no valid phone and will be skipped");
    }
    info!(contacts = contacts.len(), "Loaded contacts");

    let store = ProgressStore::new(config);
    let record = store.load()?;
    // Starting over discards the record inside the run, once the lock is held
    let start = choose_start(record.as_ref(), contacts.len(), choice, ask_resume);

    let dispatcher = Dispatcher::new(config, Box::new(DriverConnector::new(config)))?;
    let job = DispatchJob { contacts, template };
    let cancel = cancel_on_ctrl_c();

    let summary = dispatcher.run(&job, start, &cancel).await?;
    print_summary(&summary, json)?;
    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    match summary.status {
        RunStatus::Completed => println!("Dispatch complete"),
        RunStatus::Cancelled => println!(
            "Dispatch stopped at contact {}; run again to resume",
            summary.final_cursor + 1
        ),
    }
    println!("  attempted: {}", summary.attempted);
    println!("  delivered: {}", summary.delivered);
    println!("  failed:    {}", summary.failed);
    println!("  skipped:   {}", summary.skipped);
    if summary.persistence_failures > 0 {
        println!(
            "  warning: progress could not be saved {} time(s)",
            summary.persistence_failures
        );
    }
    Ok(())
}

fn cmd_preview(template: &TemplateArgs, name: &str) -> anyhow::Result<()> {
    let template = load_template(template)?;
    println!("{}", template.render(name));
    Ok(())
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    let store = ProgressStore::new(config);
    match store.load()? {
        Some(record) => println!(
            "Unfinished run: {} of {} processed ({} remaining), saved {}",
            record.cursor,
            record.total,
            record.remaining(),
            record.timestamp.to_rfc3339()
        ),
        None => println!("No unfinished run"),
    }

    let logged_in = read_login_status(&config.login_status_file);
    println!(
        "Last login check: {}",
        if logged_in { "logged in" } else { "not logged in" }
    );
    Ok(())
}

fn cmd_reset(config: &Config, unlock: bool) -> anyhow::Result<()> {
    let store = ProgressStore::new(config);
    if unlock && store.break_lock()? {
        println!("Removed stale lock");
    }

    let _lock = store
        .lock()
        .context("a dispatch is running; stop it first or pass --unlock if it crashed")?;
    if store.clear()? {
        println!("Saved progress deleted");
    } else {
        println!("No saved progress");
    }
    Ok(())
}

async fn cmd_login(config: &Config) -> anyhow::Result<()> {
    let connector = DriverConnector::new(config);
    let mut channel = connector.connect().await?;
    let mut gate = SessionGate::new(&config.settings).with_status_file(&config.login_status_file);
    let cancel = cancel_on_ctrl_c();

    let result = gate.ensure_ready(channel.as_mut(), &cancel).await;
    if let Err(e) = channel.close().await {
        warn!("Failed to close channel: {}", e);
    }

    if result? {
        println!("Logged in");
        Ok(())
    } else {
        bail!(
            "not logged in after {}s; complete the login and try again",
            config.settings.login_timeout_secs
        )
    }
}

fn cmd_init_config(config: &Config, force: bool) -> anyhow::Result<()> {
    let path = &config.settings_file;
    if path.exists() && !force {
        println!("Settings already exist: {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&DispatchSettings::default())?)?;
    println!("Wrote {}", path.display());
    Ok(())
}
