//! safefold: folder protection CLI
//!
//! Commands:
//!   init                     - set the master password (first run)
//!   add / remove / list      - manage registered folders
//!   encrypt / decrypt <dir>  - encrypt or decrypt every file in place
//!   lock / unlock <dir>      - quick-protect a folder (rename, hide, deny)
//!   passwd                   - change the master password
//!   config show              - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use safefold_core::{ProtectionMode, SafeConfig};
use safefold_engine::{BatchReport, ProgressFn, Vault};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "safefold",
    version,
    about = "Password-protected folder encryption",
    long_about = "safefold: encrypt folders in place or quick-lock them behind an obfuscated name"
)]
struct Cli {
    /// Path to safefold.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SAFEFOLD_CONFIG",
        default_value = "~/.config/safefold/config.toml"
    )]
    config: PathBuf,

    /// Log output format (overrides logging.format)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set the master password on first run
    Init,

    /// Register a folder
    Add { path: PathBuf },

    /// Forget a registered folder (must not be protected)
    Remove { path: PathBuf },

    /// List registered folders and their protection mode
    List,

    /// Encrypt every file under a registered folder
    ///
    /// Running it again on an encrypted folder finishes an interrupted pass.
    /// The master password is read from SAFEFOLD_PASSWORD or prompted.
    Encrypt { path: PathBuf },

    /// Decrypt every file under an encrypted folder
    Decrypt { path: PathBuf },

    /// Quick-lock a folder: rename to an obfuscated name, hide, deny access
    Lock { path: PathBuf },

    /// Undo a quick lock
    Unlock {
        /// Current (obfuscated) path of the locked folder
        path: PathBuf,
        /// Restore under this name instead of the recorded one
        #[arg(long)]
        name: Option<String>,
    },

    /// Change the master password and re-wrap every folder key
    ///
    /// The new password is read from SAFEFOLD_NEW_PASSWORD or prompted.
    Passwd,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = safefold_core::config::expand_tilde(&cli.config);
    let config = SafeConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let format = cli.log_format.unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&config.logging.level, format);
    tracing::debug!(
        config = %config_path.display(),
        data_dir = %config.data_dir().display(),
        "configuration loaded"
    );

    if let Commands::Config {
        action: ConfigAction::Show,
    } = cli.command
    {
        return cmd_config_show(&config, &config_path);
    }

    let vault = {
        let config = config.clone();
        blocking(move || Vault::open(&config).context("opening vault")).await?
    };
    let vault = Arc::new(vault);

    match cli.command {
        Commands::Init => cmd_init(vault).await,
        Commands::Add { path } => cmd_add(vault, path).await,
        Commands::Remove { path } => cmd_remove(vault, path).await,
        Commands::List => cmd_list(&vault),
        Commands::Encrypt { path } => cmd_batch(vault, path, true).await,
        Commands::Decrypt { path } => cmd_batch(vault, path, false).await,
        Commands::Lock { path } => cmd_lock(vault, path).await,
        Commands::Unlock { path, name } => cmd_unlock(vault, path, name).await,
        Commands::Passwd => cmd_passwd(vault).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Run synchronous vault work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("vault task panicked")?
}

// ── Passwords ─────────────────────────────────────────────────────────────────

/// Read a password from `env_var` if set, otherwise prompt on the terminal.
fn read_password(env_var: &str, prompt: &str, confirm: bool) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(SecretString::from(value));
    }
    let first = rpassword::prompt_password(prompt).context("reading password")?;
    if first.is_empty() {
        anyhow::bail!("empty password refused");
    }
    if confirm {
        let second = rpassword::prompt_password("Confirm: ").context("reading password")?;
        if first != second {
            anyhow::bail!("passwords did not match");
        }
    }
    Ok(SecretString::from(first))
}

fn master_password() -> Result<SecretString> {
    read_password("SAFEFOLD_PASSWORD", "Master password: ", false)
}

// ── `safefold init` / `passwd` ────────────────────────────────────────────────

async fn cmd_init(vault: Arc<Vault>) -> Result<()> {
    if vault.is_initialized() {
        anyhow::bail!("already initialized; use `safefold passwd` to change the password");
    }
    let password = read_password("SAFEFOLD_PASSWORD", "New master password: ", true)?;
    blocking(move || vault.initialize(&password).context("setting master password")).await?;
    println!("master password set");
    Ok(())
}

async fn cmd_passwd(vault: Arc<Vault>) -> Result<()> {
    let old = read_password("SAFEFOLD_PASSWORD", "Current master password: ", false)?;
    let new = read_password("SAFEFOLD_NEW_PASSWORD", "New master password: ", true)?;
    blocking(move || {
        vault
            .change_master_password(&old, &new)
            .context("changing master password")
    })
    .await?;
    println!("master password changed");
    Ok(())
}

// ── Folder registry ───────────────────────────────────────────────────────────

async fn cmd_add(vault: Arc<Vault>, path: PathBuf) -> Result<()> {
    let record = blocking(move || {
        vault
            .add_folder(&path)
            .with_context(|| format!("adding {}", path.display()))
    })
    .await?;
    println!("added: {} ({})", record.display_name, record.path.display());
    Ok(())
}

async fn cmd_remove(vault: Arc<Vault>, path: PathBuf) -> Result<()> {
    let record = blocking(move || {
        vault
            .remove_folder(&path)
            .with_context(|| format!("removing {}", path.display()))
    })
    .await?;
    println!("removed: {}", record.path.display());
    Ok(())
}

fn cmd_list(vault: &Vault) -> Result<()> {
    let folders = vault.list_folders();
    if folders.is_empty() {
        println!("no folders registered");
        return Ok(());
    }
    println!("{:<12} {:<24} PATH", "MODE", "NAME");
    for record in folders {
        let mode = match record.protection_mode {
            ProtectionMode::Normal => "normal",
            ProtectionMode::Encrypted => "encrypted",
            ProtectionMode::QuickLocked => "locked",
        };
        println!(
            "{:<12} {:<24} {}",
            mode,
            record.display_name,
            record.path.display()
        );
    }
    Ok(())
}

// ── `safefold encrypt` / `decrypt` ────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb
}

/// Cancel `token` on Ctrl-C; the batch stops before the next file.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt: finishing current file, then stopping");
            token.cancel();
        }
    });
}

async fn cmd_batch(vault: Arc<Vault>, path: PathBuf, encrypt: bool) -> Result<()> {
    let password = master_password()?;
    let verb = if encrypt { "encrypt" } else { "decrypt" };

    let pb = make_progress_bar(verb);
    let sink = pb.clone();
    let progress: ProgressFn = Box::new(move |pct, msg| {
        sink.set_position(u64::from(pct));
        sink.set_message(msg.to_string());
    });

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let target = path.clone();
    let report = blocking(move || {
        let result = if encrypt {
            vault.encrypt_folder(&target, &password, Some(&progress), &cancel)
        } else {
            vault.decrypt_folder(&target, &password, Some(&progress), &cancel)
        };
        result.with_context(|| format!("{verb} {}", target.display()))
    })
    .await;
    pb.finish_and_clear();

    print_report(&report?, &path)
}

fn print_report(report: &BatchReport, path: &Path) -> Result<()> {
    for (file, kind) in &report.failures {
        eprintln!("  failed: {} ({kind:?})", file.display());
    }
    println!(
        "{}: {}/{} files in {}",
        report.op,
        report.succeeded,
        report.total,
        path.display()
    );
    if report.skipped > 0 {
        println!("  {} already encrypted, left as is", report.skipped);
    }
    report
        .clone()
        .into_result()
        .with_context(|| format!("{} incomplete for {}", report.op, path.display()))?;
    Ok(())
}

// ── `safefold lock` / `unlock` ────────────────────────────────────────────────

async fn cmd_lock(vault: Arc<Vault>, path: PathBuf) -> Result<()> {
    let password = master_password()?;
    let locked = blocking(move || {
        vault
            .lock_folder(&path, &password)
            .with_context(|| format!("locking {}", path.display()))
    })
    .await?;
    println!("locked: {}", locked.display());
    Ok(())
}

async fn cmd_unlock(vault: Arc<Vault>, path: PathBuf, name: Option<String>) -> Result<()> {
    let password = master_password()?;
    let restored = blocking(move || {
        vault
            .unlock_folder(&path, &password, name.as_deref())
            .with_context(|| format!("unlocking {}", path.display()))
    })
    .await?;
    println!("unlocked: {}", restored.display());
    Ok(())
}

// ── `safefold config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SafeConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
