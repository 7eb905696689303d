//! CLI commands

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use jobtrack_session::store::SlotTokenStore;
use jobtrack_session::{
    Application, FileStorage, GuardDecision, Mount, PasswordChange, ProtectedView,
    SessionGuard, SessionManager, SessionState, TokenValidator,
};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session
    Login {
        /// Account email
        #[arg(long)]
        email: String,

        /// Account password (prompted for when omitted)
        #[arg(long, env = "JOBTRACK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the stored session
    Status,

    /// List your job applications
    Applications,

    /// Change your account password
    ChangePassword {
        /// Current password
        #[arg(long)]
        current: String,

        /// New password
        #[arg(long)]
        new: String,

        /// New password again
        #[arg(long)]
        confirm: String,
    },

    /// Keep a protected view mounted, refreshing the session in the background
    Watch {
        /// Protected route being watched
        #[arg(long, default_value = "/applications")]
        path: String,
    },

    /// Configuration file operations
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate a default configuration file
    Init {
        /// Output file path (defaults to <data-dir>/config.toml)
        output: Option<PathBuf>,
    },
}

impl Commands {
    pub async fn execute(self, data_dir: PathBuf, config_file: Option<PathBuf>) -> Result<()> {
        let open = || open_session(&data_dir, config_file.as_deref());

        match self {
            Self::Config { command } => command.execute(&data_dir),
            Self::Login { email, password } => login(&open()?, &email, password).await,
            Self::Logout => {
                open()?.logout();
                println!("Signed out.");
                Ok(())
            }
            Self::Status => {
                status(&open()?);
                Ok(())
            }
            Self::Applications => applications(&open()?).await,
            Self::ChangePassword {
                current,
                new,
                confirm,
            } => change_password(&open()?, &current, &new, &confirm).await,
            Self::Watch { path } => watch(&open()?, path).await,
        }
    }
}

/// Session backed by `<data-dir>/session.json`
fn open_session(data_dir: &Path, config_file: Option<&Path>) -> Result<SessionManager> {
    let settings = config::load_config(data_dir, config_file)?;
    let store = SlotTokenStore::new(FileStorage::new(data_dir.join(config::SESSION_FILE)));
    Ok(SessionManager::from_config(&settings, Rc::new(store))?)
}

impl ConfigCommands {
    pub fn execute(self, data_dir: &Path) -> Result<()> {
        match self {
            Self::Init { output } => {
                let config_path = output.unwrap_or_else(|| data_dir.join(config::CONFIG_FILE));

                // Create parent directory if it doesn't exist
                if let Some(parent) = config_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                config::generate_default_config(&config_path)?;
                println!("Generated configuration at: {}", config_path.display());
                Ok(())
            }
        }
    }
}

async fn login(session: &SessionManager, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt("Password: ")?,
    };

    let credential = session.login(email, &password).await?;
    println!("Signed in as {}.", credential.user.display_name());
    Ok(())
}

fn status(session: &SessionManager) {
    match session.state() {
        SessionState::Valid(credential) | SessionState::Refreshing(credential) => {
            println!("Signed in as {}.", credential.user.display_name());
            if let Ok(claims) = TokenValidator::decode(&credential.access_token) {
                let expires = chrono::DateTime::from_timestamp(claims.expires_at, 0)
                    .map_or_else(|| claims.expires_at.to_string(), |t| t.to_rfc2822());
                if TokenValidator::is_expired(&claims, session.now()) {
                    println!("Access token expired {expires}; it is renewed on the next request.");
                } else {
                    println!("Access token valid until {expires}.");
                }
            }
        }
        SessionState::Expired => println!("Session expired. Sign in again."),
        SessionState::Unauthenticated => println!("Not signed in."),
    }
}

async fn applications(session: &SessionManager) -> Result<()> {
    let view = mount(session, "/applications").await?;
    let applications = view.client().list_applications().await?;
    print_applications(&applications);
    Ok(())
}

async fn change_password(
    session: &SessionManager,
    current: &str,
    new: &str,
    confirm: &str,
) -> Result<()> {
    let change = PasswordChange::new(current, new, confirm)?;
    let view = mount(session, "/profile").await?;
    view.client().change_password(&change).await?;
    println!("Password updated successfully!");
    Ok(())
}

async fn watch(session: &SessionManager, path: String) -> Result<()> {
    let view = mount(session, &path).await?;
    let period = session.scheduler().interval();
    println!(
        "Watching {path}; refreshed every {}s. Press Ctrl-C to stop.",
        period.as_secs()
    );

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")
    };
    follow(view, period, shutdown).await
}

/// Keep `view` listed until the session ends or `shutdown` resolves.
///
/// The listing is re-fetched every `period`, not only when the session changes.
async fn follow(
    mut view: ProtectedView,
    period: Duration,
    shutdown: impl Future<Output = Result<()>>,
) -> Result<()> {
    fetch(&view).await;

    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticks.tick() => fetch(&view).await,
            decision = view.next_decision() => match decision {
                GuardDecision::Continue(_) => fetch(&view).await,
                GuardDecision::Degraded(e) => {
                    warn!(error = %e, "Session check failed; will retry");
                    println!("Warning: {e}");
                }
                GuardDecision::Redirect(redirect) => {
                    println!("Session ended. Sign in again: {redirect}");
                    return Ok(());
                }
            },
            result = &mut shutdown => {
                result?;
                info!("Stopping watch");
                view.unmount();
                return Ok(());
            }
        }
    }
}

async fn fetch(view: &ProtectedView) {
    let token = view.mount_token();
    let client = view.client();
    match token.guard(client.list_applications()).await {
        Some(Ok(applications)) => print_applications(&applications),
        Some(Err(e)) => println!("Error fetching applications: {e}"),
        None => {}
    }
}

async fn mount(session: &SessionManager, path: &str) -> Result<ProtectedView> {
    match SessionGuard::new(session.clone(), path).mount().await {
        Mount::Granted(view) => Ok(view),
        Mount::Redirect(redirect) => Err(anyhow!("Not signed in. Continue at {redirect}")),
    }
}

fn print_applications(applications: &[Application]) {
    if applications.is_empty() {
        println!("No applications yet.");
        return;
    }

    println!("{:<6} {:<28} {:<12} {:<12} {}", "ID", "COMPANY", "LEVEL", "STATUS", "APPLIED");
    for app in applications {
        println!(
            "{:<6} {:<28} {:<12} {:<12} {}",
            app.id,
            app.company.name,
            app.job_level.as_deref().unwrap_or("-"),
            app.status,
            app.date_applied
        );
    }
}

fn prompt(label: &str) -> Result<String> {
    let mut stderr = std::io::stderr();
    stderr.write_all(label.as_bytes())?;
    stderr.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let value = line.trim_end_matches(['\r', '\n']).to_string();
    if value.is_empty() {
        bail!("A password is required");
    }
    Ok(value)
}
