use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use muniverse::auth::RequestContext;
use muniverse::config::{Cli, Command, Config};
use muniverse::db::models::{Role, User};
use muniverse::state::AppState;

/// What `users` prints. Password hashes never leave the store.
#[derive(Serialize)]
struct UserSummary {
    username: String,
    name: String,
    role: Role,
    followers: usize,
    following: usize,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            followers: user.followers.len(),
            following: user.following.len(),
            username: user.username,
            name: user.name,
            role: user.role,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    std::fs::create_dir_all(config.assets_path())?;

    let state = AppState::open(config)?;
    run(&state, &cli.command)
}

fn run(state: &AppState, command: &Command) -> anyhow::Result<()> {
    let ctx = RequestContext::operator();
    match command {
        Command::Users => {
            let users: Vec<UserSummary> =
                state.users().list()?.into_iter().map(Into::into).collect();
            print_json(&users)
        }
        Command::Pending => print_json(&state.moderation().list_pending(&ctx)?),
        Command::Approve { id } => print_json(&state.moderation().approve(&ctx, *id)?),
        Command::Reject { id } => print_json(&state.moderation().reject(&ctx, *id)?),
        Command::Notifications => print_json(&state.notifications().list(&ctx)?),
        Command::Promote { username } => {
            let user = state.users().set_role(&ctx, username, Role::Admin)?;
            print_json(&UserSummary::from(user))
        }
        Command::Check => {
            let report = state.integrity().audit()?;
            print_json(&report)?;
            if !report.is_clean() {
                anyhow::bail!("{} integrity problem(s) found", report.findings.len());
            }
            Ok(())
        }
        Command::Repair => print_json(&state.integrity().repair(&ctx)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
