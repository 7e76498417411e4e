use anyhow::Result;
use clap::{Parser, Subcommand};
use pmgate::config::GateConfig;
use pmgate::gate::GateState;
use pmgate::identity::MemoryIdentitySource;
use pmgate::navigator::{HistoryNavigator, Navigator};
use pmgate::profile::MemoryProfileSource;
use pmgate::RouteGuard;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "pmgate",
    about = "PM Planner session/profile gating core",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to pmgate.toml
    #[arg(long, env = "PMGATE_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PMGATE_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "PMGATE_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Emit logs as JSON instead of compact text.
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a scripted session against in-memory backends (default when no
    /// subcommand given): mount signed out, sign in, finish onboarding,
    /// sign out, expire the session.
    Demo,
    /// Print the effective configuration and exit.
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = args.log.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = setup_logging(&log_level, args.log_file.as_deref(), args.json);

    let config = GateConfig::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Demo) {
        Command::Demo => run_demo(config).await,
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Scripted walk through every gate transition, against in-memory backends.
async fn run_demo(config: GateConfig) -> Result<()> {
    let identity = Arc::new(MemoryIdentitySource::new());
    let profiles = Arc::new(MemoryProfileSource::new());
    let navigator = Arc::new(HistoryNavigator::new(config.home_target()));

    let mut guard = RouteGuard::new(
        Arc::clone(&identity),
        Arc::clone(&profiles),
        Arc::clone(&navigator) as _,
        config.gate_targets(),
        config.backend_timeout(),
    );
    let mut states = guard.state_changes();

    // Mount with no session: the guard settles on unauthenticated and
    // redirects to the login target.
    guard.mount();
    states.wait_for(|s| *s != GateState::Checking).await?;
    info!(
        state = %guard.state(),
        location = %navigator.current_location(),
        "mounted signed out"
    );

    // Sign in. No profile row exists yet, so onboarding gates access.
    let user = identity.sign_in("taylor@example.com");
    states
        .wait_for(|s| matches!(s, GateState::OnboardingIncomplete(_)))
        .await?;
    info!(
        identity_id = %user.id,
        location = %navigator.current_location(),
        "signed in with unfinished profile"
    );

    // Finish onboarding; the user-updated notification re-resolves to
    // authorized.
    profiles.mark_complete(&user.id);
    identity.update_user();
    states.wait_for(GateState::is_authorized).await?;
    if let Some(page) = guard.render(|who| format!("maintenance dashboard for {}", who.email)) {
        info!(%page, location = %navigator.current_location(), "protected content rendered");
    }

    // Sign out: immediate unauthenticated, back to login.
    identity.sign_out();
    states.wait_for(|s| *s == GateState::Unauthenticated).await?;
    info!(location = %navigator.current_location(), "signed out");

    // Session expiry behaves exactly like a sign-out.
    let user = identity.sign_in("taylor@example.com");
    profiles.mark_complete(&user.id);
    identity.refresh_token();
    states.wait_for(GateState::is_authorized).await?;
    identity.expire_session();
    states.wait_for(|s| *s == GateState::Unauthenticated).await?;
    info!(location = %navigator.current_location(), "session expired");

    guard.unmount();
    println!("{}", serde_json::to_string_pretty(&guard.snapshot())?);
    Ok(())
}

fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    json: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("pmgate.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            init_stdout_logging(log_level, json);
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .init();
        }
        return Some(guard);
    }

    init_stdout_logging(log_level, json);
    None
}

fn init_stdout_logging(log_level: &str, json: bool) {
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
    }
}
