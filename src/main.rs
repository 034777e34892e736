//! hushline - noise suppression for your microphone

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use hushline::cli::{self, ReplCommand};
use hushline::config::AppConfig;
use hushline::devices::{self, DeviceDescriptor};
use hushline::elevation::{self, PolkitElevator};
use hushline::error::PipelineError;
use hushline::logging;
use hushline::paths::AppPaths;
use hushline::pipeline::PipelineController;
use hushline::pulse::{AudioServer, PactlServer};
use hushline::reconciler::{ReconcilerHandle, StateReconciler, SuppressorState};
use hushline::session::Session;
use hushline::shutdown::{self, ShutdownSignal};
use hushline::staging::LibraryStager;

/// hushline - load a noise-suppressed virtual microphone into PulseAudio
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable noise suppression on a device (list number or source name) and exit
    #[arg(long, value_name = "DEVICE", conflicts_with_all = ["disable", "list_devices"])]
    enable: Option<String>,

    /// Disable noise suppression and exit
    #[arg(long, conflicts_with = "list_devices")]
    disable: bool,

    /// Helper role of the memlock elevation (run through pkexec)
    #[arg(long = "removerlimit", value_name = "PID", hide = true, allow_hyphen_values = true)]
    remove_rlimit: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Helper role: validate, raise the limit, exit. Nothing else runs.
    if let Some(raw_pid) = &args.remove_rlimit {
        return elevation::run_helper(raw_pid);
    }

    dotenvy::dotenv().ok();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start async runtime: {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let code = match runtime.block_on(run(args)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    };

    // The prompt thread may still sit in readline; don't wait for it
    runtime.shutdown_timeout(Duration::from_secs(1));
    code
}

async fn run(args: Args) -> Result<ExitCode> {
    let paths = AppPaths::detect(args.config.as_deref());
    AppConfig::initialize_if_missing(&paths.config).await?;
    let config = Arc::new(AppConfig::load(&paths.config).await?);

    let level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| config.log_level.clone());
    let _log_guard = logging::init(&level, &paths)?;

    info!("Starting hushline v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", paths.config.display());
    info!("Log file: {}", paths.log_path().display());

    let server: Arc<dyn AudioServer> = Arc::new(PactlServer::from_config(&config.pactl));
    server
        .ping()
        .await
        .context("Audio server is not reachable")?;

    let inputs = devices::enumerate(server.as_ref())
        .await
        .context("Failed to list capture devices")?;
    info!("Found {} capture device(s)", inputs.len());

    if args.list_devices {
        cli::print_devices(&inputs);
        return Ok(ExitCode::SUCCESS);
    }

    // From here on the staged library must be released, so signals may not
    // terminate the process before `run` returns
    let mut signals = ShutdownSignal::install().context("Failed to install signal handlers")?;

    let stager = LibraryStager::embedded();
    if !stager.has_artifact() {
        warn!("⚠️  This build carries no filter library, enabling will fail");
    }

    let mut reconciler = StateReconciler::spawn(server.clone(), config.reconcile_interval());
    let session = Arc::new(Session::new(
        server.clone(),
        stager,
        reconciler.subscribe(),
        config.clone(),
    ));
    if let Err(e) = session.ensure_artifact() {
        warn!("⚠️  Couldn't stage filter library: {}", e);
    }

    let elevator = PolkitElevator::from_config(&config.elevation)
        .context("Failed to locate the hushline executable")?;
    let controller = Arc::new(PipelineController::new(Arc::new(elevator)));

    let code = if let Some(selector) = &args.enable {
        let id = cli::resolve_device(&inputs, selector)
            .map(|device| device.id.clone())
            .unwrap_or_else(|| selector.clone());
        let work = async {
            let outcome = controller.enable(&session, &id).await;
            one_shot_report(
                "enable",
                outcome,
                SuppressorState::Loaded,
                &session,
                &config,
            )
            .await
        };
        interrupted_exit(shutdown::until_shutdown(work, signals.recv()).await)
    } else if args.disable {
        let work = async {
            let outcome = controller.disable(&session).await;
            one_shot_report(
                "disable",
                outcome,
                SuppressorState::Unloaded,
                &session,
                &config,
            )
            .await
        };
        interrupted_exit(shutdown::until_shutdown(work, signals.recv()).await)
    } else {
        interactive(&mut reconciler, &session, &controller, inputs, &mut signals).await?
    };

    reconciler.shutdown();
    session.release_artifact();
    info!("hushline shutdown complete");
    Ok(code)
}

fn interrupted_exit(code: Option<ExitCode>) -> ExitCode {
    code.unwrap_or_else(|| {
        warn!("Shutdown signal received, request abandoned");
        ExitCode::FAILURE
    })
}

/// Print the controller's answer, then what the reconciler observes
async fn one_shot_report(
    action: &str,
    outcome: Result<(), PipelineError>,
    expected: SuppressorState,
    session: &Session,
    config: &AppConfig,
) -> ExitCode {
    cli::print_outcome(action, &outcome);

    let mut state_rx = session.subscribe_state();
    if outcome.is_ok() {
        let within = config.reconcile_interval() * 2 + Duration::from_secs(1);
        if tokio::time::timeout(within, state_rx.wait_for(|s| *s == expected))
            .await
            .is_err()
        {
            warn!("Audio server did not confirm the change within {:?}", within);
        }
    }
    cli::print_state(session.suppressor_state());

    if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn interactive(
    reconciler: &mut ReconcilerHandle,
    session: &Arc<Session>,
    controller: &Arc<PipelineController>,
    mut inputs: Vec<DeviceDescriptor>,
    signals: &mut ShutdownSignal,
) -> Result<ExitCode> {
    cli::print_devices(&inputs);
    println!("Type {} for a list of commands.", "help".cyan());

    let (command_tx, mut commands) = mpsc::channel(16);
    cli::spawn_repl(command_tx).context("Failed to start the prompt")?;

    let (done_tx, mut done_rx) = mpsc::channel::<(&'static str, Result<(), PipelineError>)>(4);
    let mut state_rx: watch::Receiver<SuppressorState> = session.subscribe_state();

    info!("Entering interactive loop");
    let code = loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break ExitCode::SUCCESS;
                };
                match command {
                    ReplCommand::Devices => {
                        match devices::enumerate(session.server()).await {
                            Ok(fresh) => inputs = fresh,
                            Err(e) => warn!("Couldn't refresh devices: {}", e),
                        }
                        cli::print_devices(&inputs);
                    }
                    ReplCommand::Enable(selector) => {
                        let Some(device) = cli::resolve_device(&inputs, &selector) else {
                            println!("{}", format!("No device '{}' (see 'devices')", selector).yellow());
                            continue;
                        };
                        let id = device.id.clone();
                        let (controller, session, done) =
                            (controller.clone(), session.clone(), done_tx.clone());
                        tokio::spawn(async move {
                            let outcome = controller.enable(&session, &id).await;
                            let _ = done.send(("enable", outcome)).await;
                        });
                    }
                    ReplCommand::Disable => {
                        let (controller, session, done) =
                            (controller.clone(), session.clone(), done_tx.clone());
                        tokio::spawn(async move {
                            let outcome = controller.disable(&session).await;
                            let _ = done.send(("disable", outcome)).await;
                        });
                    }
                    ReplCommand::Status => cli::print_state(session.suppressor_state()),
                    ReplCommand::Help => cli::print_help(),
                    ReplCommand::Quit => break ExitCode::SUCCESS,
                }
            }
            Some((action, outcome)) = done_rx.recv() => {
                cli::print_outcome(action, &outcome);
            }
            Ok(()) = state_rx.changed() => {
                let state = *state_rx.borrow_and_update();
                cli::print_state(state);
            }
            err = reconciler.finished() => {
                error!("❌ Lost track of the audio server: {}", err);
                break ExitCode::FAILURE;
            }
            _ = signals.recv() => {
                info!("Shutdown signal received");
                break ExitCode::SUCCESS;
            }
        }
    };

    Ok(code)
}
