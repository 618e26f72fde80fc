mod errors;
mod runtime;
mod transports;
mod ui;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

use switchboard_core::config::{ConfigError, SwitchboardConfig, TransportKind};
use switchboard_core::model::CommandKind;
use switchboard_core::panel::Panel;
use switchboard_core::reconciler::DiagnosticLevel;
use switchboard_core::transport::event_channel;

use errors::{CliError, Result};
use runtime::Runtime;
use transports::TransportSpec;

const DEMO_CONFIG: &str = r#"
name: switchboard demo
server:
  transport: fake
services:
  "1":
    name: Gitea
    description: Self-hosted git forge
    env:
      GITEA_DOMAIN: localhost
      GITEA_PORT: "3000"
  "2":
    name: Jellyfin
    description: Media server
    launch_url: http://localhost:8096
  "3":
    name: Postgres
    description: Shared database
"#;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Control panel for remotely managed services", long_about = None)]
struct Cli {
    /// Config file (default: discover switchboard.yml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured transport (socket, http, fake)
    #[arg(long, global = true)]
    transport: Option<TransportKind>,

    /// Override the configured server url
    #[arg(long, global = true)]
    url: Option<Url>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log file used while the terminal UI owns the screen
    #[arg(long, global = true, default_value = "switchboard.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive panel (default)
    Tui,
    Start {
        #[arg(required = true)]
        services: Vec<String>,
    },
    Stop {
        #[arg(required = true)]
        services: Vec<String>,
    },
    Restart {
        #[arg(required = true)]
        services: Vec<String>,
    },
    /// Follow a service's logs until Ctrl-C
    Logs { service: String },
    /// Print running state
    Status { services: Vec<String> },
    /// Update environment variables
    Env {
        service: String,
        #[arg(required = true)]
        vars: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli, to_file: bool) -> Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if to_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cli.log_file)?;
        builder
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<(Option<PathBuf>, SwitchboardConfig)> {
    if let Some(path) = &cli.config {
        return Ok((Some(path.clone()), SwitchboardConfig::load(path)?));
    }
    match SwitchboardConfig::discover(&std::env::current_dir()?) {
        Ok((path, config)) => Ok((Some(path), config)),
        Err(ConfigError::NotFound { .. }) => Ok((None, SwitchboardConfig::from_str(DEMO_CONFIG)?)),
        Err(e) => Err(e.into()),
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let interactive = matches!(cli.command, None | Some(Commands::Tui));
    init_logging(&cli, interactive)?;

    let (path, config) = load_config(&cli)?;
    match &path {
        Some(p) => tracing::info!(path = %p.display(), "loaded config"),
        None => tracing::info!("no config found, running demo panel"),
    }

    let spec = TransportSpec {
        kind: cli.transport.unwrap_or(config.server.transport),
        url: cli.url.clone().or_else(|| config.server.url.clone()),
        poll_interval: config.poll_interval(),
        command_timeout: config.panel_settings().command_timeout,
    };
    let services = config.to_services();
    let (sink, source) = event_channel();
    let transport = transports::connect(&spec, &services, sink)?;
    let panel = Panel::new(services, config.panel_settings());
    let mut runtime = Runtime::new(panel, transport, source);
    let timeout = spec.command_timeout;

    match cli.command {
        None | Some(Commands::Tui) => {
            let title = config.project_name().unwrap_or("switchboard").to_string();
            ui::run(runtime, &title).await?;
            Ok(())
        }
        Some(Commands::Start { services }) => {
            run_commands(&mut runtime, CommandKind::Start, services, timeout).await
        }
        Some(Commands::Stop { services }) => {
            run_commands(&mut runtime, CommandKind::Stop, services, timeout).await
        }
        Some(Commands::Restart { services }) => {
            run_commands(&mut runtime, CommandKind::Restart, services, timeout).await
        }
        Some(Commands::Logs { service }) => follow_logs(&mut runtime, service).await,
        Some(Commands::Status { services }) => print_status(&mut runtime, services).await,
        Some(Commands::Env { service, vars }) => update_env(&mut runtime, service, vars).await,
    }
}

/// Validate service arguments; `all` (or nothing, where allowed) means every
/// service.
fn resolve_services(runtime: &Runtime, args: Vec<String>) -> Result<Vec<String>> {
    let known = runtime.panel().service_ids();
    if args.is_empty() || args.iter().any(|a| a == "all") {
        return Ok(known);
    }
    for id in &args {
        if !known.contains(id) {
            return Err(CliError::UnknownService {
                id: id.clone(),
                available: known.join(", "),
            });
        }
    }
    Ok(args)
}

fn error_count(runtime: &Runtime) -> usize {
    runtime
        .panel()
        .ui()
        .diagnostics()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .count()
}

/// Step the runtime until `done` holds or `limit` passes
async fn wait_for(runtime: &mut Runtime, limit: Duration, done: impl Fn(&Panel) -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while !done(runtime.panel()) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        if !runtime.step(deadline).await {
            return done(runtime.panel());
        }
    }
    true
}

async fn run_commands(
    runtime: &mut Runtime,
    kind: CommandKind,
    args: Vec<String>,
    timeout: Duration,
) -> Result<()> {
    let ids = resolve_services(runtime, args)?;
    let total = ids.len();
    let mut failed = 0;

    for id in ids {
        let errors_before = error_count(runtime);
        runtime.act(|p, now| p.request_command(&id, kind, now));

        // The panel expires the command itself; the margin only guards
        // against a runtime that stopped stepping.
        wait_for(runtime, timeout + Duration::from_secs(1), |p| !p.is_pending(&id)).await;

        let text = runtime
            .panel()
            .ui()
            .toast()
            .text(Instant::now())
            .unwrap_or_default()
            .to_string();
        let name = runtime
            .panel()
            .service(&id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| id.clone());

        if error_count(runtime) > errors_before || runtime.panel().is_pending(&id) {
            failed += 1;
            eprintln!("✗ {}: {}", name, text);
        } else {
            println!("✓ {}: {}", name, text);
        }
    }

    if failed > 0 {
        return Err(CliError::CommandsFailed { failed, total });
    }
    Ok(())
}

async fn follow_logs(runtime: &mut Runtime, service: String) -> Result<()> {
    let id = resolve_services(runtime, vec![service])?
        .into_iter()
        .next()
        .ok_or_else(|| CliError::Usage("no service given".into()))?;
    runtime.act(|p, _| p.open_detail(&id));

    let mut printed = 0;
    let mut last_toast: Option<String> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            alive = runtime.step(tokio::time::Instant::now() + Duration::from_millis(250)) => {
                if !alive {
                    break;
                }
            }
        }

        if let Some(view) = runtime.panel().ui().view(&id) {
            // Cleared logs restart the count
            printed = printed.min(view.logs.len());
            for line in &view.logs[printed..] {
                println!("{}", line);
            }
            printed = view.logs.len();
        }

        let toast = runtime.panel().ui().toast().text(Instant::now()).map(str::to_string);
        if toast.is_some() && toast != last_toast {
            if let Some(text) = &toast {
                eprintln!("-- {}", text);
            }
        }
        last_toast = toast;
    }

    runtime.act(|p, _| p.close_detail(&id));
    // Give the emitter a moment to send the stop requests
    runtime.step(tokio::time::Instant::now() + Duration::from_millis(100)).await;
    Ok(())
}

async fn print_status(runtime: &mut Runtime, args: Vec<String>) -> Result<()> {
    let ids = resolve_services(runtime, args)?;
    let errors_before = error_count(runtime);
    runtime.act(|p, _| {
        ids.iter()
            .flat_map(|id| p.refresh_status(id))
            .collect()
    });

    // One completion per service, successful or not
    let expected = ids.len();
    let mut seen = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while seen < expected && tokio::time::Instant::now() < deadline {
        if !runtime.step(deadline).await {
            break;
        }
        seen = runtime.completed_refreshes();
    }

    let failed = error_count(runtime).saturating_sub(errors_before);
    for id in &ids {
        let Some(service) = runtime.panel().service(id) else {
            continue;
        };
        let state = if service.is_running { "running" } else { "stopped" };
        let launch = runtime.panel().launch(id).unwrap_or("");
        println!("{:<20} {:<8} {}", service.name, state, launch);
    }
    if failed > 0 {
        for d in runtime.panel().ui().diagnostics().filter(|d| d.level == DiagnosticLevel::Error) {
            eprintln!("{}", d.text);
        }
        return Err(CliError::CommandsFailed {
            failed,
            total: expected,
        });
    }
    Ok(())
}

async fn update_env(runtime: &mut Runtime, service: String, words: Vec<String>) -> Result<()> {
    let id = resolve_services(runtime, vec![service])?
        .into_iter()
        .next()
        .ok_or_else(|| CliError::Usage("no service given".into()))?;
    let vars = ui::app::parse_assignments(&words).map_err(CliError::Usage)?;

    let errors_before = error_count(runtime);
    runtime.act(|p, _| p.update_environment(&id, vars));
    let answered = wait_for(runtime, Duration::from_secs(15), |p| {
        p.ui().toast().text(Instant::now()).is_some()
    })
    .await;

    let text = runtime
        .panel()
        .ui()
        .toast()
        .text(Instant::now())
        .unwrap_or_default()
        .to_string();
    if !answered {
        return Err(CliError::Service {
            service: id,
            message: "no answer from server".into(),
        });
    }
    if error_count(runtime) > errors_before {
        let reason = runtime
            .panel()
            .ui()
            .diagnostics()
            .last()
            .map(|d| d.text.clone())
            .unwrap_or(text);
        return Err(CliError::Service {
            service: id,
            message: reason,
        });
    }
    println!("{}", text);
    Ok(())
}
