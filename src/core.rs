//! Command dispatch

use clap::Parser;
use tracing::{debug, info};

use crate::cli::process::{effective_namespace, kubeconfig_overrides};
use crate::cli::{process_rule_args, process_start_args, Args, Command, RuleCommand, StartArgs};
use crate::config::{Config, PortRule};
use crate::errors::PodtunnelError;
use crate::k8s::{Credentials, ForwardTarget, PortForward};
use crate::logging::init_logging;
use crate::prompt::{self, MenuChoice};
use crate::signals;
use crate::status::ExitStatus;

/// Main entry point for the CLI.
///
/// Handles argument parsing, configuration loading, and dispatches to the
/// selected subcommand.
pub fn run(args: Vec<String>) -> ExitStatus {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}", e);
            Config::default()
        }
    };

    let merged_args = merge_default_options(args, &config);
    let traceback = merged_args.iter().any(|a| a == "--traceback");

    let parsed = match Args::try_parse_from(&merged_args) {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion {
                ExitStatus::Success
            } else {
                ExitStatus::Error
            };
        }
    };

    if let Some(shell) = parsed.generate_completions {
        generate_completions(shell);
        return ExitStatus::Success;
    }

    if let Err(e) = init_logging(parsed.verbose, parsed.log_format.unwrap_or_default()) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => return handle_error(PodtunnelError::Io(e), traceback),
    };

    match runtime.block_on(program(parsed, config)) {
        Ok(status) => status,
        Err(e) => handle_error(e, traceback),
    }
}

pub async fn program(args: Args, mut config: Config) -> Result<ExitStatus, PodtunnelError> {
    match args.command.clone() {
        Some(Command::Start(start)) => run_start(&args, &start, &config).await,
        Some(Command::Rule(rule)) => run_rule(rule, &mut config),
        Some(Command::Menu) => run_menu(&args, &mut config).await,
        None => {
            eprintln!("usage: podtunnel <start|rule|menu> [OPTIONS]");
            eprintln!("\nFor more information, run: podtunnel --help");
            Ok(ExitStatus::Error)
        }
    }
}

async fn load_credentials(args: &Args, config: &Config) -> Result<Credentials, PodtunnelError> {
    let overrides = kubeconfig_overrides(args.kubeconfig.as_deref(), args.context.as_deref(), config);
    Credentials::load(&overrides).await
}

async fn run_start(args: &Args, start: &StartArgs, config: &Config) -> Result<ExitStatus, PodtunnelError> {
    let credentials = load_credentials(args, config).await?;
    let target = process_start_args(start, config, Some(credentials.default_namespace()))?;
    let shutdown = signals::shutdown_token();

    let mut session = match start_session(target, &credentials).await {
        Ok(session) => session,
        Err(PodtunnelError::Cancelled) => return Ok(ExitStatus::Interrupted),
        Err(e) => return Err(e),
    };
    eprintln!("Press Ctrl+C to stop forwarding");

    tokio::select! {
        _ = shutdown.cancelled() => {}
        closed = session.closed() => {
            // The relay only ends on its own when it fails
            closed?;
            return Ok(ExitStatus::Error);
        }
    }

    session.stop();
    session.closed().await?;
    Ok(ExitStatus::Success)
}

/// Build and start a session, printing where it listens
async fn start_session(target: ForwardTarget, credentials: &Credentials) -> Result<PortForward, PodtunnelError> {
    debug!(?target, "Starting port forward");
    let mut session = PortForward::new(target, credentials)?;
    session.start(&signals::shutdown_token()).await?;

    println!(
        "Forwarding from {} -> pod/{}:{}",
        session.local_addr(),
        session.pod_name().unwrap_or_default(),
        session.destination_port()
    );
    Ok(session)
}

fn run_rule(command: RuleCommand, config: &mut Config) -> Result<ExitStatus, PodtunnelError> {
    match command {
        RuleCommand::Add { name, target, force } => {
            let rule = process_rule_args(&target)?;
            save_rule(config, name, rule, force)?;
        }
        RuleCommand::List => {
            if config.rules.is_empty() {
                eprintln!("No rules saved in {}", config.config_file().display());
            }
            for (name, rule) in &config.rules {
                println!("{}\t{}", name, rule.describe());
            }
        }
        RuleCommand::Remove { name } => {
            if config.rules.remove(&name).is_none() {
                return Err(PodtunnelError::Config(format!("No rule named '{}'", name)));
            }
            config.save()?;
            info!(rule = %name, "Rule removed");
        }
    }
    Ok(ExitStatus::Success)
}

fn save_rule(config: &mut Config, name: String, rule: PortRule, force: bool) -> Result<(), PodtunnelError> {
    if config.rules.contains_key(&name) && !force {
        return Err(PodtunnelError::Config(format!(
            "Rule '{}' already exists (use --force to replace it)", name
        )));
    }
    eprintln!("Saved rule {}: {}", name, rule.describe());
    config.rules.insert(name, rule);
    config.save()
}

async fn run_menu(args: &Args, config: &mut Config) -> Result<ExitStatus, PodtunnelError> {
    if !prompt::is_interactive() {
        return Err(PodtunnelError::Prompt("the menu needs an interactive terminal".to_string()));
    }

    let credentials = load_credentials(args, config).await?;
    let default_namespace = effective_namespace(None, config, Some(credentials.default_namespace()));
    let mut active: Option<PortForward> = None;

    loop {
        if signals::was_interrupted() {
            break;
        }

        match blocking(prompt::select_action).await? {
            MenuChoice::StartForward => {
                if let Some(ref session) = active {
                    eprintln!("A port forward is already running on {}", session.local_addr());
                    continue;
                }

                let names: Vec<String> = config.rules.keys().cloned().collect();
                let chosen = blocking(move || prompt::select_rule(&names)).await?;
                let rule = match chosen {
                    Some(name) => config.rule(&name)?.clone(),
                    None => {
                        let ns = default_namespace.clone();
                        blocking(move || prompt::prompt_forward_parameters(&ns)).await?
                    }
                };

                let mut target = rule.to_target(&default_namespace)?;
                target.ready_timeout = config.ready_timeout()?;
                match start_session(target, &credentials).await {
                    Ok(session) => active = Some(session),
                    Err(PodtunnelError::Cancelled) => break,
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            MenuChoice::StopForward => match active.take() {
                Some(mut session) => {
                    session.stop();
                    session.closed().await?;
                    eprintln!("Port forward stopped");
                }
                None => eprintln!("No port forward is running"),
            },
            MenuChoice::NewRule => {
                let ns = default_namespace.clone();
                let (name, rule) = blocking(move || prompt::prompt_new_rule(&ns)).await?;
                if let Err(e) = save_rule(config, name, rule, false) {
                    eprintln!("Error: {}", e);
                }
            }
            MenuChoice::Quit => break,
        }
    }

    if let Some(mut session) = active.take() {
        session.stop();
        session.closed().await?;
    }
    Ok(ExitStatus::Success)
}

/// Run a blocking prompt off the async workers
async fn blocking<T, F>(f: F) -> Result<T, PodtunnelError>
where
    F: FnOnce() -> Result<T, PodtunnelError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PodtunnelError::Prompt(e.to_string()))?
}

fn handle_error(error: PodtunnelError, traceback: bool) -> ExitStatus {
    if traceback {
        eprintln!("Error: {:?}", error);
    } else {
        eprintln!("Error: {}", error);
    }

    // All errors return the same exit code (1) following Unix conventions
    ExitStatus::Error
}

/// Insert `defaults.options` right after the program name
///
/// Only flags are honoured; they must be global flags to parse before the
/// subcommand.
fn merge_default_options(args: Vec<String>, config: &Config) -> Vec<String> {
    if config.defaults.options.is_empty() {
        return args;
    }

    let (flags, positional): (Vec<_>, Vec<_>) = config.defaults.options.iter()
        .partition(|opt| opt.starts_with('-'));

    if !positional.is_empty() {
        eprintln!("\x1b[33mWarning: Positional arguments in default options are ignored: {:?}\x1b[0m", positional);
        eprintln!("Only flags (starting with -) can be used in default options.");
    }

    let mut merged = Vec::with_capacity(args.len() + flags.len());
    let mut args = args.into_iter();
    if let Some(program) = args.next() {
        merged.push(program);
    }
    merged.extend(flags.into_iter().cloned());
    merged.extend(args);
    merged
}

fn generate_completions(shell: crate::cli::args::Shell) {
    use clap::CommandFactory;
    use clap_complete::{generate, Shell as ClapShell};

    let mut cmd = Args::command();
    let shell = match shell {
        crate::cli::args::Shell::Bash => ClapShell::Bash,
        crate::cli::args::Shell::Zsh => ClapShell::Zsh,
        crate::cli::args::Shell::Fish => ClapShell::Fish,
        crate::cli::args::Shell::PowerShell => ClapShell::PowerShell,
        crate::cli::args::Shell::Elvish => ClapShell::Elvish,
    };

    generate(shell, &mut cmd, "podtunnel", &mut std::io::stdout());
}
