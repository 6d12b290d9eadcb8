//! CLI argument definitions using clap
//!
//! This module defines all command-line arguments for podtunnel.

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Forward a local port to a single running Kubernetes pod
#[derive(Parser, Debug, Clone)]
#[command(name = "podtunnel", version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    // =========================================================================
    // CLUSTER
    // =========================================================================

    /// Path to the kubeconfig file (default: KUBECONFIG or ~/.kube/config)
    #[arg(long = "kubeconfig", value_name = "PATH", global = true, env = "PODTUNNEL_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long = "context", value_name = "NAME", global = true)]
    pub context: Option<String>,

    // =========================================================================
    // OUTPUT & TROUBLESHOOTING
    // =========================================================================

    /// Verbose output. Use -vv for even more verbose
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format for structured logging: json (JSON Lines) or text (default)
    #[arg(long = "log-format", value_name = "FORMAT", value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    /// Show error details (Debug formatting) on failure
    #[arg(long = "traceback", action = ArgAction::SetTrue, global = true)]
    pub traceback: bool,

    /// Generate shell completions and exit
    #[arg(long = "generate-completions", value_name = "SHELL", value_enum)]
    pub generate_completions: Option<Shell>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start a port forward and keep it open until Ctrl+C
    Start(StartArgs),

    /// Manage saved port rules
    #[command(subcommand)]
    Rule(RuleCommand),

    /// Interactive menu
    Menu,
}

/// Target selection shared by `start` and `rule add`
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Namespace of the pod
    #[arg(short = 'n', long = "namespace", value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Label selector, e.g. 'app=web,tier in (api,worker)'
    #[arg(short = 'l', long = "selector", value_name = "SELECTOR", conflicts_with = "pod")]
    pub selector: Option<String>,

    /// Pod name (skips selector resolution)
    #[arg(long = "pod", value_name = "NAME")]
    pub pod: Option<String>,

    /// Port inside the pod
    #[arg(short = 'p', long = "port", value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Local port to listen on (default: pick a free one)
    #[arg(long = "listen-port", value_name = "PORT", default_value_t = 0)]
    pub listen_port: u16,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct StartArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Start from a saved rule; explicit flags override its fields
    #[arg(long = "rule", value_name = "NAME")]
    pub rule: Option<String>,

    /// Give up if the forward is not ready in time, e.g. 30s
    #[arg(long = "ready-timeout", value_name = "DURATION", value_parser = parse_duration)]
    pub ready_timeout: Option<Duration>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RuleCommand {
    /// Save a new port rule
    Add {
        /// Rule name
        name: String,

        #[command(flatten)]
        target: TargetArgs,

        /// Replace an existing rule with the same name
        #[arg(long = "force", action = ArgAction::SetTrue)]
        force: bool,
    },

    /// List saved port rules
    List,

    /// Remove a saved port rule
    Remove {
        /// Rule name
        name: String,
    },
}

/// Shell type for completions
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

/// Log format for structured output (CI/CD)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Plain text output (default)
    #[default]
    Text,
    /// JSON Lines format for parsing
    Json,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
