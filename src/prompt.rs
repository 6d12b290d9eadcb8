//! Interactive menu
//!
//! Collects session parameters from a terminal. Everything here is blocking;
//! async callers run it on `spawn_blocking`.

use dialoguer::{Input, Select};

use crate::config::PortRule;
use crate::errors::{PodtunnelError, Result};
use crate::k8s::{parse_selector, validate_namespace, validate_pod_name};

/// Entries of the main menu, in display order
pub const MENU_ITEMS: [&str; 4] = [
    "Port forward start",
    "Port forward stop",
    "New port rule",
    "Quit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    StartForward,
    StopForward,
    NewRule,
    Quit,
}

impl MenuChoice {
    fn from_index(index: usize) -> Self {
        match index {
            0 => MenuChoice::StartForward,
            1 => MenuChoice::StopForward,
            2 => MenuChoice::NewRule,
            _ => MenuChoice::Quit,
        }
    }
}

/// Check if we're in an interactive terminal
pub fn is_interactive() -> bool {
    atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stderr)
}

/// Show the main menu
pub fn select_action() -> Result<MenuChoice> {
    let index = Select::new()
        .with_prompt("Select")
        .items(&MENU_ITEMS)
        .default(0)
        .interact()?;
    Ok(MenuChoice::from_index(index))
}

/// Choose one of the saved rules, or none to enter parameters by hand
pub fn select_rule(names: &[String]) -> Result<Option<String>> {
    if names.is_empty() {
        return Ok(None);
    }

    let mut items: Vec<&str> = names.iter().map(String::as_str).collect();
    items.push("Enter parameters");
    let index = Select::new()
        .with_prompt("Rule")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(names.get(index).cloned())
}

/// Ask for namespace, target and ports
pub fn prompt_forward_parameters(default_namespace: &str) -> Result<PortRule> {
    let namespace: String = Input::new()
        .with_prompt("Namespace?")
        .default(default_namespace.to_string())
        .validate_with(|input: &String| check_namespace(input))
        .interact_text()?;

    let target: String = Input::new()
        .with_prompt("Label selector or pod/NAME?")
        .validate_with(|input: &String| check_target(input))
        .interact_text()?;

    let port: String = Input::new()
        .with_prompt("Port?")
        .validate_with(|input: &String| check_port(input, false))
        .interact_text()?;

    let listen_port: String = Input::new()
        .with_prompt("Local port? (0 = any)")
        .default("0".to_string())
        .validate_with(|input: &String| check_port(input, true))
        .interact_text()?;

    rule_from_answers(&namespace, &target, &port, &listen_port)
}

/// Build a rule from raw answers; surrounding whitespace is dropped
fn rule_from_answers(namespace: &str, target: &str, port: &str, listen_port: &str) -> Result<PortRule> {
    let (pod, selector) = split_target(target);
    Ok(PortRule {
        namespace: Some(namespace.trim().to_string()),
        pod,
        selector,
        port: parse_port(port)?,
        listen_port: parse_port(listen_port)?,
    })
}

/// Ask for a rule name followed by the forward parameters
pub fn prompt_new_rule(default_namespace: &str) -> Result<(String, PortRule)> {
    let name: String = Input::new()
        .with_prompt("Rule name?")
        .validate_with(|input: &String| check_rule_name(input))
        .interact_text()?;
    let rule = prompt_forward_parameters(default_namespace)?;
    Ok((name.trim().to_string(), rule))
}

fn check_namespace(input: &str) -> std::result::Result<(), String> {
    validate_namespace(input.trim()).map_err(|e| e.to_string())
}

fn check_target(input: &str) -> std::result::Result<(), String> {
    match split_target(input) {
        (Some(pod), _) => validate_pod_name(&pod).map_err(|e| e.to_string()),
        (None, Some(selector)) => match parse_selector(&selector) {
            Ok(parsed) if parsed.is_empty() => Err("no pod labels specified".to_string()),
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        },
        (None, None) => Err("no pod labels specified".to_string()),
    }
}

fn check_port(input: &str, allow_zero: bool) -> std::result::Result<(), String> {
    match input.trim().parse::<u16>() {
        Ok(0) if !allow_zero => Err("Port must be between 1 and 65535".to_string()),
        Ok(_) => Ok(()),
        Err(_) => Err(format!("Not a port number: {}", input.trim())),
    }
}

fn check_rule_name(input: &str) -> std::result::Result<(), String> {
    let name = input.trim();
    if name.is_empty() {
        return Err("Rule name cannot be empty".to_string());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err("Rule names may only contain letters, digits, '-' and '_'".to_string());
    }
    Ok(())
}

/// `pod/NAME` names a pod; anything else is a selector
fn split_target(input: &str) -> (Option<String>, Option<String>) {
    let input = input.trim();
    if input.is_empty() {
        return (None, None);
    }
    match input.strip_prefix("pod/") {
        Some(pod) => (Some(pod.trim().to_string()), None),
        None => (None, Some(input.to_string())),
    }
}

fn parse_port(input: &str) -> Result<u16> {
    input
        .trim()
        .parse()
        .map_err(|_| PodtunnelError::Prompt(format!("Not a port number: {}", input.trim())))
}
