use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use shared::{
    domain::{FlagKey, FlagMap, LogEntry, OverlapPolicy, ResetPolicy},
    error::ErrorReport,
};
use toggle_core::{ToggleCoordinator, ToggleHandle};
use tracing::{debug, info, warn};

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
struct Args {
    /// Settings file; defaults to ./flags.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
    /// Run overlapping toggles of one target in call order.
    #[arg(long)]
    queue_overlaps: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    FullReset,
    Merge,
}

impl From<PolicyArg> for ResetPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::FullReset => ResetPolicy::FullReset,
            PolicyArg::Merge => ResetPolicy::Merge,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the initial flags and the target/group layout.
    Show,
    /// Run steps in order: toggle:<target>, group:<group>, wait:<ms>, reset.
    Run {
        #[arg(required = true)]
        steps: Vec<Step>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Toggle(FlagKey),
    Group(FlagKey),
    Wait(Duration),
    Reset,
}

impl FromStr for Step {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        if raw == "reset" {
            return Ok(Self::Reset);
        }

        let (verb, arg) = raw
            .split_once(':')
            .ok_or_else(|| anyhow!("step '{raw}' is not of the form verb:argument"))?;
        if arg.is_empty() {
            bail!("step '{raw}' is missing its argument");
        }

        match verb {
            "toggle" => Ok(Self::Toggle(FlagKey::new(arg))),
            "group" => Ok(Self::Group(FlagKey::new(arg))),
            "wait" => {
                let ms: u64 = arg
                    .parse()
                    .with_context(|| format!("wait step '{raw}' needs milliseconds"))?;
                Ok(Self::Wait(Duration::from_millis(ms)))
            }
            other => bail!("unknown step verb '{other}'"),
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    flags: FlagMap,
    log: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorReport>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(policy) = args.policy {
        settings.policy = policy.into();
    }
    if args.queue_overlaps {
        settings.overlap = OverlapPolicy::Queue;
    }

    match args.command {
        Command::Show => print_layout(&settings)?,
        Command::Run { steps } => {
            let coordinator = settings.assemble()?;
            let report = run_steps(&coordinator, &steps).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn print_layout(settings: &Settings) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&settings.flags)?);
    for (target, pair) in &settings.targets {
        println!("target {target}: show={} loading={}", pair.show, pair.loading);
    }
    for (group, dependents) in &settings.groups {
        println!("group {group} -> {}", dependents.join(", "));
    }
    Ok(())
}

/// Drives the coordinator the way a panel would: toggles are fired without
/// waiting, and every handle is awaited only once the script is done.
async fn run_steps(coordinator: &ToggleCoordinator, steps: &[Step]) -> Report {
    coordinator.log().append("Initial state loaded");

    let mut changes = coordinator.store().changes();
    let watcher = tokio::spawn(async move {
        while let Some(snapshot) = changes.next().await {
            let active: Vec<String> = snapshot
                .iter()
                .filter(|(_, on)| **on)
                .map(|(key, _)| key.to_string())
                .collect();
            debug!(active = ?active, "flags changed");
        }
    });

    let mut handles: Vec<ToggleHandle> = Vec::new();
    let mut errors = Vec::new();
    for step in steps {
        let started = match step {
            Step::Toggle(target) => coordinator.toggle_single(target),
            Step::Group(group) => coordinator.toggle_group(group),
            Step::Wait(delay) => {
                tokio::time::sleep(*delay).await;
                continue;
            }
            Step::Reset => {
                coordinator.store().reset();
                coordinator.log().append("resetFlags()");
                continue;
            }
        };

        match started {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                warn!(error = %err, "toggle rejected");
                errors.push(ErrorReport::from(&err));
            }
        }
    }

    for handle in handles {
        let target = handle.target().clone();
        match handle.wait().await {
            Ok(outcome) => info!(toggle = %target, shown = outcome.shown, "toggle finished"),
            Err(err) => {
                warn!(toggle = %target, error = %err, "toggle failed");
                errors.push(ErrorReport::from(&err));
            }
        }
    }
    watcher.abort();

    Report {
        flags: coordinator.store().snapshot(),
        log: coordinator.log().entries(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use shared::error::ErrorCode;

    #[test]
    fn parses_steps() {
        assert_eq!(
            "toggle:box1".parse::<Step>().expect("toggle"),
            Step::Toggle(FlagKey::new("box1"))
        );
        assert_eq!(
            "group:section1".parse::<Step>().expect("group"),
            Step::Group(FlagKey::new("section1"))
        );
        assert_eq!(
            "wait:250".parse::<Step>().expect("wait"),
            Step::Wait(Duration::from_millis(250))
        );
        assert_eq!("reset".parse::<Step>().expect("reset"), Step::Reset);
    }

    #[test]
    fn rejects_malformed_steps() {
        assert!("box1".parse::<Step>().is_err());
        assert!("toggle:".parse::<Step>().is_err());
        assert!("wait:soon".parse::<Step>().is_err());
        assert!("flip:box1".parse::<Step>().is_err());
    }

    #[test]
    fn cli_accepts_policy_and_steps() {
        let args = Args::try_parse_from([
            "demo",
            "--policy",
            "full-reset",
            "run",
            "group:section1",
            "toggle:box5",
        ])
        .expect("args");

        assert!(matches!(args.policy, Some(PolicyArg::FullReset)));
        match args.command {
            Command::Run { steps } => assert_eq!(steps.len(), 2),
            Command::Show => panic!("expected run"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_steps_reports_final_flags_log_and_errors() {
        let coordinator = Settings::default().assemble().expect("coordinator");
        let steps = [
            Step::Group(FlagKey::new("section1")),
            Step::Toggle(FlagKey::new("box5")),
            Step::Toggle(FlagKey::new("box9")),
        ];

        let report = run_steps(&coordinator, &steps).await;

        assert_eq!(report.flags.get(&FlagKey::new("isSection1Show")), Some(true));
        assert_eq!(report.flags.get(&FlagKey::new("isBox2Show")), Some(true));
        assert_eq!(report.flags.get(&FlagKey::new("isBox5Show")), Some(true));
        assert_eq!(report.flags.get(&FlagKey::new("isBox3Show")), Some(false));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, ErrorCode::UnknownTarget);

        let messages: Vec<&str> = report.log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Initial state loaded",
                "Started toggling section1 visibility",
                "Started toggling box5 visibility",
                "box5 shown",
                "section1 shown with related boxes",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reset_step_restores_defaults() {
        let coordinator = Settings::default().assemble().expect("coordinator");
        let steps = [
            Step::Toggle(FlagKey::new("box1")),
            Step::Wait(Duration::from_millis(400)),
            Step::Reset,
        ];

        let report = run_steps(&coordinator, &steps).await;
        assert_eq!(&report.flags, coordinator.store().initial());
        assert_eq!(
            report.log.last().map(|e| e.message.as_str()),
            Some("resetFlags()")
        );
    }
}
