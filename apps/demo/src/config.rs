use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use flag_store::{FlagStore, SharedActionLog, DEFAULT_LOG_CAPACITY};
use serde::Deserialize;
use shared::domain::{FlagMap, KeyPair, OverlapPolicy, ResetPolicy};
use toggle_core::{
    CoordinatorConfig, GroupRegistry, TargetRegistry, ToggleCoordinator, DEFAULT_GROUP_DELAY,
    DEFAULT_SINGLE_DELAY,
};

const DEFAULT_CONFIG_FILE: &str = "flags.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub policy: ResetPolicy,
    pub overlap: OverlapPolicy,
    pub log_capacity: usize,
    pub single_delay_ms: u64,
    pub group_delay_ms: u64,
    pub flags: FlagMap,
    pub targets: BTreeMap<String, KeyPair>,
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        let names = [
            "section1", "section2", "box1", "box2", "box3", "box4", "box5", "box6",
        ];

        let mut flags = FlagMap::new();
        let mut targets = BTreeMap::new();
        for name in names {
            let pair = KeyPair::new(show_key(name), loading_key(name));
            flags.set(pair.show.clone(), false);
            flags.set(pair.loading.clone(), false);
            targets.insert(name.to_string(), pair);
        }

        let groups = BTreeMap::from([
            (
                "section1".to_string(),
                vec!["box1".to_string(), "box2".to_string()],
            ),
            (
                "section2".to_string(),
                vec!["box3".to_string(), "box4".to_string()],
            ),
        ]);

        Self {
            policy: ResetPolicy::Merge,
            overlap: OverlapPolicy::Interleave,
            log_capacity: DEFAULT_LOG_CAPACITY,
            single_delay_ms: DEFAULT_SINGLE_DELAY.as_millis() as u64,
            group_delay_ms: DEFAULT_GROUP_DELAY.as_millis() as u64,
            flags,
            targets,
            groups,
        }
    }
}

fn show_key(name: &str) -> String {
    format!("is{}Show", capitalize(name))
}

fn loading_key(name: &str) -> String {
    format!("is{}Loading", capitalize(name))
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl Settings {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            single_delay: Duration::from_millis(self.single_delay_ms),
            group_delay: Duration::from_millis(self.group_delay_ms),
            overlap: self.overlap,
            ..CoordinatorConfig::default()
        }
    }

    pub fn target_registry(&self) -> TargetRegistry {
        let mut registry = TargetRegistry::new();
        for (target, pair) in &self.targets {
            registry.register(target.as_str(), pair.clone());
        }
        registry
    }

    pub fn group_registry(&self) -> GroupRegistry {
        let mut registry = GroupRegistry::new();
        for (group, dependents) in &self.groups {
            registry.register(group.as_str(), dependents.iter().map(String::as_str));
        }
        registry
    }

    /// Builds the store, log and coordinator these settings describe.
    pub fn assemble(&self) -> anyhow::Result<ToggleCoordinator> {
        let store = FlagStore::new(self.flags.clone(), self.policy);
        let log = SharedActionLog::new(self.log_capacity);
        ToggleCoordinator::builder(store, log)
            .targets(self.target_registry())
            .groups(self.group_registry())
            .config(self.coordinator_config())
            .build()
            .context("invalid flag configuration")
    }
}

/// Reads settings from `path`, or from `flags.toml` in the working directory
/// when it exists, then applies `APP__*` environment overrides.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let explicit = path.map(Path::to_path_buf);
    let candidate = explicit
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut settings = if explicit.is_some() || candidate.exists() {
        let raw = fs::read_to_string(&candidate)
            .with_context(|| format!("failed to read settings '{}'", candidate.display()))?;
        parse_settings(&raw)
            .with_context(|| format!("failed to parse settings '{}'", candidate.display()))?
    } else {
        Settings::default()
    };

    apply_env_overrides(&mut settings, |name| std::env::var(name).ok())?;
    Ok(settings)
}

pub fn parse_settings(raw: &str) -> anyhow::Result<Settings> {
    Ok(toml::from_str::<Settings>(raw)?)
}

pub fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("APP__RESET_POLICY") {
        settings.policy = match v.trim().to_ascii_lowercase().as_str() {
            "full_reset" | "full-reset" | "true" => ResetPolicy::FullReset,
            "merge" | "false" => ResetPolicy::Merge,
            other => bail!("APP__RESET_POLICY must be 'full_reset' or 'merge', got '{other}'"),
        };
    }

    if let Some(v) = lookup("APP__OVERLAP") {
        settings.overlap = match v.trim().to_ascii_lowercase().as_str() {
            "interleave" => OverlapPolicy::Interleave,
            "queue" => OverlapPolicy::Queue,
            other => bail!("APP__OVERLAP must be 'interleave' or 'queue', got '{other}'"),
        };
    }

    if let Some(v) = lookup("APP__LOG_CAPACITY") {
        settings.log_capacity = v
            .parse()
            .with_context(|| format!("APP__LOG_CAPACITY is not a count: '{v}'"))?;
    }

    if let Some(v) = lookup("APP__SINGLE_DELAY_MS") {
        settings.single_delay_ms = v
            .parse()
            .with_context(|| format!("APP__SINGLE_DELAY_MS is not milliseconds: '{v}'"))?;
    }

    if let Some(v) = lookup("APP__GROUP_DELAY_MS") {
        settings.group_delay_ms = v
            .parse()
            .with_context(|| format!("APP__GROUP_DELAY_MS is not milliseconds: '{v}'"))?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
