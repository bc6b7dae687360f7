//! Skill eligibility.
//!
//! Skills declare requirements (binaries on `$PATH`, environment
//! variables, config keys); ineligible skills are dropped from the
//! advertised capability list with a reason. Manifests are
//! `<dir>/<skill>/skill.json` files under the configured skill dirs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use ag_domain::config::Config;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manifest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRequirements {
    /// All of these binaries must be on `$PATH`.
    #[serde(default)]
    pub bins: Vec<String>,
    /// At least one of these binaries must be on `$PATH`.
    #[serde(default)]
    pub any_bins: Vec<String>,
    /// These environment variables must be set and non-empty.
    #[serde(default)]
    pub env: Vec<String>,
    /// These dotted config paths must resolve to a non-empty value.
    #[serde(default)]
    pub config: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires: SkillRequirements,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Eligibility
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn bin_on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}

/// Walk a dotted path through the serialized config.
fn config_value_present(config: &Config, dotted: &str) -> bool {
    let Ok(root) = serde_json::to_value(config) else {
        return false;
    };
    let mut current = &root;
    for part in dotted.split('.') {
        match current.get(part) {
            Some(v) => current = v,
            None => return false,
        }
    }
    match current {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        _ => true,
    }
}

/// Check a manifest against the environment and config. `Err` carries
/// the reason the skill is ineligible.
pub fn check_eligibility(manifest: &SkillManifest, config: &Config) -> Result<(), String> {
    if config.skills.disabled.iter().any(|d| d == &manifest.name) {
        return Err("disabled in config".into());
    }

    for bin in &manifest.requires.bins {
        if !bin_on_path(bin) {
            return Err(format!("missing binary: {bin}"));
        }
    }

    if !manifest.requires.any_bins.is_empty()
        && !manifest.requires.any_bins.iter().any(|b| bin_on_path(b))
    {
        return Err(format!(
            "none of the required binaries present: {}",
            manifest.requires.any_bins.join(", ")
        ));
    }

    for var in &manifest.requires.env {
        if std::env::var(var).map(|v| v.is_empty()).unwrap_or(true) {
            return Err(format!("missing env var: {var}"));
        }
    }

    for key in &manifest.requires.config {
        if !config_value_present(config, key) {
            return Err(format!("missing config: {key}"));
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skill set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The loaded skills, split by eligibility.
#[derive(Debug, Default)]
pub struct SkillSet {
    eligible: Vec<SkillManifest>,
    ineligible: Vec<(String, String)>,
}

impl SkillSet {
    pub fn eligible(&self) -> &[SkillManifest] {
        &self.eligible
    }

    /// `(name, reason)` for every skill that failed its checks.
    pub fn ineligible(&self) -> Vec<(String, String)> {
        self.ineligible.clone()
    }
}

/// Scan the configured skill dirs and classify every manifest.
pub fn load_skills(config: &Config) -> SkillSet {
    let mut set = SkillSet::default();

    for dir in &config.skills.dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            tracing::debug!(dir = %dir.display(), "skills dir not readable, skipping");
            continue;
        };
        for entry in entries.flatten() {
            let manifest_path = entry.path().join("skill.json");
            if !manifest_path.is_file() {
                continue;
            }
            match read_manifest(&manifest_path) {
                Ok(manifest) => match check_eligibility(&manifest, config) {
                    Ok(()) => set.eligible.push(manifest),
                    Err(reason) => {
                        tracing::info!(skill = %manifest.name, %reason, "skill ineligible");
                        set.ineligible.push((manifest.name, reason));
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %manifest_path.display(), error = %e, "bad skill manifest");
                }
            }
        }
    }

    set.eligible.sort_by(|a, b| a.name.cmp(&b.name));
    set
}

fn read_manifest(path: &Path) -> ag_domain::Result<SkillManifest> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
