//! `SKILL.md` manifest parsing.
//!
//! Manifests are parsed in three stages:
//!
//! 1. **Frontmatter** (canonical): a YAML block between `---` lines at
//!    the top of the file, followed by the markdown body. An opening
//!    delimiter without a closing one is a hard error.
//! 2. **Legacy**: the whole document parses as YAML.
//! 3. **Fallback**: regex extraction of `name:` / `description:` plus
//!    the first fenced code block.
//!
//! The script is the first fenced code block of the (remaining) body.

use regex::Regex;
use serde::Deserialize;

/// Manifest file name inside a skill directory.
pub const MANIFEST_FILE_NAME: &str = "SKILL.md";

/// Manifests beyond this size are rejected outright.
pub const MAX_MANIFEST_BYTES: usize = 1_048_576;

use crate::error::{SkillError, SkillResult};

/// Which parse stage produced a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    /// Canonical `---` frontmatter.
    Frontmatter,
    /// Whole-document YAML.
    LegacyYaml,
    /// Regex fallback.
    Fallback,
}

/// Runtime requirements under the `warden.requires` metadata path.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SkillRequires {
    /// Binaries that must resolve on `PATH`.
    #[serde(default)]
    pub bins: Vec<String>,
    /// Environment variables that must be set.
    #[serde(default)]
    pub env: Vec<String>,
    /// Operating systems the skill supports (empty = all).
    #[serde(default)]
    pub os: Vec<String>,
}

/// A parsed skill manifest.
#[derive(Debug, Clone)]
pub struct SkillManifest {
    /// Skill name, as written.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Declared version (defaults to `0.0.0`).
    pub version: String,
    /// Top-level binary list.
    pub bins: Vec<String>,
    /// Runtime requirements.
    pub requires: SkillRequires,
    /// The skill's script (first fenced code block).
    pub script: String,
    /// Which stage parsed this manifest.
    pub stage: ParseStage,
}

impl SkillManifest {
    /// Normalized name for precedence comparisons.
    #[must_use]
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Effective binary requirements: the top-level `bins` field, or -
    /// when that is empty - `requires.bins` shadowing it.
    #[must_use]
    pub fn effective_bins(&self) -> &[String] {
        if self.bins.is_empty() {
            &self.requires.bins
        } else {
            &self.bins
        }
    }
}

/// Trim + ASCII-lowercase a skill name.
#[must_use]
pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[derive(Debug, Default, Deserialize)]
struct ManifestYaml {
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    #[serde(default)]
    bins: Vec<String>,
    #[serde(default)]
    warden: WardenMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct WardenMetadata {
    #[serde(default)]
    requires: SkillRequires,
}

/// Parse a `SKILL.md` document.
///
/// # Errors
///
/// Returns [`SkillError::TooLarge`], [`SkillError::UnclosedFrontmatter`],
/// [`SkillError::MissingName`], or [`SkillError::MissingScript`].
pub fn parse_skill_manifest(content: &str) -> SkillResult<SkillManifest> {
    if content.len() > MAX_MANIFEST_BYTES {
        return Err(SkillError::TooLarge {
            size: content.len(),
            max: MAX_MANIFEST_BYTES,
        });
    }

    // Stage 1: canonical frontmatter.
    if let Some(parsed) = parse_frontmatter(content)? {
        return Ok(parsed);
    }

    // Stage 2: legacy whole-document YAML.
    if let Ok(yaml) = serde_yaml::from_str::<ManifestYaml>(content) {
        if let Some(name) = yaml.name.clone() {
            if !name.trim().is_empty() {
                return build(yaml, name, content, ParseStage::LegacyYaml);
            }
        }
    }

    // Stage 3: regex fallback.
    parse_fallback(content)
}

fn parse_frontmatter(content: &str) -> SkillResult<Option<SkillManifest>> {
    let Some(rest) = content.strip_prefix("---") else {
        return Ok(None);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return Ok(None);
    };

    // The closing delimiter is a line consisting of `---`.
    let mut offset = 0;
    let mut yaml_end = None;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            yaml_end = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let Some((yaml_end, body_start)) = yaml_end else {
        return Err(SkillError::UnclosedFrontmatter);
    };

    let yaml: ManifestYaml = serde_yaml::from_str(&rest[..yaml_end])?;
    let name = yaml
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .ok_or(SkillError::MissingName)?;

    build(yaml, name, &rest[body_start..], ParseStage::Frontmatter).map(Some)
}

fn build(
    yaml: ManifestYaml,
    name: String,
    body: &str,
    stage: ParseStage,
) -> SkillResult<SkillManifest> {
    let script = first_fenced_block(body).ok_or(SkillError::MissingScript)?;
    Ok(SkillManifest {
        name,
        description: yaml.description.unwrap_or_default(),
        version: yaml.version.unwrap_or_else(|| "0.0.0".to_string()),
        bins: yaml.bins,
        requires: yaml.warden.requires,
        script,
        stage,
    })
}

fn parse_fallback(content: &str) -> SkillResult<SkillManifest> {
    let name_re = Regex::new(r"(?m)^name:\s*(.+)$").map_err(|_| SkillError::MissingName)?;
    let desc_re =
        Regex::new(r"(?m)^description:\s*(.+)$").map_err(|_| SkillError::MissingName)?;

    let name = name_re
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_matches('"').to_string())
        .filter(|n| !n.is_empty())
        .ok_or(SkillError::MissingName)?;
    let description = desc_re
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_matches('"').to_string())
        .unwrap_or_default();
    let script = first_fenced_block(content).ok_or(SkillError::MissingScript)?;

    Ok(SkillManifest {
        name,
        description,
        version: "0.0.0".to_string(),
        bins: Vec::new(),
        requires: SkillRequires::default(),
        script,
        stage: ParseStage::Fallback,
    })
}

/// Extract the first fenced code block (``` delimited), without the
/// fence lines or the info string.
fn first_fenced_block(body: &str) -> Option<String> {
    let mut in_block = false;
    let mut script = String::new();
    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            if in_block {
                return Some(script);
            }
            in_block = true;
            continue;
        }
        if in_block {
            script.push_str(line);
            script.push('\n');
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = "---\nname: weather\ndescription: Fetch weather\nversion: 1.2.0\nbins: [curl]\nwarden:\n  requires:\n    bins: [jq]\n    env: [WEATHER_API_KEY]\n    os: [linux, macos]\n---\n\n# Weather\n\n```bash\ncurl https://api.weather.com\n```\n";

    #[test]
    fn test_stage1_frontmatter() {
        let manifest = parse_skill_manifest(CANONICAL).unwrap();
        assert_eq!(manifest.stage, ParseStage::Frontmatter);
        assert_eq!(manifest.name, "weather");
        assert_eq!(manifest.version, "1.2.0");
        assert_eq!(manifest.bins, vec!["curl"]);
        assert_eq!(manifest.requires.bins, vec!["jq"]);
        assert_eq!(manifest.requires.env, vec!["WEATHER_API_KEY"]);
        assert_eq!(manifest.requires.os, vec!["linux", "macos"]);
        assert_eq!(manifest.script.trim(), "curl https://api.weather.com");
    }

    #[test]
    fn test_unclosed_frontmatter_is_hard_error() {
        let content = "---\nname: broken\ndescription: no closing fence\n\n```sh\necho\n```\n";
        let err = parse_skill_manifest(content).unwrap_err();
        assert!(matches!(err, SkillError::UnclosedFrontmatter));
    }

    #[test]
    fn test_stage2_legacy_yaml() {
        // The whole document is YAML; the script block lives inside a
        // block scalar so the document stays parseable.
        let content =
            "name: legacy\ndescription: whole-doc yaml\nnotes: |\n  ```sh\n  echo hi\n  ```\n";
        let manifest = parse_skill_manifest(content).unwrap();
        assert_eq!(manifest.stage, ParseStage::LegacyYaml);
        assert_eq!(manifest.name, "legacy");
        assert_eq!(manifest.script.trim(), "echo hi");
    }

    #[test]
    fn test_stage3_fallback() {
        let content = "Some prose first.\n\nname: scrappy\ndescription: found by regex\n\n```python\nprint('hi')\n```\n";
        let manifest = parse_skill_manifest(content).unwrap();
        assert_eq!(manifest.stage, ParseStage::Fallback);
        assert_eq!(manifest.name, "scrappy");
        assert_eq!(manifest.script.trim(), "print('hi')");
    }

    #[test]
    fn test_missing_name() {
        let content = "just some text\n\n```sh\necho\n```\n";
        assert!(matches!(
            parse_skill_manifest(content).unwrap_err(),
            SkillError::MissingName
        ));
    }

    #[test]
    fn test_missing_script() {
        let content = "---\nname: noscript\n---\nNo code block here.\n";
        assert!(matches!(
            parse_skill_manifest(content).unwrap_err(),
            SkillError::MissingScript
        ));
    }

    #[test]
    fn test_too_large() {
        let mut content = String::from("---\nname: big\n---\n```sh\necho\n```\n");
        content.push_str(&"x".repeat(MAX_MANIFEST_BYTES));
        assert!(matches!(
            parse_skill_manifest(&content).unwrap_err(),
            SkillError::TooLarge { .. }
        ));
    }

    #[test]
    fn test_effective_bins_shadowing() {
        let manifest = parse_skill_manifest(CANONICAL).unwrap();
        // Top-level bins is non-empty: no shadowing.
        assert_eq!(manifest.effective_bins(), ["curl".to_string()]);

        let content = "---\nname: shadowed\nwarden:\n  requires:\n    bins: [rg]\n---\n```sh\necho\n```\n";
        let manifest = parse_skill_manifest(content).unwrap();
        assert_eq!(manifest.effective_bins(), ["rg".to_string()]);
    }

    #[test]
    fn test_normalized_name() {
        let content = "---\nname: \"  Weather \"\n---\n```sh\necho\n```\n";
        let manifest = parse_skill_manifest(content).unwrap();
        assert_eq!(manifest.normalized_name(), "weather");
    }
}
