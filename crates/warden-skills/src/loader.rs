//! Skill discovery and precedence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{SkillError, SkillResult};
use crate::manifest::{parse_skill_manifest, ParseStage, SkillManifest, MANIFEST_FILE_NAME};

/// Where a skill was discovered. Order encodes precedence: when the
/// same normalized name appears in several layers, the lower-ranked
/// source wins (`Project` beats everything, `Builtin` loses to all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkillSource {
    /// Skills in the current project tree.
    Project,
    /// Per-user skills.
    User,
    /// Skills installed through the installer.
    Installed,
    /// Skills shipped with the runtime.
    Builtin,
}

impl std::fmt::Display for SkillSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::User => write!(f, "user"),
            Self::Installed => write!(f, "installed"),
            Self::Builtin => write!(f, "builtin"),
        }
    }
}

/// A discovered skill with its origin.
#[derive(Debug, Clone)]
pub struct LoadedSkill {
    /// The parsed manifest.
    pub manifest: SkillManifest,
    /// The skill's directory.
    pub dir: PathBuf,
    /// The layer it came from.
    pub source: SkillSource,
}

/// Scans skill layers and applies name precedence.
#[derive(Debug, Default)]
pub struct SkillLoader {
    layers: Vec<(SkillSource, PathBuf)>,
}

impl SkillLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Add a layer directory. Layers may be added in any order;
    /// precedence comes from the source, not insertion order.
    #[must_use]
    pub fn with_layer(mut self, source: SkillSource, dir: impl Into<PathBuf>) -> Self {
        self.layers.push((source, dir.into()));
        self
    }

    /// Discover skills across all layers.
    ///
    /// Each subdirectory containing a `SKILL.md` is a candidate.
    /// Symlinked skill directories are skipped with a warning.
    /// Manifests from the `Installed` layer must parse at the
    /// frontmatter stage; others may use any stage. When the same
    /// normalized (trim + lowercase) name appears in multiple layers,
    /// `project > user > installed > builtin` decides.
    ///
    /// # Errors
    ///
    /// Returns I/O errors reading layer directories. Individual
    /// manifest failures are logged and skipped.
    pub fn load(&self) -> SkillResult<Vec<LoadedSkill>> {
        let mut by_name: HashMap<String, LoadedSkill> = HashMap::new();

        let mut layers = self.layers.clone();
        layers.sort_by_key(|(source, _)| *source);

        for (source, dir) in layers {
            if !dir.is_dir() {
                debug!(layer = %source, dir = %dir.display(), "Skill layer missing, skipping");
                continue;
            }
            for skill in scan_layer(source, &dir)? {
                let key = skill.manifest.normalized_name();
                // Layers iterate in precedence order; first seen wins.
                by_name.entry(key).or_insert(skill);
            }
        }

        let mut skills: Vec<LoadedSkill> = by_name.into_values().collect();
        skills.sort_by(|a, b| a.manifest.normalized_name().cmp(&b.manifest.normalized_name()));
        Ok(skills)
    }
}

fn scan_layer(source: SkillSource, dir: &Path) -> SkillResult<Vec<LoadedSkill>> {
    let mut skills = Vec::new();

    let entries = std::fs::read_dir(dir).map_err(|e| SkillError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SkillError::io(dir, e))?;
        let path = entry.path();

        let file_type = entry.file_type().map_err(|e| SkillError::io(&path, e))?;
        if file_type.is_symlink() {
            warn!(path = %path.display(), "Symlinked skill directory skipped");
            continue;
        }
        if !file_type.is_dir() {
            continue;
        }

        let manifest_path = path.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            continue;
        }

        let content = match std::fs::read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "Unreadable manifest skipped");
                continue;
            },
        };

        match parse_skill_manifest(&content) {
            Ok(manifest) => {
                if source == SkillSource::Installed && manifest.stage != ParseStage::Frontmatter {
                    warn!(
                        skill = %manifest.name,
                        "Installed skill without frontmatter skipped"
                    );
                    continue;
                }
                skills.push(LoadedSkill {
                    manifest,
                    dir: path,
                    source,
                });
            },
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "Manifest parse failed, skipped");
            },
        }
    }

    Ok(skills)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, dir_name: &str, name: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE_NAME),
            format!("---\nname: {name}\ndescription: d\n---\n```sh\necho {name}\n```\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_precedence_project_beats_all() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("project");
        let user = root.path().join("user");
        let installed = root.path().join("installed");
        let builtin = root.path().join("builtin");

        write_skill(&project, "weather", "weather");
        write_skill(&user, "weather", "Weather"); // Same normalized name.
        write_skill(&installed, "weather", "WEATHER");
        write_skill(&builtin, "weather", "weather");
        write_skill(&user, "notes", "notes");

        let skills = SkillLoader::new()
            .with_layer(SkillSource::Builtin, &builtin)
            .with_layer(SkillSource::Installed, &installed)
            .with_layer(SkillSource::Project, &project)
            .with_layer(SkillSource::User, &user)
            .load()
            .unwrap();

        assert_eq!(skills.len(), 2);
        let weather = skills
            .iter()
            .find(|s| s.manifest.normalized_name() == "weather")
            .unwrap();
        assert_eq!(weather.source, SkillSource::Project);
        let notes = skills
            .iter()
            .find(|s| s.manifest.normalized_name() == "notes")
            .unwrap();
        assert_eq!(notes.source, SkillSource::User);
    }

    #[test]
    fn test_user_beats_installed_and_builtin() {
        let root = tempfile::tempdir().unwrap();
        let user = root.path().join("user");
        let installed = root.path().join("installed");

        write_skill(&user, "tool", "tool");
        write_skill(&installed, "tool", "tool");

        let skills = SkillLoader::new()
            .with_layer(SkillSource::Installed, &installed)
            .with_layer(SkillSource::User, &user)
            .load()
            .unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].source, SkillSource::User);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_skill_dir_skipped() {
        let root = tempfile::tempdir().unwrap();
        let layer = root.path().join("user");
        let elsewhere = root.path().join("elsewhere");
        write_skill(&elsewhere, "sneaky", "sneaky");
        std::fs::create_dir_all(&layer).unwrap();
        std::os::unix::fs::symlink(elsewhere.join("sneaky"), layer.join("sneaky")).unwrap();

        let skills = SkillLoader::new()
            .with_layer(SkillSource::User, &layer)
            .load()
            .unwrap();
        assert!(skills.is_empty());
    }

    #[test]
    fn test_installed_requires_frontmatter() {
        let root = tempfile::tempdir().unwrap();
        let installed = root.path().join("installed");
        let dir = installed.join("legacy");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE_NAME),
            "name: legacy\ndescription: d\nnotes: |\n  ```sh\n  echo\n  ```\n",
        )
        .unwrap();

        let skills = SkillLoader::new()
            .with_layer(SkillSource::Installed, &installed)
            .load()
            .unwrap();
        assert!(skills.is_empty());

        // The same manifest in the user layer is accepted.
        let user = root.path().join("user");
        let dir = user.join("legacy");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::copy(
            installed.join("legacy").join(MANIFEST_FILE_NAME),
            dir.join(MANIFEST_FILE_NAME),
        )
        .unwrap();
        let skills = SkillLoader::new()
            .with_layer(SkillSource::User, &user)
            .load()
            .unwrap();
        assert_eq!(skills.len(), 1);
    }

    #[test]
    fn test_missing_layer_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        let skills = SkillLoader::new()
            .with_layer(SkillSource::User, root.path().join("absent"))
            .load()
            .unwrap();
        assert!(skills.is_empty());
    }
}
