//! Atomic skill installation.

use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use warden_store::Store;

use crate::error::{SkillError, SkillResult};
use crate::manifest::{
    normalize_name, parse_skill_manifest, ParseStage, SkillManifest, MANIFEST_FILE_NAME,
};

/// Installs skill directories with stage-then-swap semantics.
///
/// The source tree is cloned into a staging sibling of the
/// destination, the existing install (if any) is renamed to `.bak`,
/// and the staged tree is renamed into place. On success the backup is
/// removed; on failure it is restored, so an interrupted install never
/// leaves the destination missing or half-written.
pub struct SkillInstaller {
    install_root: PathBuf,
    store: Option<Store>,
}

impl SkillInstaller {
    /// Create an installer rooted at `install_root`.
    #[must_use]
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            store: None,
        }
    }

    /// Record installs in the persistent skill registry.
    #[must_use]
    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Install the skill at `src_dir`.
    ///
    /// The source must carry a frontmatter-stage `SKILL.md` with a
    /// valid name. Returns the parsed manifest of the installed skill.
    ///
    /// # Errors
    ///
    /// Returns parse/validation errors, or
    /// [`SkillError::InstallFailed`] after restoring any backup.
    pub async fn install(&self, src_dir: &Path) -> SkillResult<SkillManifest> {
        let manifest_path = src_dir.join(MANIFEST_FILE_NAME);
        let content = std::fs::read_to_string(&manifest_path)
            .map_err(|e| SkillError::io(&manifest_path, e))?;
        let manifest = parse_skill_manifest(&content)?;
        if manifest.stage != ParseStage::Frontmatter {
            return Err(SkillError::FrontmatterRequired {
                name: manifest.name.clone(),
            });
        }

        let name = normalize_name(&manifest.name);
        validate_name(&name)?;

        std::fs::create_dir_all(&self.install_root)
            .map_err(|e| SkillError::io(&self.install_root, e))?;

        let dest = self.install_root.join(&name);
        let staged = self.install_root.join(format!(".{name}.staging"));
        let backup = self.install_root.join(format!("{name}.bak"));

        // Clean leftovers from an interrupted earlier attempt.
        let _ = std::fs::remove_dir_all(&staged);

        copy_tree(src_dir, &staged).map_err(|e| SkillError::InstallFailed {
            name: name.clone(),
            detail: format!("staging copy failed: {e}"),
        })?;

        let had_existing = dest.exists();
        if had_existing {
            let _ = std::fs::remove_dir_all(&backup);
            if let Err(e) = std::fs::rename(&dest, &backup) {
                let _ = std::fs::remove_dir_all(&staged);
                return Err(SkillError::InstallFailed {
                    name,
                    detail: format!("could not back up existing install: {e}"),
                });
            }
        }

        if let Err(e) = std::fs::rename(&staged, &dest) {
            // Restore the previous install before surfacing the error.
            if had_existing {
                if let Err(restore) = std::fs::rename(&backup, &dest) {
                    warn!(skill = %name, error = %restore, "Backup restore failed");
                }
            }
            let _ = std::fs::remove_dir_all(&staged);
            return Err(SkillError::InstallFailed {
                name,
                detail: format!("swap failed: {e}"),
            });
        }

        if had_existing {
            let _ = std::fs::remove_dir_all(&backup);
        }

        let content_hash = hash_tree(&dest).map_err(|e| SkillError::InstallFailed {
            name: name.clone(),
            detail: format!("hashing installed tree failed: {e}"),
        })?;

        if let Some(store) = &self.store {
            store
                .upsert_skill(
                    &name,
                    &manifest.version,
                    &dest.display().to_string(),
                    &content_hash,
                )
                .await?;
        }

        info!(skill = %name, version = %manifest.version, "Skill installed");
        Ok(manifest)
    }
}

impl std::fmt::Debug for SkillInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillInstaller")
            .field("install_root", &self.install_root)
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str) -> SkillResult<()> {
    let valid = Regex::new(r"^[a-z0-9][a-z0-9._-]*$")
        .map(|re| re.is_match(name))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(SkillError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// Recursively copy a directory tree, skipping symlinks.
fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Deterministic SHA-256 over relative paths and file contents.
fn hash_tree(dir: &Path) -> std::io::Result<String> {
    let mut paths = Vec::new();
    collect_files(dir, &mut paths)?;
    paths.sort();

    let mut hasher = Sha256::new();
    for path in &paths {
        let Ok(rel) = path.strip_prefix(dir) else {
            continue;
        };
        let rel = rel.to_string_lossy();
        hasher.update((rel.len() as u64).to_le_bytes());
        hasher.update(rel.as_bytes());
        let content = std::fs::read(path)?;
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn collect_files(dir: &Path, paths: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            collect_files(&entry.path(), paths)?;
        } else {
            paths.push(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_source(root: &Path, name: &str, script: &str) -> PathBuf {
        let src = root.join("src").join(name);
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join(MANIFEST_FILE_NAME),
            format!("---\nname: {name}\nversion: 1.0.0\n---\n```sh\n{script}\n```\n"),
        )
        .unwrap();
        std::fs::write(src.join("helper.txt"), "data").unwrap();
        src
    }

    #[tokio::test]
    async fn test_fresh_install() {
        let root = tempfile::tempdir().unwrap();
        let src = write_source(root.path(), "weather", "echo hi");
        let installer = SkillInstaller::new(root.path().join("installed"));

        let manifest = installer.install(&src).await.unwrap();
        assert_eq!(manifest.name, "weather");

        let dest = root.path().join("installed/weather");
        assert!(dest.join(MANIFEST_FILE_NAME).is_file());
        assert!(dest.join("helper.txt").is_file());
        assert!(!root.path().join("installed/weather.bak").exists());
        assert!(!root.path().join("installed/.weather.staging").exists());
    }

    #[tokio::test]
    async fn test_reinstall_replaces_without_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let installer = SkillInstaller::new(root.path().join("installed"));

        let src = write_source(root.path(), "weather", "echo one");
        installer.install(&src).await.unwrap();

        // Upgrade with different content.
        std::fs::write(
            src.join(MANIFEST_FILE_NAME),
            "---\nname: weather\nversion: 2.0.0\n---\n```sh\necho two\n```\n",
        )
        .unwrap();
        let manifest = installer.install(&src).await.unwrap();
        assert_eq!(manifest.version, "2.0.0");

        let dest = root.path().join("installed/weather");
        let installed = std::fs::read_to_string(dest.join(MANIFEST_FILE_NAME)).unwrap();
        assert!(installed.contains("2.0.0"));
        assert!(!root.path().join("installed/weather.bak").exists());
    }

    #[tokio::test]
    async fn test_registry_row_written() {
        let root = tempfile::tempdir().unwrap();
        let store = Store::in_memory().await.unwrap();
        let installer =
            SkillInstaller::new(root.path().join("installed")).with_store(store.clone());

        let src = write_source(root.path(), "weather", "echo hi");
        installer.install(&src).await.unwrap();

        let record = store.get_skill("weather").await.unwrap().unwrap();
        assert_eq!(record.version, "1.0.0");
        assert!(!record.content_hash.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("src/bad");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join(MANIFEST_FILE_NAME),
            "---\nname: \"../escape\"\n---\n```sh\necho\n```\n",
        )
        .unwrap();

        let installer = SkillInstaller::new(root.path().join("installed"));
        let err = installer.install(&src).await.unwrap_err();
        assert!(matches!(err, SkillError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn test_non_frontmatter_source_rejected() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("src/legacy");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join(MANIFEST_FILE_NAME),
            "name: legacy\nnotes: |\n  ```sh\n  echo\n  ```\n",
        )
        .unwrap();

        let installer = SkillInstaller::new(root.path().join("installed"));
        let err = installer.install(&src).await.unwrap_err();
        assert!(matches!(err, SkillError::FrontmatterRequired { .. }));
    }
}
