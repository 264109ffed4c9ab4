//! Warden Skills - manifest parsing, precedence, and installation.
//!
//! A skill is a directory with a `SKILL.md` manifest: YAML frontmatter
//! describing the skill plus a fenced script block. This crate
//! provides:
//!
//! - Three-stage manifest parsing (canonical frontmatter, legacy
//!   whole-document YAML, regex fallback) with a 1 MiB size bound
//! - Eligibility checks from `warden.requires.{bins,env,os}`
//! - The loader precedence rule `project > user > installed > builtin`
//!   on normalized names, skipping symlinked skill directories
//! - Atomic installation: stage, back up, rename, restore on failure

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod eligibility;
mod error;
mod installer;
mod loader;
mod manifest;

pub use eligibility::check_eligibility;
pub use error::{SkillError, SkillResult};
pub use installer::SkillInstaller;
pub use loader::{LoadedSkill, SkillLoader, SkillSource};
pub use manifest::{parse_skill_manifest, ParseStage, SkillManifest, SkillRequires, MANIFEST_FILE_NAME, MAX_MANIFEST_BYTES};
