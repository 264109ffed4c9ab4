//! Skill eligibility against the host environment.

use tracing::debug;

use crate::manifest::SkillManifest;

/// Check whether a skill's requirements are satisfied on this host.
///
/// Returns `Ok(())` when eligible, or the list of unmet requirements.
/// Checks, in order: required binaries resolve on `PATH` (the
/// effective list - `requires.bins` shadows an empty top-level
/// `bins`), required environment variables are set and non-empty, and
/// the current OS is listed (an empty OS list means all).
///
/// # Errors
///
/// Returns the human-readable unmet requirements.
pub fn check_eligibility(manifest: &SkillManifest) -> Result<(), Vec<String>> {
    let mut unmet = Vec::new();

    for bin in manifest.effective_bins() {
        if which::which(bin).is_err() {
            unmet.push(format!("missing binary: {bin}"));
        }
    }

    for var in &manifest.requires.env {
        let present = std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false);
        if !present {
            unmet.push(format!("missing environment variable: {var}"));
        }
    }

    if !manifest.requires.os.is_empty() {
        let current = std::env::consts::OS;
        let supported = manifest
            .requires
            .os
            .iter()
            .any(|os| os.eq_ignore_ascii_case(current));
        if !supported {
            unmet.push(format!("unsupported OS: {current}"));
        }
    }

    if unmet.is_empty() {
        Ok(())
    } else {
        debug!(skill = %manifest.name, unmet = ?unmet, "Skill ineligible");
        Err(unmet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_skill_manifest;

    fn manifest(frontmatter: &str) -> SkillManifest {
        let content = format!("---\n{frontmatter}\n---\n```sh\necho\n```\n");
        parse_skill_manifest(&content).unwrap()
    }

    #[test]
    fn test_no_requirements_is_eligible() {
        let m = manifest("name: plain");
        assert!(check_eligibility(&m).is_ok());
    }

    #[test]
    fn test_present_binary_is_eligible() {
        // `sh` exists on every platform these tests run on.
        let m = manifest("name: shelly\nbins: [sh]");
        assert!(check_eligibility(&m).is_ok());
    }

    #[test]
    fn test_missing_binary_reported() {
        let m = manifest("name: nope\nbins: [definitely-not-a-binary-xyz]");
        let unmet = check_eligibility(&m).unwrap_err();
        assert_eq!(unmet.len(), 1);
        assert!(unmet[0].contains("definitely-not-a-binary-xyz"));
    }

    #[test]
    fn test_env_requirement() {
        std::env::set_var("WARDEN_SKILL_TEST_VAR", "set");
        let m = manifest("name: envy\nwarden:\n  requires:\n    env: [WARDEN_SKILL_TEST_VAR]");
        assert!(check_eligibility(&m).is_ok());

        let m = manifest("name: envy\nwarden:\n  requires:\n    env: [WARDEN_SKILL_UNSET_VAR]");
        let unmet = check_eligibility(&m).unwrap_err();
        assert!(unmet[0].contains("WARDEN_SKILL_UNSET_VAR"));
    }

    #[test]
    fn test_os_requirement() {
        let current = std::env::consts::OS;
        let m = manifest(&format!("name: osy\nwarden:\n  requires:\n    os: [{current}]"));
        assert!(check_eligibility(&m).is_ok());

        let m = manifest("name: osy\nwarden:\n  requires:\n    os: [plan9]");
        let unmet = check_eligibility(&m).unwrap_err();
        assert!(unmet[0].contains("unsupported OS"));
    }

    #[test]
    fn test_requires_bins_shadowing_applies() {
        let m = manifest(
            "name: shadow\nwarden:\n  requires:\n    bins: [definitely-not-a-binary-xyz]",
        );
        assert!(check_eligibility(&m).is_err());
    }
}
