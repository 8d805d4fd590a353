use std::path::{Path, PathBuf};

use anyhow::Context;

/// Directory holding the layered `*.env` files; overridable for packaged
/// deployments.
const CONFIG_DIR_VAR: &str = "RECORDS_CONFIG_DIR";
const DEFAULT_CONFIG_DIR: &str = "config";
const SECRETS_FILE: &str = ".secrets.env";

/// Env files in load order for a Rocket profile. Later files override
/// earlier ones.
pub fn env_files(config_dir: &Path, profile: &str) -> Vec<PathBuf> {
    let profile_file = if profile == "production" {
        "prod.env"
    } else {
        "dev.env"
    };

    vec![
        config_dir.join("common.env"),
        config_dir.join(profile_file),
        PathBuf::from(SECRETS_FILE),
    ]
}

/// Loads the env layers into the process environment and returns the files
/// that were found. Runs before tracing is up, so the caller logs the result.
pub fn load_environment() -> anyhow::Result<Vec<PathBuf>> {
    let profile = dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());
    let config_dir = dotenvy::var(CONFIG_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));

    let mut loaded = Vec::new();
    for path in env_files(&config_dir, &profile) {
        if !path.exists() {
            continue;
        }
        dotenvy::from_filename_override(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        loaded.push(path);
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_profile_uses_prod_file() {
        let files = env_files(Path::new("/etc/records"), "production");
        assert_eq!(
            files,
            vec![
                PathBuf::from("/etc/records/common.env"),
                PathBuf::from("/etc/records/prod.env"),
                PathBuf::from(".secrets.env"),
            ]
        );
    }

    #[test]
    fn other_profiles_use_dev_file() {
        let files = env_files(Path::new("config"), "debug");
        assert_eq!(files[1], PathBuf::from("config/dev.env"));
    }
}
