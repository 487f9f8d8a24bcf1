use std::path::PathBuf;

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");
const ASSET_DIR_ENV: &str = "TASKBOARD_ASSET_DIR";
const DATABASE_URL_ENV: &str = "TASKBOARD_DATABASE_URL";

/// Directory holding the config file and the local sqlite store.
///
/// `TASKBOARD_ASSET_DIR` wins; debug builds otherwise use `dev_assets/` at the
/// workspace root, release builds the platform data directory.
pub fn asset_dir() -> PathBuf {
    let path = std::env::var(ASSET_DIR_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_asset_dir);

    if !path.exists() {
        if let Err(err) = std::fs::create_dir_all(&path) {
            tracing::warn!("Failed to create asset directory {}: {}", path.display(), err);
        }
    }

    path
}

fn default_asset_dir() -> PathBuf {
    if cfg!(debug_assertions) {
        return PathBuf::from(PROJECT_ROOT).join("../../dev_assets");
    }

    ProjectDirs::from("dev", "taskboard", "taskboard")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".taskboard"))
}

pub fn config_path() -> PathBuf {
    asset_dir().join("config.json")
}

pub fn database_url() -> String {
    std::env::var(DATABASE_URL_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| {
            format!(
                "sqlite://{}?mode=rwc",
                asset_dir().join("taskboard.sqlite").to_string_lossy()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_dir_override_is_created() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("nested").join("assets");

        // SAFETY: this is the only test in the crate touching the environment.
        unsafe {
            std::env::set_var(ASSET_DIR_ENV, &target);
        }
        let resolved = asset_dir();
        let config = config_path();
        let url = database_url();
        unsafe {
            std::env::remove_var(ASSET_DIR_ENV);
        }

        assert_eq!(resolved, target);
        assert!(target.is_dir());
        assert_eq!(config, target.join("config.json"));
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("taskboard.sqlite?mode=rwc"));
    }
}
