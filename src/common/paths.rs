//! Configuration and data paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/device-journey/` and `~/.local/share/device-journey/`
//! - macOS: `~/Library/Application Support/device-journey/`
//! - Windows: `%APPDATA%\device-journey\`

use std::path::PathBuf;

/// Name used for the config and data directories
const APP_NAME: &str = "device-journey";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the default directory for failure artifacts
pub fn artifacts_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("artifacts"))
}

/// Turn an arbitrary label into a file-name-safe slug
pub fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_dash = false;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "artifact".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Login / Submit step"), "login-submit-step");
        assert_eq!(slug("  "), "artifact");
        assert_eq!(slug("J1_fail!"), "j1_fail");
    }
}
