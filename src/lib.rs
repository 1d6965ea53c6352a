pub mod agent_core;
pub mod cli;
pub mod config;
pub mod datastore;
pub mod inference;
pub mod logging;
pub mod workbook;

use std::path::PathBuf;

/// Return the platform-standard data directory for sheet-agent.
///
/// - macOS: `~/Library/Application Support/sheet-agent/`
/// - Windows: `{FOLDERID_RoamingAppData}\sheet-agent\`
/// - Linux: `$XDG_DATA_HOME/sheet-agent/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.sheet-agent/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("sheet-agent");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sheet-agent")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_is_namespaced() {
        let dir = data_dir();
        assert!(dir.ends_with("sheet-agent") || dir.ends_with(".sheet-agent"));
    }

    /// Stage panics are contained through `JoinError`, which needs unwinding
    /// in every profile the binary ships with.
    #[test]
    fn release_profile_unwinds() {
        let manifest = include_str!("../Cargo.toml");
        let release = manifest
            .split("[profile.release]")
            .nth(1)
            .unwrap_or_default();
        let section = release.split("\n[").next().unwrap_or_default();
        assert!(
            !section
                .lines()
                .any(|l| l.trim().starts_with("panic") && l.contains("abort")),
            "release profile must not abort on panic"
        );
    }
}
