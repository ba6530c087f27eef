//! Locating ffmpeg and ffprobe.
//!
//! The [`ToolRegistry`] discovers and caches the locations of ffmpeg and
//! ffprobe and provides lookup methods for the rest of the crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use rw_core::config::ToolsConfig;
use serde::{Deserialize, Serialize};

/// Tools the transcode and probe paths depend on.
const KNOWN_TOOLS: &[&str] = &["ffmpeg", "ffprobe"];

/// Oldest ffmpeg/ffprobe release whose muxer and filter flags we rely on.
const MIN_VERSION: &str = ">=4.4.0";

/// A discovered external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// `ffmpeg` or `ffprobe`.
    pub name: String,
    /// Absolute executable path.
    pub path: PathBuf,
}

/// One row of the `/api/health` tools list and the `check-tools` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if available.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    /// `false` only when a parseable version is older than the minimum.
    pub meets_minimum: bool,
}

/// Tools found at startup, shared through the app context.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Resolve each tool from its configured path, falling back to `PATH`.
    ///
    /// A configured path is used when it exists; otherwise [`which::which`]
    /// locates the tool. Tools that are not found are omitted.
    pub fn discover(tools_config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                "ffprobe" => tools_config.ffprobe_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!("Configured {name} path {} does not exist; searching PATH", p.display());
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(
                    name.to_string(),
                    ToolConfig {
                        name: name.to_string(),
                        path,
                    },
                );
            }
        }

        Self { tools }
    }

    /// A registry with explicit paths, bypassing discovery.
    pub fn with_paths(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        let mut tools = HashMap::new();
        for (name, path) in [("ffmpeg", ffmpeg), ("ffprobe", ffprobe)] {
            tools.insert(
                name.to_string(),
                ToolConfig {
                    name: name.to_string(),
                    path,
                },
            );
        }
        Self { tools }
    }

    /// Return the [`ToolConfig`] for the given tool, or an
    /// [`rw_core::Error::Tool`] if it was not found during discovery.
    pub fn require(&self, name: &str) -> rw_core::Result<&ToolConfig> {
        self.tools
            .get(name)
            .ok_or_else(|| rw_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?")))
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Report every known tool, found or not, with its version line.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(cfg) => {
                    let version = detect_version(&cfg.path);
                    let meets_minimum = version.as_deref().map(version_meets_minimum).unwrap_or(true);
                    ToolInfo {
                        name: name.to_string(),
                        available: true,
                        version,
                        path: Some(cfg.path.clone()),
                        meets_minimum,
                    }
                }
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                    meets_minimum: false,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}

/// Extract a semver from an ffmpeg banner such as
/// `ffmpeg version 6.1.1-static https://...` or `ffmpeg version n5.1`.
/// Git snapshot builds (`N-112233-g...`) carry no release number.
pub fn parse_tool_version(banner: &str) -> Option<semver::Version> {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"version\s+n?(\d+)\.(\d+)(?:\.(\d+))?").expect("valid regex"));
    let caps = RE.captures(banner)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    Some(semver::Version::new(part(1)?, part(2)?, part(3).unwrap_or(0)))
}

fn version_meets_minimum(banner: &str) -> bool {
    let Some(version) = parse_tool_version(banner) else {
        return true;
    };
    semver::VersionReq::parse(MIN_VERSION)
        .map(|req| req.matches(&version))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_with_default_config() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        // No tool is guaranteed in CI; the call itself must not panic.
        let infos = registry.check_all();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ffmpeg", "ffprobe"]);
    }

    #[test]
    fn require_missing_tool_returns_error() {
        let registry = ToolRegistry::default();
        let err = registry.require("ffmpeg").unwrap_err();
        assert!(err.to_string().contains("ffmpeg not found"));
    }

    #[test]
    fn explicit_paths() {
        let registry = ToolRegistry::with_paths("/opt/ff/ffmpeg".into(), "/opt/ff/ffprobe".into());
        assert_eq!(registry.require("ffprobe").unwrap().path, PathBuf::from("/opt/ff/ffprobe"));
        assert!(registry.is_available("ffmpeg"));
    }

    #[test]
    fn version_parsing() {
        assert_eq!(
            parse_tool_version("ffmpeg version 6.1.1-static https://johnvansickle.com"),
            Some(semver::Version::new(6, 1, 1))
        );
        assert_eq!(
            parse_tool_version("ffprobe version n5.1 Copyright"),
            Some(semver::Version::new(5, 1, 0))
        );
        assert_eq!(parse_tool_version("ffmpeg version N-112233-gdeadbeef"), None);
        assert!(!version_meets_minimum("ffmpeg version 3.4.8"));
        assert!(version_meets_minimum("ffmpeg version N-112233-gdeadbeef"));
    }
}
