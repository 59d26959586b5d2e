use pkgdeck_core::parser::find_marked_line;
use pkgdeck_core::{InstallStatus, OutputParser};

const NOT_FOUND_MARKERS: &[&str] = &["0 packages installed", "0 packages found"];

const FAILURE_MARKERS: &[&str] = &[
    "ERROR:",
    "Access to the path",
    "is denied",
    "not running from an elevated command shell",
    "The package was not found",
];

/// Chocolatey 文档中视为成功的退出码（含需要重启的情况）
const SUCCESS_EXIT_CODES: &[i32] = &[0, 1605, 1614, 1641, 3010];

/// `choco list` 输出，支持两种格式：
/// `--limit-output` 的 `name|version`，以及旧版的 `name version` 表格
/// （首行 `Chocolatey vX`，末行 `N packages installed.`）。
#[derive(Debug, Default, Clone, Copy)]
pub struct ChocoParser;

impl ChocoParser {
    fn parse_row(line: &str) -> Option<(&str, &str)> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Chocolatey v") {
            return None;
        }

        if let Some((name, version)) = line.split_once('|') {
            return Some((name.trim(), version.trim()));
        }

        let mut parts = line.split_whitespace();
        let name = parts.next()?;
        let version = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some((name, version))
    }
}

fn starts_with_not_found(line: &str) -> bool {
    NOT_FOUND_MARKERS.iter().any(|marker| {
        line.get(..marker.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(marker))
    })
}

/// 从 `choco --version` 的输出中取主版本号。
pub fn parse_major_version(output: &str) -> Option<u32> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.split('.').next()?.parse().ok())
        .next()
}

impl OutputParser for ChocoParser {
    fn is_not_found(&self, output: &str) -> bool {
        output.lines().map(str::trim).any(starts_with_not_found)
    }

    fn parse_status(&self, package: &str, output: &str) -> InstallStatus {
        if self.is_not_found(output) {
            return InstallStatus::NotInstalled;
        }

        output
            .lines()
            .filter_map(Self::parse_row)
            .find(|(name, _)| name.eq_ignore_ascii_case(package))
            .map(|(_, version)| InstallStatus::installed(version))
            .unwrap_or(InstallStatus::NotInstalled)
    }

    fn detect_failure(&self, output: &str) -> Option<String> {
        find_marked_line(output, FAILURE_MARKERS)
    }

    fn is_success_exit(&self, exit_code: i32) -> bool {
        SUCCESS_EXIT_CODES.contains(&exit_code)
    }
}
