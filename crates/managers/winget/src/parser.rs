use pkgdeck_core::parser::{find_marked_line, is_separator_line, split_columns};
use pkgdeck_core::{InstallStatus, OutputParser};

const NOT_FOUND_MARKERS: &[&str] = &[
    "No installed package found matching input criteria",
    "No package found matching input criteria",
];

const FAILURE_MARKERS: &[&str] = &[
    "ERROR:",
    "Installer failed with exit code",
    "Uninstall failed with exit code",
    "Access is denied",
    "requires administrator privileges",
    "Multiple packages found matching input criteria",
];

const NAME_HEADERS: &[&str] = &["name", "nom", "nombre", "nome"];
const ID_HEADERS: &[&str] = &["id", "id."];

/// `winget list` 的表格输出。
///
/// 列之间至少两个空格；数据行为 名称/ID/版本 三列，可选 可用版本、来源 列。
/// 过长的 ID 会被截断为以 `…` 结尾。
#[derive(Debug, Default, Clone, Copy)]
pub struct WingetParser;

impl WingetParser {
    fn is_header(columns: &[&str]) -> bool {
        let first = columns[0].to_lowercase();
        let second = columns[1].to_lowercase();
        NAME_HEADERS.contains(&first.as_str()) && ID_HEADERS.contains(&second.as_str())
    }

    fn matches(column: &str, package: &str) -> bool {
        if column.eq_ignore_ascii_case(package) {
            return true;
        }
        match column.strip_suffix('…') {
            Some(prefix) if !prefix.is_empty() => package
                .to_lowercase()
                .starts_with(&prefix.to_lowercase()),
            _ => false,
        }
    }
}

impl OutputParser for WingetParser {
    fn is_not_found(&self, output: &str) -> bool {
        find_marked_line(output, NOT_FOUND_MARKERS).is_some()
    }

    fn parse_status(&self, package: &str, output: &str) -> InstallStatus {
        if self.is_not_found(output) {
            return InstallStatus::NotInstalled;
        }

        for line in output.lines() {
            if line.trim().is_empty() || is_separator_line(line) {
                continue;
            }

            let columns = split_columns(line);
            if !(3..=5).contains(&columns.len()) || Self::is_header(&columns) {
                continue;
            }

            if Self::matches(columns[0], package) || Self::matches(columns[1], package) {
                return InstallStatus::installed(columns[2]);
            }
        }

        InstallStatus::NotInstalled
    }

    fn detect_failure(&self, output: &str) -> Option<String> {
        find_marked_line(output, FAILURE_MARKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_OUTPUT: &str = "\
Name                 Id                   Version  Source
---------------------------------------------------------
Microsoft PowerToys  Microsoft.PowerToys  0.81.0   winget
";

    #[test]
    fn test_three_column_row() {
        let status = WingetParser.parse_status("Foo.Bar", "Foo Bar App   Foo.Bar   1.2.3");
        assert_eq!(status, InstallStatus::installed("1.2.3"));
    }

    #[test]
    fn test_four_column_table_with_header() {
        let status = WingetParser.parse_status("microsoft.powertoys", LIST_OUTPUT);
        assert_eq!(status.version(), Some("0.81.0"));
    }

    #[test]
    fn test_upgrade_column_layout() {
        let output = "\
Name  Id       Version  Available  Source
-----------------------------------------
Git   Git.Git  2.43.0   2.44.0     winget
";
        assert_eq!(
            WingetParser.parse_status("Git.Git", output),
            InstallStatus::installed("2.43.0")
        );
    }

    #[test]
    fn test_match_on_name_column() {
        let status = WingetParser.parse_status("Microsoft PowerToys", LIST_OUTPUT);
        assert!(status.is_installed());
    }

    #[test]
    fn test_truncated_id() {
        let output = "\
Name             Id                 Version
-------------------------------------------
Visual C++ 2015  Microsoft.VCRedi…  14.0.24215
";
        let status = WingetParser.parse_status("Microsoft.VCRedist.2015+.x64", output);
        assert_eq!(status.version(), Some("14.0.24215"));
    }

    #[test]
    fn test_not_found_sentinel() {
        let output = "No installed package found matching input criteria.";
        assert!(WingetParser.is_not_found(output));
        assert_eq!(
            WingetParser.parse_status("baz", output),
            InstallStatus::NotInstalled
        );
    }

    #[test]
    fn test_other_rows_and_odd_lines_are_skipped() {
        let output = "\
Name  Id  Version  Source
-------------------------
Other App  Other.App  1.0  winget
garbage
a  b  c  d  e  f
";
        assert_eq!(
            WingetParser.parse_status("Foo.Bar", output),
            InstallStatus::NotInstalled
        );
    }

    #[test]
    fn test_failure_markers() {
        let output = "Starting package install...\nInstaller failed with exit code: 1603";
        assert_eq!(
            WingetParser.detect_failure(output).as_deref(),
            Some("Installer failed with exit code: 1603")
        );
        assert!(WingetParser.detect_failure("Successfully installed").is_none());
    }
}
