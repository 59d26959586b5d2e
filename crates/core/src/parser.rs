use crate::package::InstallStatus;

/// 包管理器输出的解析器，每种工具（及每种已知输出格式）一个实现。
pub trait OutputParser: Send + Sync {
    /// 输出中是否包含“未找到”标记
    fn is_not_found(&self, output: &str) -> bool;

    /// 从探测输出中解析 `package` 的安装状态
    fn parse_status(&self, package: &str, output: &str) -> InstallStatus;

    /// 安装/卸载输出中的失败标记，命中时返回对应的输出行
    fn detect_failure(&self, output: &str) -> Option<String>;

    /// 视为成功的退出码，默认只有 0
    fn is_success_exit(&self, exit_code: i32) -> bool {
        exit_code == 0
    }
}

/// 规范化换行，并处理进度条用 `\r` 原地覆盖的行（只保留最后一段）。
pub fn clean_output(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .split('\n')
        .map(|line| {
            if line.contains('\r') {
                line.rsplit('\r').next().unwrap_or(line)
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 按两个及以上连续空白切分列；显示名称内部的单个空格不会被切开。
pub fn split_columns(line: &str) -> Vec<&str> {
    let mut columns = Vec::new();
    let mut start: Option<usize> = None;
    let mut gap_start = 0;
    let mut gap = 0;

    for (idx, ch) in line.char_indices() {
        if ch.is_whitespace() {
            if gap == 0 {
                gap_start = idx;
            }
            gap += 1;
            continue;
        }

        if let Some(begin) = start {
            if gap >= 2 {
                columns.push(&line[begin..gap_start]);
                start = Some(idx);
            }
        } else {
            start = Some(idx);
        }
        gap = 0;
    }

    if let Some(begin) = start {
        let end = if gap > 0 { gap_start } else { line.len() };
        columns.push(&line[begin..end]);
    }

    columns
}

pub fn is_separator_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed.contains('-')
        && trimmed.chars().all(|c| c == '-' || c.is_whitespace())
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// 返回第一个包含任一标记（不区分大小写）的行。
pub fn find_marked_line(output: &str, markers: &[&str]) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| markers.iter().any(|marker| contains_ignore_case(line, marker)))
        .map(|line| line.to_string())
}
