// ABOUTME: Parser for `ls -la` output produced inside a sandbox
// ABOUTME: Turns one directory level into typed entries, skipping `.` and `..`

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub path: String,
}

/// Number of whitespace-separated columns before the file name in `ls -la` output:
/// mode, links, owner, group, size, month, day, time-or-year
const COLUMNS_BEFORE_NAME: usize = 8;

/// Parse `ls -la <dir>` output into entries whose paths are rooted at `dir`
pub fn parse_ls_output(dir: &str, output: &str) -> Vec<DirectoryEntry> {
    output
        .lines()
        .filter_map(|line| parse_line(dir, line))
        .collect()
}

fn parse_line(dir: &str, line: &str) -> Option<DirectoryEntry> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with("total ") {
        return None;
    }

    let mut columns = Vec::with_capacity(COLUMNS_BEFORE_NAME);
    let mut rest = line;
    for _ in 0..COLUMNS_BEFORE_NAME {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        columns.push(&rest[..end]);
        rest = &rest[end..];
    }

    // Single separator space; anything after it belongs to the name
    let raw_name = rest.strip_prefix(' ').unwrap_or(rest).trim_start();
    let mode = columns[0];
    let name = if mode.starts_with('l') {
        raw_name.split(" -> ").next().unwrap_or(raw_name)
    } else {
        raw_name
    };

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    let kind = if mode.starts_with('d') {
        EntryKind::Directory
    } else {
        EntryKind::File
    };

    Some(DirectoryEntry {
        name: name.to_string(),
        kind,
        size: columns[4].parse().unwrap_or(0),
        path: join_path(dir, name),
    })
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
