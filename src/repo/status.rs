//! `git status --porcelain` parsing

/// Maximum number of paths kept in any file list of a snapshot
pub const MAX_LISTED_FILES: usize = 20;

/// Files from one status listing, split by index/worktree state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    /// Every changed path, de-duplicated, in listing order, capped
    pub files: Vec<String>,
    /// True when the listing had any entry (before capping)
    pub dirty: bool,
    /// Paths with index changes (capped)
    pub staged: Vec<String>,
    /// Paths with worktree changes (capped)
    pub unstaged: Vec<String>,
    /// Paths unknown to git (capped)
    pub untracked: Vec<String>,
}

/// One parsed porcelain entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry<'a> {
    index: char,
    worktree: char,
    path: &'a str,
}

impl Entry<'_> {
    const fn is_untracked(&self) -> bool {
        self.index == '?' && self.worktree == '?'
    }

    const fn is_staged(&self) -> bool {
        !matches!(self.index, ' ' | '?' | '!')
    }

    const fn is_unstaged(&self) -> bool {
        !matches!(self.worktree, ' ' | '?' | '!')
    }
}

/// Parse porcelain v1 output
///
/// A path can be both staged and unstaged (partially staged file). Renames
/// are collapsed to their source path. Ignored entries (`!!`) are skipped.
#[must_use]
pub fn parse_porcelain(output: &str) -> StatusSummary {
    let entries: Vec<Entry<'_>> = output.lines().filter_map(parse_line).collect();

    let mut summary = StatusSummary {
        dirty: !entries.is_empty(),
        ..StatusSummary::default()
    };

    for entry in &entries {
        push_unique(&mut summary.files, entry.path);
        if entry.is_untracked() {
            push_unique(&mut summary.untracked, entry.path);
            continue;
        }
        if entry.is_staged() {
            push_unique(&mut summary.staged, entry.path);
        }
        if entry.is_unstaged() {
            push_unique(&mut summary.unstaged, entry.path);
        }
    }

    summary.files.truncate(MAX_LISTED_FILES);
    summary.staged.truncate(MAX_LISTED_FILES);
    summary.unstaged.truncate(MAX_LISTED_FILES);
    summary.untracked.truncate(MAX_LISTED_FILES);
    summary
}

fn parse_line(line: &str) -> Option<Entry<'_>> {
    // Leading spaces are significant: " M file" is an unstaged change
    let line = line.trim_end_matches(['\r', '\n']);
    let mut chars = line.chars();
    let index = chars.next()?;
    let worktree = chars.next()?;
    if index == '!' && worktree == '!' {
        return None;
    }

    let raw = line.get(3..).unwrap_or("").trim();
    if raw.is_empty() {
        return None;
    }

    let path = raw.split(" -> ").next().unwrap_or(raw);
    let path = path
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path);

    Some(Entry {
        index,
        worktree,
        path,
    })
}

fn push_unique(list: &mut Vec<String>, path: &str) {
    if !list.iter().any(|p| p == path) {
        list.push(path.to_string());
    }
}
