//! Wordlist processing: expands raw lines into the ordered, deduplicated
//! sequence of candidate paths, and hands them out to workers through an
//! atomic cursor.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ScanError;
use crate::utils::{clean_path, lstrip_once};

/// Placeholder substituted with each configured extension.
pub const EXTENSION_TAG: &str = "%ext%";

static EXT_TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)%ext%").unwrap());
/// Matches paths that already carry a recognizable file extension.
pub static EXTENSION_RECOGNITION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[a-zA-Z0-9]{2,5}$").unwrap());
static TRAILING_EXTENSION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[a-zA-Z0-9]+$").unwrap());

/// Extensions that stay untouched by `overwrite_extensions`: they carry
/// meaning on their own and replacing them produces junk paths.
const KEEP_EXTENSIONS: &[&str] = &[
    "axd", "htaccess", "htpasswd", "ini", "json", "log", "swp", "tar", "txt", "xml", "zip",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Casing {
    #[default]
    None,
    Lowercase,
    Uppercase,
    Capitalize,
}

/// How wordlist lines are expanded into entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WordlistPolicy {
    pub extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    pub casing: Casing,
    pub force_extensions: bool,
    pub overwrite_extensions: bool,
    pub remove_extensions: bool,
}

/// Ordered, deduplicated candidate paths plus the shared iteration cursor.
/// Entries never change after generation; `next()` hands each entry to
/// exactly one caller per pass.
#[derive(Debug)]
pub struct Dictionary {
    entries: Vec<String>,
    cursor: AtomicUsize,
}

impl Dictionary {
    /// Reads and expands the given wordlist files.
    pub fn generate(files: &[PathBuf], policy: &WordlistPolicy) -> Result<Self, ScanError> {
        let mut lines = Vec::new();
        for file in files {
            let content = fs::read_to_string(file).map_err(|e| {
                ScanError::Config(format!("Couldn't read wordlist {}: {e}", file.display()))
            })?;
            lines.extend(content.lines().map(str::to_string));
        }
        Ok(Self::from_lines(lines.into_iter(), policy))
    }

    /// Expansion core, separated from file I/O.
    pub fn from_lines(lines: impl Iterator<Item = String>, policy: &WordlistPolicy) -> Self {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        for raw in lines {
            let line = lstrip_once(raw.trim(), "/");

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = if policy.remove_extensions {
                line.split('.').next().unwrap_or(line)
            } else {
                line
            };
            if line.is_empty() {
                continue;
            }

            if ends_with_extension(clean_path(line), &policy.exclude_extensions) {
                continue;
            }

            if line.to_lowercase().contains(EXTENSION_TAG) {
                for ext in &policy.extensions {
                    let expanded = EXT_TAG_REGEX.replace_all(line, regex::NoExpand(ext));
                    add(&mut entries, &mut seen, policy, &expanded);
                }
            } else if policy.force_extensions
                && !line.ends_with('/')
                && !EXTENSION_RECOGNITION_REGEX.is_match(line)
            {
                add(&mut entries, &mut seen, policy, line);
                add(&mut entries, &mut seen, policy, &format!("{line}/"));
                for ext in &policy.extensions {
                    add(&mut entries, &mut seen, policy, &format!("{line}.{ext}"));
                }
            } else if policy.overwrite_extensions
                && !ends_with_extension(line, &policy.extensions)
                && !KEEP_EXTENSIONS
                    .iter()
                    .any(|ext| line.ends_with(&format!(".{ext}")))
                && !line.contains('?')
                && !line.contains('#')
                && EXTENSION_RECOGNITION_REGEX.is_match(line)
            {
                add(&mut entries, &mut seen, policy, line);
                for ext in &policy.extensions {
                    let replaced =
                        TRAILING_EXTENSION_REGEX.replace(line, regex::NoExpand(&format!(".{ext}")));
                    add(&mut entries, &mut seen, policy, &replaced);
                }
            } else {
                add(&mut entries, &mut seen, policy, line);
            }
        }

        Self {
            entries,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claims the next entry. Linearizable: concurrent callers each receive
    /// a distinct entry until the pass is exhausted.
    pub fn next(&self) -> Option<String> {
        let i = self.cursor.fetch_add(1, Ordering::AcqRel);
        self.entries.get(i).cloned()
    }

    /// Rewinds the cursor for the next directory pass.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    /// Current position, clamped to the entry count for progress display.
    pub fn index(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.entries.len())
    }

    /// Restores a cursor position from a saved session.
    pub fn set_index(&self, index: usize) {
        self.cursor.store(index, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.iter().any(|e| e == entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }
}

fn ends_with_extension(path: &str, extensions: &[String]) -> bool {
    extensions
        .iter()
        .any(|ext| path.ends_with(&format!(".{ext}")))
}

fn apply_casing(casing: Casing, path: String) -> String {
    match casing {
        Casing::None => path,
        Casing::Lowercase => path.to_lowercase(),
        Casing::Uppercase => path.to_uppercase(),
        Casing::Capitalize => {
            let mut chars = path.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => path,
            }
        }
    }
}

/// Prefix/suffix expansion and deduplicated insertion for one emitted entry.
fn add(entries: &mut Vec<String>, seen: &mut HashSet<String>, policy: &WordlistPolicy, path: &str) {
    let mut push = |candidate: String| {
        let candidate = apply_casing(policy.casing, candidate);
        if seen.insert(candidate.clone()) {
            entries.push(candidate);
        }
    };

    for prefix in &policy.prefixes {
        if !path.starts_with('/') && !path.starts_with(prefix.as_str()) {
            push(format!("{prefix}{path}"));
        }
    }
    for suffix in &policy.suffixes {
        if !path.ends_with('/') && !path.ends_with(suffix.as_str()) && !path.contains('#') {
            push(format!("{path}{suffix}"));
        }
    }
    if policy.prefixes.is_empty() && policy.suffixes.is_empty() {
        push(path.to_string());
    }
}

/// Loads the per-status path blacklists from `db/<status>_blacklist.txt`.
/// Missing files are skipped.
pub fn get_blacklists(extensions: &[String], db_dir: &Path) -> HashMap<u16, Dictionary> {
    let mut blacklists = HashMap::new();

    for status in [400u16, 403, 500] {
        let file = db_dir.join(format!("{status}_blacklist.txt"));
        if !file.is_file() {
            continue;
        }
        let policy = WordlistPolicy {
            extensions: extensions.to_vec(),
            ..WordlistPolicy::default()
        };
        if let Ok(dictionary) = Dictionary::generate(&[file], &policy) {
            blacklists.insert(status, dictionary);
        }
    }

    blacklists
}
