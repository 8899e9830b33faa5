//! Regex search over a catalog of plain-text reference documents.
//!
//! Documents are discovered as `*.txt` files in one directory. Each gets a
//! stable id derived from its file stem (`MacTCP_Programmers_Guide_1989.txt`
//! → `mactcp-programmers-guide-1989`).

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::search::rule;
use crate::{AppError, Result};

/// Default lines returned by [`extract_section`].
pub const DEFAULT_SECTION_LINES: usize = 100;

/// Search knobs shared by every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Lines shown before and after each match.
    pub context_lines: usize,
    /// Match case exactly.
    pub case_sensitive: bool,
    /// Matches rendered per file.
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            case_sensitive: false,
            max_results: 10,
        }
    }
}

/// One matching line with its surrounding context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    /// One-based line number of the match.
    pub line: usize,
    /// `(line number, text)` pairs, the match included.
    pub context: Vec<(usize, String)>,
}

/// Matches of one pattern in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatches {
    /// File name used in the report header.
    pub file_name: String,
    /// Total matching lines in the file.
    pub total: usize,
    /// Rendered matches, at most `max_results`.
    pub hits: Vec<Hit>,
}

impl FileMatches {
    /// Whether some matches were left out of [`hits`](Self::hits).
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.total > self.hits.len()
    }
}

impl Display for FileMatches {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Found {} match(es) in {}", self.total, self.file_name)?;
        if self.truncated() {
            write!(f, " (showing first {})", self.hits.len())?;
        }
        write!(f, "\n{}\n", rule('='))?;
        for hit in &self.hits {
            writeln!(f)?;
            for (line, text) in &hit.context {
                let marker = if *line == hit.line { ">>> " } else { "    " };
                writeln!(f, "{marker}Line {line}: {text}")?;
            }
            write!(f, "{}", rule('-'))?;
        }
        Ok(())
    }
}

/// A section located by [`extract_section`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// File name used in the report header.
    pub file_name: String,
    /// One-based line where the section name was found.
    pub line: usize,
    /// Extracted lines, starting at the heading.
    pub lines: Vec<String>,
    /// Lines left in the file after the extract.
    pub remaining: usize,
}

impl Display for Section {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Section found at line {} in {}\n{}\n\n{}",
            self.line,
            self.file_name,
            rule('='),
            self.lines.join("\n")
        )?;
        if self.remaining > 0 {
            write!(f, "\n\n[... {} more lines in file ...]", self.remaining)?;
        }
        Ok(())
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let bytes = fs::read(path)
        .map_err(|err| AppError::Search(format!("cannot read {}: {err}", path.display())))?;
    Ok(String::from_utf8_lossy(&bytes)
        .split('\n')
        .map(str::to_owned)
        .collect())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()?)
}

/// Search `path` for lines matching `pattern`.
///
/// # Errors
///
/// `AppError::Search` when the file cannot be read or `pattern` is not a
/// valid regex.
pub fn search_in_file(path: &Path, pattern: &str, options: &SearchOptions) -> Result<FileMatches> {
    let regex = build_regex(pattern, options.case_sensitive)?;
    let lines = read_lines(path)?;

    let mut total = 0;
    let mut hits = Vec::new();
    for (idx, text) in lines.iter().enumerate() {
        if !regex.is_match(text) {
            continue;
        }
        total += 1;
        if hits.len() >= options.max_results {
            continue;
        }
        let start = idx.saturating_sub(options.context_lines);
        let end = idx
            .saturating_add(options.context_lines)
            .saturating_add(1)
            .min(lines.len());
        hits.push(Hit {
            line: idx + 1,
            context: (start..end).map(|j| (j + 1, lines[j].clone())).collect(),
        });
    }

    debug!(file = %path.display(), pattern, total, "document searched");
    Ok(FileMatches {
        file_name: file_name(path),
        total,
        hits,
    })
}

/// Find the first line containing `section` (case-insensitive, literal) and
/// return up to `lines_to_read` lines from there.
///
/// Returns `Ok(None)` when the section name does not occur.
///
/// # Errors
///
/// `AppError::Search` when the file cannot be read.
pub fn extract_section(path: &Path, section: &str, lines_to_read: usize) -> Result<Option<Section>> {
    let regex = build_regex(&regex::escape(section), false)?;
    let lines = read_lines(path)?;

    let Some(start) = lines.iter().position(|l| regex.is_match(l)) else {
        return Ok(None);
    };
    let end = (start + lines_to_read).min(lines.len());
    Ok(Some(Section {
        file_name: file_name(path),
        line: start + 1,
        lines: lines[start..end].to_vec(),
        remaining: lines.len() - end,
    }))
}

/// Lower-kebab id for a document file stem.
#[must_use]
pub fn doc_id(stem: &str) -> String {
    let mut id = String::with_capacity(stem.len());
    let mut pending_dash = false;
    for ch in stem.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !id.is_empty() {
                id.push('-');
            }
            pending_dash = false;
            id.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    id
}

/// Named set of searchable documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocCatalog {
    docs: BTreeMap<String, PathBuf>,
}

impl DocCatalog {
    /// Catalog every `*.txt` file directly under `dir`.
    ///
    /// # Errors
    ///
    /// `AppError::Search` when `dir` is not a directory or cannot be listed.
    pub fn discover(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(AppError::Search(format!(
                "documentation directory not found: {}",
                dir.display()
            )));
        }
        let pattern = dir.join("*.txt");
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|err| AppError::Search(format!("invalid documentation glob: {err}")))?;

        let mut docs = BTreeMap::new();
        for entry in paths {
            match entry {
                Ok(path) => {
                    let Some(stem) = path.file_stem() else {
                        continue;
                    };
                    docs.insert(doc_id(&stem.to_string_lossy()), path);
                }
                Err(err) => warn!(error = %err, "skipping unreadable documentation entry"),
            }
        }
        debug!(dir = %dir.display(), count = docs.len(), "documentation catalog built");
        Ok(Self { docs })
    }

    /// Catalog from explicit `(id, path)` pairs.
    #[must_use]
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        Self {
            docs: entries.into_iter().collect(),
        }
    }

    /// Document ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.docs.keys().map(String::as_str)
    }

    /// Path of document `id`.
    #[must_use]
    pub fn path(&self, id: &str) -> Option<&Path> {
        self.docs.get(id).map(PathBuf::as_path)
    }

    /// Human-readable listing with file names and sizes.
    #[must_use]
    pub fn list(&self) -> String {
        let mut out = vec!["Available documentation:".to_owned(), rule('='), String::new()];
        for (id, path) in &self.docs {
            match fs::metadata(path) {
                Ok(meta) => {
                    #[allow(clippy::cast_precision_loss)]
                    let size_mb = meta.len() as f64 / (1024.0 * 1024.0);
                    out.push(format!("• {id}"));
                    out.push(format!("  File: {}", file_name(path)));
                    out.push(format!("  Size: {size_mb:.2} MB"));
                }
                Err(_) => out.push(format!("• {id} (NOT FOUND)")),
            }
            out.push(String::new());
        }
        out.join("\n")
    }

    /// Search every document whose id contains `filter` (case-insensitive),
    /// or all documents when `filter` is `None`.
    ///
    /// Returns `(id, matches)` for each document with at least one match.
    ///
    /// # Errors
    ///
    /// - `AppError::Search` when `filter` selects no document.
    /// - `AppError::Search` when `pattern` is not a valid regex.
    pub fn search(
        &self,
        pattern: &str,
        filter: Option<&str>,
        options: &SearchOptions,
    ) -> Result<Vec<(String, FileMatches)>> {
        let filter = filter.map(str::to_lowercase);
        let selected: Vec<(&String, &PathBuf)> = self
            .docs
            .iter()
            .filter(|(id, _)| filter.as_deref().map_or(true, |f| id.contains(f)))
            .collect();

        if selected.is_empty() {
            let known: Vec<&str> = self.ids().collect();
            return Err(AppError::Search(format!(
                "no documentation matches filter: {}; available: {}",
                filter.unwrap_or_default(),
                known.join(", ")
            )));
        }

        // Surface a bad pattern even when every document is missing.
        build_regex(pattern, options.case_sensitive)?;

        let mut results = Vec::new();
        for (id, path) in selected {
            if !path.exists() {
                continue;
            }
            let matches = search_in_file(path, pattern, options)?;
            if matches.total > 0 {
                results.push((id.clone(), matches));
            }
        }
        Ok(results)
    }

    /// Extract `section` from document `id`.
    ///
    /// # Errors
    ///
    /// `AppError::Search` when `id` is unknown or the file cannot be read.
    pub fn section(&self, id: &str, section: &str, lines_to_read: usize) -> Result<Option<Section>> {
        let path = self.path(id).ok_or_else(|| {
            let known: Vec<&str> = self.ids().collect();
            AppError::Search(format!(
                "unknown documentation id: {id}; available: {}",
                known.join(", ")
            ))
        })?;
        extract_section(path, section, lines_to_read)
    }
}

/// Render catalog search results, one block per document.
#[must_use]
pub fn render_results(pattern: &str, results: &[(String, FileMatches)]) -> String {
    if results.is_empty() {
        return format!("No matches found for query: {pattern}");
    }
    let mut out = Vec::new();
    for (id, matches) in results {
        out.push(format!("\n{}", rule('=')));
        out.push(format!("Results from: {id}"));
        out.push(rule('='));
        out.push(matches.to_string());
    }
    out.join("\n")
}
