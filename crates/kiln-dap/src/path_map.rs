//! Translation between local script files and the remote host's dotted module paths.
//!
//! A project keeps its script library under a source-root directory
//! (`script-python`), one directory per module with the code in an entry file
//! (`code.py`):
//!
//! ```text
//! /proj/script-python/Shared/Foo/code.py  <->  Shared.Foo
//! ```

use kiln_config::BridgeConfig;

/// Reserved source name for inline (console) code that has no backing file.
pub const CONSOLE_SOURCE_NAME: &str = "<console>";

/// `sourceReference` handed to the host for console frames.
pub const CONSOLE_SOURCE_REFERENCE: i64 = 1;

/// Normalize a file identity so identities coming from different platforms compare equal.
///
/// Backslashes become `/`, repeated separators collapse, a Windows drive letter is
/// lowercased, and a trailing separator is dropped.
pub fn normalize_identity(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_sep = false;
    for ch in path.trim().chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if prev_sep {
                continue;
            }
            prev_sep = true;
        } else {
            prev_sep = false;
        }
        out.push(ch);
    }

    let bytes = out.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let drive = (bytes[0] as char).to_ascii_lowercase();
        out.replace_range(0..1, &drive.to_string());
    }

    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    source_root_marker: String,
    entry_filename: String,
}

impl Default for PathMapper {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl PathMapper {
    pub fn new(source_root_marker: impl Into<String>, entry_filename: impl Into<String>) -> Self {
        Self {
            source_root_marker: source_root_marker.into(),
            entry_filename: entry_filename.into(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(&config.source_root_marker, &config.entry_filename)
    }

    pub fn source_root_marker(&self) -> &str {
        &self.source_root_marker
    }

    fn split_at_marker<'a>(&self, segments: &'a [&'a str]) -> Option<(&'a [&'a str], &'a [&'a str])> {
        let pos = segments
            .iter()
            .rposition(|segment| *segment == self.source_root_marker)?;
        Some((&segments[..pos], &segments[pos + 1..]))
    }

    /// Dotted module path for `file`, or `None` when the file is not inside a
    /// script library and therefore cannot be debugged through the bridge.
    pub fn module_path(&self, file: &str) -> Option<String> {
        let normalized = normalize_identity(file);
        let segments: Vec<&str> = normalized.split('/').collect();
        let (_, rest) = self.split_at_marker(&segments)?;

        let rest = match rest.split_last() {
            Some((last, parents)) if *last == self.entry_filename => parents,
            _ => rest,
        };
        let parts: Vec<&str> = rest.iter().copied().filter(|s| !s.is_empty()).collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("."))
    }

    /// Directory containing the script library's source root for `file`.
    pub fn project_root(&self, file: &str) -> Option<String> {
        let normalized = normalize_identity(file);
        let segments: Vec<&str> = normalized.split('/').collect();
        let (root, _) = self.split_at_marker(&segments)?;
        Some(root.join("/"))
    }

    /// Inverse of [`PathMapper::module_path`] for a given project root.
    pub fn file_for_module(&self, project_root: &str, module_path: &str) -> String {
        let root = normalize_identity(project_root);
        let mut out = String::with_capacity(root.len() + module_path.len() + 32);
        if root != "/" {
            out.push_str(&root);
        }
        out.push('/');
        out.push_str(&self.source_root_marker);
        for part in module_path.split('.').filter(|part| !part.is_empty()) {
            out.push('/');
            out.push_str(part);
        }
        out.push('/');
        out.push_str(&self.entry_filename);
        out
    }
}

/// True when `source` names the reserved console source.
pub fn is_console_source(name: Option<&str>, path: Option<&str>, reference: Option<i64>) -> bool {
    name == Some(CONSOLE_SOURCE_NAME)
        || path == Some(CONSOLE_SOURCE_NAME)
        || reference == Some(CONSOLE_SOURCE_REFERENCE)
}
