//! Output selectors
//!
//! Paths such as `images[0].filename` or `text[0]` navigate a node's output
//! tree. Segments are separated by `.`; each segment is an object key followed
//! by zero or more `[index]` accessors (0-based). Every failure, including a
//! malformed path, is reported as [`SelectorNotFound`] rather than a panic.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use crate::output::FileDescriptor;

/// One step of a selector path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// Why a path did not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    InvalidSyntax(String),
    MissingKey { key: String, at: String },
    NotAnObject { key: String, at: String },
    NotAnArray { index: usize, at: String },
    IndexOutOfRange { index: usize, len: usize, at: String },
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSyntax(detail) => write!(f, "invalid path syntax: {}", detail),
            Self::MissingKey { key, at } => write!(f, "no key '{}' at {}", key, location(at)),
            Self::NotAnObject { key, at } => {
                write!(f, "cannot look up '{}': {} is not an object", key, location(at))
            }
            Self::NotAnArray { index, at } => {
                write!(f, "cannot index [{}]: {} is not an array", index, location(at))
            }
            Self::IndexOutOfRange { index, len, at } => write!(
                f,
                "index [{}] out of range: {} has {} element(s)",
                index,
                location(at),
                len
            ),
        }
    }
}

fn location(at: &str) -> String {
    if at.is_empty() {
        "the node output".to_string()
    } else {
        format!("'{}'", at)
    }
}

/// A selector path that does not exist in the tree it was applied to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("the specified path does not exist: {path} ({reason})")]
pub struct SelectorNotFound {
    pub path: String,
    pub reason: NotFoundReason,
}

/// A parsed selector path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl SelectorPath {
    pub fn parse(path: &str) -> Result<Self, SelectorNotFound> {
        let invalid = |detail: String| SelectorNotFound {
            path: path.to_string(),
            reason: NotFoundReason::InvalidSyntax(detail),
        };

        if path.is_empty() {
            return Err(invalid("empty path".to_string()));
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            parse_part(part, &mut segments).map_err(invalid)?;
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk `tree` along this path.
    pub fn resolve<'a>(&self, tree: &'a Value) -> Result<&'a Value, SelectorNotFound> {
        let mut current = tree;
        let mut at = String::new();

        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(key) => match current {
                    Value::Object(map) => map.get(key).ok_or_else(|| {
                        self.not_found(NotFoundReason::MissingKey {
                            key: key.clone(),
                            at: at.clone(),
                        })
                    })?,
                    _ => {
                        return Err(self.not_found(NotFoundReason::NotAnObject {
                            key: key.clone(),
                            at,
                        }))
                    }
                },
                PathSegment::Index(index) => match current {
                    Value::Array(items) => items.get(*index).ok_or_else(|| {
                        self.not_found(NotFoundReason::IndexOutOfRange {
                            index: *index,
                            len: items.len(),
                            at: at.clone(),
                        })
                    })?,
                    _ => {
                        return Err(self.not_found(NotFoundReason::NotAnArray {
                            index: *index,
                            at,
                        }))
                    }
                },
            };

            if matches!(segment, PathSegment::Key(_)) && !at.is_empty() {
                at.push('.');
            }
            at.push_str(&segment.to_string());
        }

        Ok(current)
    }

    fn not_found(&self, reason: NotFoundReason) -> SelectorNotFound {
        SelectorNotFound {
            path: self.raw.clone(),
            reason,
        }
    }
}

impl FromStr for SelectorPath {
    type Err = SelectorNotFound;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SelectorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// Parse manually to keep the domain free of a regex dependency.
fn parse_part(part: &str, segments: &mut Vec<PathSegment>) -> Result<(), String> {
    let (name, mut rest) = match part.find('[') {
        Some(open) => (&part[..open], &part[open..]),
        None => (part, ""),
    };

    if name.contains(']') {
        return Err(format!("unmatched ']' in '{}'", part));
    }
    if name.is_empty() && rest.is_empty() {
        return Err("empty segment".to_string());
    }
    if !name.is_empty() {
        segments.push(PathSegment::Key(name.to_string()));
    }

    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return Err(format!("unexpected '{}' after index in '{}'", rest, part));
        };
        let Some(close) = inner.find(']') else {
            return Err(format!("unclosed '[' in '{}'", part));
        };
        let digits = &inner[..close];
        let index = digits
            .parse::<usize>()
            .map_err(|_| format!("'{}' is not a valid array index", digits))?;
        segments.push(PathSegment::Index(index));
        rest = &inner[close + 1..];
    }

    Ok(())
}

/// Resolve `path` against `tree`.
pub fn resolve<'a>(tree: &'a Value, path: &str) -> Result<&'a Value, SelectorNotFound> {
    SelectorPath::parse(path)?.resolve(tree)
}

/// File descriptors a resolved value stands for.
///
/// `Some` when the value is a descriptor or a non-empty array made only of
/// descriptors; `None` when it should be returned as a raw value.
pub fn file_descriptors(value: &Value) -> Option<Vec<FileDescriptor>> {
    match value {
        Value::Array(items) if !items.is_empty() => {
            items.iter().map(FileDescriptor::from_value).collect()
        }
        Value::Array(_) => None,
        other => FileDescriptor::from_value(other).map(|file| vec![file]),
    }
}

/// Every file descriptor directly under a node's output object.
///
/// Each key is checked for a descriptor object or an array containing
/// descriptor objects; other values are skipped. Keys are visited in map order.
pub fn scan_file_descriptors(node_output: &Value) -> Vec<(String, FileDescriptor)> {
    let Value::Object(map) = node_output else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                found.extend(
                    items
                        .iter()
                        .filter_map(FileDescriptor::from_value)
                        .map(|file| (key.clone(), file)),
                );
            }
            other => {
                if let Some(file) = FileDescriptor::from_value(other) {
                    found.push((key.clone(), file));
                }
            }
        }
    }
    found
}
