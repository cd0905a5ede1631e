//! Feature path expressions.
//!
//! A path is a dotted list of segments. Brackets and union selectors form
//! segments of their own, with or without a preceding dot:
//!
//! | Segment         | Meaning                                   |
//! |-----------------|-------------------------------------------|
//! | `name`          | record field                              |
//! | `[*]`           | every array element                       |
//! | `[3]`           | one array element                         |
//! | `['key']`       | one map value                             |
//! | `[lhs=rhs]`     | array elements where `lhs` equals `rhs`   |
//! | `:type`         | union branch of the given kind            |
//!
//! Filter sides are quoted constants (`'Carl'`), paths relative to the
//! filtered array's elements (`name.first`), or absolute paths (`@a.b`).

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ParseError;
use crate::tensor::DataType;

/// Depth limit for filters whose operands are themselves filtered paths.
const MAX_FILTER_NESTING: usize = 16;

struct SegmentPatterns {
    array_all: Regex,
    array_index: Regex,
    map_key: Regex,
    filter: Regex,
    union_branch: Regex,
    attribute: Regex,
}

static PATTERNS: LazyLock<SegmentPatterns> = LazyLock::new(|| SegmentPatterns {
    array_all: Regex::new(r"^\[\*\]$").expect("array-all pattern"),
    array_index: Regex::new(r"^\[(\d+)\]$").expect("array-index pattern"),
    map_key: Regex::new(r#"^\[(?:'([^']*)'|"([^"]*)")\]$"#).expect("map-key pattern"),
    filter: Regex::new(r"^\[(.+)\]$").expect("filter pattern"),
    union_branch: Regex::new(r"^:([A-Za-z_][A-Za-z0-9_.]*)$").expect("union pattern"),
    attribute: Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("attribute pattern"),
});

/// One side of an array filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FilterSide {
    Constant(String),
    /// Path below the filtered array's elements
    Relative(String),
    /// Path from the record root
    Absolute(String),
}

impl FilterSide {
    fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(constant) = unquote(text) {
            return FilterSide::Constant(constant.to_string());
        }
        match text.strip_prefix('@') {
            Some(absolute) => FilterSide::Absolute(absolute.to_string()),
            None => FilterSide::Relative(text.to_string()),
        }
    }

    /// Path of the feature this side reads, for a filter applied to the
    /// array at `array_path`.
    pub(crate) fn dependency(&self, array_path: &str) -> Option<String> {
        match self {
            FilterSide::Constant(_) => None,
            FilterSide::Relative(rel) => Some(format!("{}[*].{}", array_path, rel)),
            FilterSide::Absolute(abs) => Some(abs.clone()),
        }
    }
}

/// Which filter sides are constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LhsConstant,
    RhsConstant,
    NeitherConstant,
}

/// A classified path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Attribute(String),
    ArrayAll,
    ArrayIndex(usize),
    MapKey(String),
    ArrayFilter {
        lhs: FilterSide,
        rhs: FilterSide,
        kind: FilterKind,
    },
    UnionBranch(String),
}

impl Segment {
    pub(crate) fn classify(key: &str, text: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidSegment {
            key: key.to_string(),
            segment: text.to_string(),
        };
        let p = &*PATTERNS;

        if p.array_all.is_match(text) {
            return Ok(Segment::ArrayAll);
        }
        if let Some(caps) = p.array_index.captures(text) {
            let index = caps[1].parse().map_err(|_| invalid())?;
            return Ok(Segment::ArrayIndex(index));
        }
        if let Some(caps) = p.map_key.captures(text) {
            let map_key = caps.get(1).or_else(|| caps.get(2)).ok_or_else(invalid)?;
            return Ok(Segment::MapKey(map_key.as_str().to_string()));
        }
        if let Some(caps) = p.filter.captures(text) {
            let body = caps.get(1).map_or("", |m| m.as_str());
            let (lhs, rhs) = split_filter(body).ok_or_else(invalid)?;
            let lhs = FilterSide::parse(lhs);
            let rhs = FilterSide::parse(rhs);
            let kind = match (&lhs, &rhs) {
                (FilterSide::Constant(_), FilterSide::Constant(_)) => return Err(invalid()),
                (FilterSide::Constant(_), _) => FilterKind::LhsConstant,
                (_, FilterSide::Constant(_)) => FilterKind::RhsConstant,
                _ => FilterKind::NeitherConstant,
            };
            return Ok(Segment::ArrayFilter { lhs, rhs, kind });
        }
        if let Some(caps) = p.union_branch.captures(text) {
            return Ok(Segment::UnionBranch(caps[1].to_string()));
        }
        if p.attribute.is_match(text) {
            return Ok(Segment::Attribute(text.to_string()));
        }
        Err(invalid())
    }
}

/// Split a filter body at its first `=` outside quotes.
fn split_filter(body: &str) -> Option<(&str, &str)> {
    let mut quote = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '=') => {
                let (lhs, rhs) = (&body[..i], &body[i + 1..]);
                return (!lhs.is_empty() && !rhs.is_empty()).then_some((lhs, rhs));
            }
            _ => {}
        }
    }
    None
}

fn unquote(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return Some(&text[1..text.len() - 1]);
        }
    }
    None
}

/// Split a path into segment texts.
///
/// Dots inside brackets or quotes do not split. A bracket or `:` outside
/// brackets starts a new segment.
pub(crate) fn split_path(key: &str, path: &str) -> Result<Vec<String>, ParseError> {
    let invalid = |segment: &str| ParseError::InvalidSegment {
        key: key.to_string(),
        segment: segment.to_string(),
    };

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    // Whether a segment just ended without a dot (after `]`)
    let mut closed = false;

    for c in path.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' if depth > 0 => {
                quote = Some(c);
                current.push(c);
            }
            '[' => {
                if depth == 0 && !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                depth += 1;
                current.push(c);
            }
            ']' => {
                if depth == 0 {
                    return Err(invalid(path));
                }
                depth -= 1;
                current.push(c);
                if depth == 0 {
                    segments.push(std::mem::take(&mut current));
                    closed = true;
                    continue;
                }
            }
            ':' if depth == 0 => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                current.push(c);
            }
            '.' if depth == 0 => {
                if current.is_empty() {
                    if !closed {
                        return Err(invalid(path));
                    }
                } else {
                    segments.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
        closed = false;
    }

    if depth != 0 || quote.is_some() {
        return Err(invalid(path));
    }
    if !current.is_empty() {
        segments.push(current);
    } else if segments.is_empty() || !closed {
        return Err(invalid(path));
    }
    Ok(segments)
}

/// Rebuild the user-visible path from segment texts.
pub(crate) fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::new();
    for segment in segments {
        let segment = segment.as_ref();
        if !out.is_empty() && !segment.starts_with('[') && !segment.starts_with(':') {
            out.push('.');
        }
        out.push_str(segment);
    }
    out
}

// ============================================================================
// Key preparation
// ============================================================================

/// One feature key ready for prefix-tree insertion.
#[derive(Debug, Clone)]
pub(crate) struct PreparedKey {
    /// Key under which the value store is registered
    pub store_key: String,
    /// Canonical path with any namespace prefix removed
    pub path: String,
    pub segments: Vec<(String, Segment)>,
    pub dtype: DataType,
}

/// Validated keys in parse order plus the path-to-store-key mapping.
#[derive(Debug)]
pub(crate) struct PreparedKeys {
    pub keys: Vec<PreparedKey>,
    pub store_keys: HashMap<String, String>,
}

fn prepare(store_key: &str, path: &str, dtype: DataType) -> Result<PreparedKey, ParseError> {
    let texts = split_path(store_key, path)?;
    let segments = texts
        .iter()
        .map(|t| Segment::classify(store_key, t).map(|s| (t.clone(), s)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PreparedKey {
        store_key: store_key.to_string(),
        path: join_segments(&texts),
        segments,
        dtype,
    })
}

/// Validate keys and order them so that every filter's operand features are
/// parsed before the filter.
///
/// Operand features are prepended in discovery order. An operand that is
/// also a user key takes that key's position and type; others become
/// string-typed auxiliary keys. Filtered keys follow the operands and the
/// remaining keys come last, so a filter branch always sits right after the
/// `[*]` branch of its array.
pub(crate) fn prepare_keys(
    namespace: &str,
    keys: &[(String, DataType)],
) -> Result<PreparedKeys, ParseError> {
    let prefix = format!("{}.", namespace);
    let mut user_keys = Vec::with_capacity(keys.len());
    let mut seen = HashSet::new();
    for (key, dtype) in keys {
        let path = key.strip_prefix(&prefix).unwrap_or(key);
        let prepared = prepare(key, path, *dtype)?;
        if !seen.insert(prepared.path.clone()) {
            return Err(ParseError::DuplicateKey(key.clone()));
        }
        user_keys.push(prepared);
    }

    let mut dependencies: Vec<String> = Vec::new();
    for key in &user_keys {
        collect_dependencies(&key.store_key, &key.segments, &mut dependencies, 0)?;
    }

    let by_path: HashMap<&str, &PreparedKey> =
        user_keys.iter().map(|k| (k.path.as_str(), k)).collect();
    let mut ordered = Vec::with_capacity(dependencies.len() + user_keys.len());
    let mut placed = HashSet::new();
    for dep in &dependencies {
        let key = match by_path.get(dep.as_str()) {
            Some(user) => (*user).clone(),
            None => prepare(dep, dep, DataType::String)?,
        };
        placed.insert(key.path.clone());
        ordered.push(key);
    }
    let (filtered, plain): (Vec<&PreparedKey>, Vec<&PreparedKey>) = user_keys
        .iter()
        .filter(|k| !placed.contains(&k.path))
        .partition(|k| has_filter(&k.segments));
    ordered.extend(filtered.into_iter().chain(plain).cloned());

    let store_keys = ordered
        .iter()
        .map(|k| (k.path.clone(), k.store_key.clone()))
        .collect();
    Ok(PreparedKeys {
        keys: ordered,
        store_keys,
    })
}

fn has_filter(segments: &[(String, Segment)]) -> bool {
    segments
        .iter()
        .any(|(_, s)| matches!(s, Segment::ArrayFilter { .. }))
}

fn collect_dependencies(
    key: &str,
    segments: &[(String, Segment)],
    out: &mut Vec<String>,
    nesting: usize,
) -> Result<(), ParseError> {
    for (i, (text, segment)) in segments.iter().enumerate() {
        let Segment::ArrayFilter { lhs, rhs, .. } = segment else {
            continue;
        };
        if nesting >= MAX_FILTER_NESTING {
            return Err(ParseError::InvalidSegment {
                key: key.to_string(),
                segment: text.clone(),
            });
        }
        let array_path = join_segments(
            &segments[..i]
                .iter()
                .map(|(t, _)| t.as_str())
                .collect::<Vec<_>>(),
        );
        for side in [lhs, rhs] {
            let Some(dep) = side.dependency(&array_path) else {
                continue;
            };
            let dep = prepare(key, &dep, DataType::String)?;
            collect_dependencies(key, &dep.segments, out, nesting + 1)?;
            if !out.contains(&dep.path) {
                out.push(dep.path);
            }
        }
    }
    Ok(())
}
