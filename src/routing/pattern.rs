//! Route pattern compilation.
//!
//! # Responsibilities
//! - Validate raw pattern strings at registration time
//! - Compile parameterized segments (`:slug`, `:file`) to anchored regexes
//! - Record depth and literal prefix for priority ordering
//!
//! # Design Decisions
//! - Pure-literal patterns never touch the regex engine; they match by
//!   string comparison with a segment-boundary check
//! - Regexes are compiled once at registration, never per request
//! - `:file` is only legal as the final segment of an exact route

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::routing::route::RouteError;

/// Parameterized segment matching one non-empty path segment.
pub const PARAM_SLUG: &str = ":slug";
/// Parameterized segment matching a filename with extension.
pub const PARAM_FILE: &str = ":file";

const RE_SLUG: &str = "([^/]+)";
const RE_FILE: &str = r"([a-z\d\-_]+\.[a-z]{1,4})";

/// Allowed characters in a literal pattern segment.
fn literal_segment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\p{L}\d.\-_]*$").expect("literal segment regex"))
}

/// A compiled route pattern.
///
/// Holds everything the match loop and the priority sort need: the
/// normalized pattern string, exact/prefix semantics, segment depth, the
/// literal prefix (text before the first parameter), and the compiled
/// regex when the pattern carries parameters.
#[derive(Debug)]
pub struct RoutePattern {
    pattern: String,
    exact: bool,
    depth: usize,
    literal_prefix: String,
    has_params: bool,
    regex: Option<Regex>,
}

impl RoutePattern {
    /// Validate and compile a raw pattern string.
    pub fn parse(raw: &str, exact: bool) -> Result<Self, RouteError> {
        if raw.is_empty() {
            return Err(RouteError::EmptyPattern);
        }
        if !raw.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash(raw.to_string()));
        }

        let pattern = normalize_pattern(raw);
        if pattern == "/" {
            return Ok(Self {
                literal_prefix: pattern.clone(),
                pattern,
                exact,
                depth: 0,
                has_params: false,
                regex: None,
            });
        }

        let segments: Vec<&str> = pattern[1..].split('/').collect();
        let depth = segments.len();

        let mut re = String::from("^");
        let mut literal_prefix = String::new();
        let mut has_params = false;

        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(RouteError::EmptySegment(pattern.clone()));
            }

            if segment.starts_with(':') {
                has_params = true;
                match *segment {
                    PARAM_SLUG => {
                        re.push('/');
                        re.push_str(RE_SLUG);
                    }
                    PARAM_FILE => {
                        if !exact || i != depth - 1 {
                            return Err(RouteError::FileNotLast(pattern.clone()));
                        }
                        re.push('/');
                        re.push_str(RE_FILE);
                    }
                    _ => return Err(RouteError::InvalidParameter(segment.to_string())),
                }
            } else {
                if !literal_segment().is_match(segment) {
                    return Err(RouteError::InvalidSegmentChars {
                        segment: segment.to_string(),
                        pattern: pattern.clone(),
                    });
                }
                re.push('/');
                re.push_str(&regex::escape(segment));
                if !has_params {
                    literal_prefix.push('/');
                    literal_prefix.push_str(segment);
                }
            }
        }

        let regex = if has_params {
            if exact {
                re.push('$');
            }
            Some(Regex::new(&re)?)
        } else {
            literal_prefix = pattern.clone();
            None
        };

        Ok(Self {
            pattern,
            exact,
            depth,
            literal_prefix,
            has_params,
            regex,
        })
    }

    /// The normalized pattern string (trailing slashes stripped).
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn has_params(&self) -> bool {
        self.has_params
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Literal text before the first parameterized segment; the whole
    /// pattern when no parameters are present. Drives priority ordering.
    pub fn literal_prefix(&self) -> &str {
        &self.literal_prefix
    }

    /// Match a normalized request path.
    ///
    /// Returns the captured path slugs on a structural match (empty for
    /// literal patterns), `None` otherwise. Prefix patterns only match on
    /// a segment boundary: `/get` matches `/get` and `/get/x`, never
    /// `/get-more`.
    pub fn matches(&self, path: &str) -> Option<Vec<String>> {
        if let Some(regex) = &self.regex {
            return regex.captures(path).map(|caps| {
                caps.iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str().to_string())
                    .collect()
            });
        }

        if self.exact {
            return (path == self.pattern).then(Vec::new);
        }

        if self.pattern == "/" {
            return Some(Vec::new());
        }

        match path.strip_prefix(self.pattern.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Some(Vec::new()),
            _ => None,
        }
    }
}

impl fmt::Display for RoutePattern {
    /// `=`-prefixed for exact patterns, space-prefixed for prefix
    /// patterns; used by logs and the priority-order tests.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.exact { '=' } else { ' ' }, self.pattern)
    }
}

/// Strip trailing slashes from a pattern, preserving the root.
fn normalize_pattern(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Strip trailing slashes from a request path, preserving the root.
pub fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}
