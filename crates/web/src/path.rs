//! Path pattern compilation and matching.
//!
//! A route declares its path criteria in one of two mutually exclusive ways:
//!
//! - a *pattern*: literal segments, `:name` parameter segments and an
//!   optional trailing `*` wildcard ("this prefix and everything after"),
//!   e.g. `/users/:id/posts/*`
//! - a raw *regex*, whose named capture groups become path parameters
//!
//! Compilation happens exactly once, when the criteria is set on the route;
//! matching a request afterwards is a lookup against the compiled form.
//! Matching is case-sensitive; a trailing `/` on the request path is
//! equivalent to its absence for non-wildcard patterns.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::error::RouteError;

static PARAM_NAME: Lazy<Regex> = Lazy::new(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// The result of a successful path match.
#[derive(Debug, Default, Clone)]
pub struct PathMatch {
    params: HashMap<String, String>,
}

impl PathMatch {
    fn empty() -> Self {
        Self::default()
    }

    /// Extracted (percent-decoded) path parameters.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn into_params(self) -> HashMap<String, String> {
        self.params
    }
}

/// A compiled path criteria.
#[derive(Debug)]
pub struct PathMatcher {
    kind: MatcherKind,
}

#[derive(Debug)]
enum MatcherKind {
    /// `*` or `/*`: every path.
    Any,
    /// Literal path, no parameters, no wildcard.
    Exact { path: String },
    /// Literal prefix declared with a trailing `*`, e.g. `/static/*`.
    /// Matches the prefix itself and anything below it.
    Prefix { prefix: String },
    /// Pattern with `:name` segments, compiled to an anchored regex.
    Pattern { regex: Regex, params: Vec<String> },
    /// User-supplied regex; named capture groups are the parameters.
    UserRegex { regex: Regex, params: Vec<String> },
}

impl PathMatcher {
    /// Compiles a `:name`/`*` style pattern.
    pub fn pattern(spec: &str) -> Result<Self, RouteError> {
        if spec == "*" || spec == "/*" {
            return Ok(Self { kind: MatcherKind::Any });
        }
        if !spec.starts_with('/') {
            return Err(RouteError::invalid_path(spec));
        }

        let (body, wildcard) = match spec.strip_suffix("/*") {
            Some(body) => (body, true),
            None => (spec, false),
        };

        if !body.contains(':') {
            let kind = if wildcard {
                MatcherKind::Prefix { prefix: body.to_string() }
            } else {
                MatcherKind::Exact { path: strip_trailing_slash(body).to_string() }
            };
            return Ok(Self { kind });
        }

        let mut source = String::from("^");
        let mut params: Vec<String> = Vec::new();
        for segment in strip_trailing_slash(body).split('/').skip(1) {
            source.push('/');
            match segment.strip_prefix(':') {
                Some(name) => {
                    if !PARAM_NAME.is_match(name) {
                        return Err(RouteError::invalid_param_name(name));
                    }
                    if params.iter().any(|p| p == name) {
                        return Err(RouteError::duplicate_param_name(name));
                    }
                    source.push_str(&format!("(?<{name}>[^/]+)"));
                    params.push(name.to_string());
                }
                None => source.push_str(&regex::escape(segment)),
            }
        }
        if wildcard {
            source.push_str("(?:/.*)?$");
        } else {
            source.push_str("/?$");
        }

        // the source is built from escaped segments, compilation cannot fail
        let regex = Regex::new(&source).map_err(|e| RouteError::invalid_regex(spec.to_string(), e.to_string()))?;
        Ok(Self { kind: MatcherKind::Pattern { regex, params } })
    }

    /// Compiles a raw regex criteria.
    pub fn regex(source: &str) -> Result<Self, RouteError> {
        let regex =
            Regex::new(source).map_err(|e| RouteError::invalid_regex(source.to_string(), e.to_string()))?;
        let mut params = Vec::new();
        for name in regex.capture_names().flatten() {
            if !PARAM_NAME.is_match(name) {
                return Err(RouteError::invalid_param_name(name));
            }
            params.push(name.to_string());
        }
        Ok(Self { kind: MatcherKind::UserRegex { regex, params } })
    }

    /// Tests a request path, extracting named parameters on success.
    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        match &self.kind {
            MatcherKind::Any => Some(PathMatch::empty()),
            MatcherKind::Exact { path: exact } => {
                (strip_trailing_slash(path) == exact.as_str()).then(PathMatch::empty)
            }
            MatcherKind::Prefix { prefix } => {
                let matched = strip_trailing_slash(path) == prefix.as_str()
                    || path.starts_with(&format!("{prefix}/"));
                matched.then(PathMatch::empty)
            }
            MatcherKind::Pattern { regex, params } => {
                let captures = regex.captures(path)?;
                let mut extracted = HashMap::with_capacity(params.len());
                for name in params {
                    if let Some(value) = captures.name(name) {
                        extracted.insert(name.clone(), decode_param(value.as_str()));
                    }
                }
                Some(PathMatch { params: extracted })
            }
            MatcherKind::UserRegex { regex, params } => {
                let captures = regex.captures(path)?;
                let mut extracted = HashMap::with_capacity(params.len());
                for name in params {
                    if let Some(value) = captures.name(name) {
                        extracted.insert(name.clone(), decode_param(value.as_str()));
                    }
                }
                Some(PathMatch { params: extracted })
            }
        }
    }
}

/// Percent-decodes an extracted parameter, falling back to the raw value
/// when the escapes do not form valid utf-8.
fn decode_param(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8().map(|cow| cow.into_owned()).unwrap_or_else(|_| raw.to_string())
}

fn strip_trailing_slash(path: &str) -> &str {
    if path.len() > 1 { path.strip_suffix('/').unwrap_or(path) } else { path }
}

/// Normalizes a request path: collapses duplicate slashes and resolves
/// `.`/`..` segments without ever escaping the root.
pub fn normalize_path(path: &str) -> String {
    if !path.starts_with('/') {
        return normalize_path(&format!("/{path}"));
    }

    let trailing_slash = path.len() > 1 && path.ends_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut normalized = String::new();
    for segment in segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if trailing_slash {
        normalized.push('/');
    }
    normalized
}
