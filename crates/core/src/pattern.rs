//! Path patterns declared by blob-triggered functions.
//!
//! A pattern is `container/blob-template`. The container part is literal;
//! the blob template may contain `{parameter}` placeholders which match one
//! or more characters (including `/`) and are returned as bindings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::blob::BlobIdentity;
use crate::error::CoreError;

/// Parameter values captured by a successful match.
pub type PathBindings = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct BlobPathPattern {
    raw: String,
    container: String,
    parameters: Vec<String>,
    matcher: Regex,
}

impl BlobPathPattern {
    /// Parse a pattern such as `input/{name}.csv`.
    pub fn parse(pattern: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidPattern {
            pattern: pattern.to_owned(),
            reason: reason.to_owned(),
        };

        let (container, template) = pattern
            .split_once('/')
            .ok_or_else(|| invalid("expected 'container/blob'"))?;

        if container.is_empty() {
            return Err(invalid("container name is empty"));
        }
        if container.contains(['{', '}']) {
            return Err(invalid("container name cannot contain parameters"));
        }
        if template.is_empty() {
            return Err(invalid("blob name is empty"));
        }

        let mut expr = String::from("^");
        let mut parameters = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find(['{', '}']) {
            if rest.as_bytes()[open] == b'}' {
                return Err(invalid("unmatched '}'"));
            }
            expr.push_str(&regex::escape(&rest[..open]));

            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unmatched '{'"))?;
            let name = &after[..close];

            if !is_identifier(name) {
                return Err(invalid(&format!("invalid parameter name '{name}'")));
            }
            if parameters.iter().any(|p| p == name) {
                return Err(invalid(&format!("duplicate parameter '{name}'")));
            }

            expr.push_str(&format!("(?P<{name}>.+?)"));
            parameters.push(name.to_owned());
            rest = &after[close + 1..];
        }
        expr.push_str(&regex::escape(rest));
        expr.push('$');

        let matcher = Regex::new(&expr).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            raw: pattern.to_owned(),
            container: container.to_owned(),
            parameters,
            matcher,
        })
    }

    /// The literal container this pattern watches.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Parameter names in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a concrete blob against the pattern, returning captured
    /// parameters or `None` when it does not match.
    #[must_use]
    pub fn matches(&self, blob: &BlobIdentity) -> Option<PathBindings> {
        if blob.container != self.container {
            return None;
        }

        let captures = self.matcher.captures(&blob.name)?;
        let bindings = self
            .parameters
            .iter()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.clone(), m.as_str().to_owned()))
            })
            .collect();
        Some(bindings)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl PartialEq for BlobPathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for BlobPathPattern {}

impl fmt::Display for BlobPathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for BlobPathPattern {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
