//! Field path expressions for addressing values inside an item's JSON tree.
//!
//! Several type schemas address nested values with dotted, bracketed
//! paths such as `contentAreas[].content` - each element of the
//! `contentAreas` array is visited independently. This module localizes
//! that one piece of stringly-typed logic behind an explicit expression
//! type with a small recursive walker, instead of ad hoc string-keyed
//! lookups scattered through the pipeline.
//!
//! Grammar: segments separated by `.`; a segment is a field name,
//! optionally suffixed with `[]` to fan out over every element of an
//! array-valued field.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::core::MetasyncError;

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Descend into an object field.
    Field(String),
    /// Descend into an object field holding an array, visiting every element.
    ArrayWildcard(String),
}

/// A parsed field path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// The parsed segments, in order.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Collect immutable references to every value the path addresses.
    ///
    /// A path that dead-ends (missing field, non-array under a wildcard)
    /// simply contributes no values; absence is not an error here.
    pub fn values<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut out = Vec::new();
        collect(&self.segments, root, &mut out);
        out
    }

    /// Apply `f` to every value the path addresses, in place.
    pub fn for_each_value_mut(&self, root: &mut Value, f: &mut dyn FnMut(&mut Value)) {
        walk_mut(&self.segments, root, f);
    }
}

fn collect<'a>(segments: &[PathSegment], value: &'a Value, out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match head {
        PathSegment::Field(name) => {
            if let Some(child) = value.get(name) {
                collect(rest, child, out);
            }
        }
        PathSegment::ArrayWildcard(name) => {
            if let Some(Value::Array(elements)) = value.get(name) {
                for element in elements {
                    collect(rest, element, out);
                }
            }
        }
    }
}

fn walk_mut(segments: &[PathSegment], value: &mut Value, f: &mut dyn FnMut(&mut Value)) {
    let Some((head, rest)) = segments.split_first() else {
        f(value);
        return;
    };
    match head {
        PathSegment::Field(name) => {
            if let Some(child) = value.get_mut(name) {
                walk_mut(rest, child, f);
            }
        }
        PathSegment::ArrayWildcard(name) => {
            if let Some(Value::Array(elements)) = value.get_mut(name) {
                for element in elements {
                    walk_mut(rest, element, f);
                }
            }
        }
    }
}

impl FromStr for FieldPath {
    type Err = MetasyncError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        if expr.is_empty() {
            return Err(MetasyncError::InvalidFieldPath {
                expr: expr.to_string(),
                reason: "empty path".into(),
            });
        }
        let mut segments = Vec::new();
        for raw in expr.split('.') {
            let segment = if let Some(name) = raw.strip_suffix("[]") {
                PathSegment::ArrayWildcard(name.to_string())
            } else {
                PathSegment::Field(raw.to_string())
            };
            let name = match &segment {
                PathSegment::Field(n) | PathSegment::ArrayWildcard(n) => n,
            };
            if name.is_empty() || name.contains(['[', ']']) {
                return Err(MetasyncError::InvalidFieldPath {
                    expr: expr.to_string(),
                    reason: format!("bad segment '{raw}'"),
                });
            }
            segments.push(segment);
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            match segment {
                PathSegment::Field(name) => write!(f, "{name}")?,
                PathSegment::ArrayWildcard(name) => write!(f, "{name}[]")?,
            }
        }
        Ok(())
    }
}
