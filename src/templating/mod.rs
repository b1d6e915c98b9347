//! Market substitution: converting concrete items to portable templates
//! and back.
//!
//! A "market" is a named set of environment-specific literals (domains,
//! account ids, prefix strings). [`build_template`] generalizes a
//! concrete item by substituting known literals with `{{name}}`
//! placeholders on every field the type schema marks templatable;
//! [`build_definition`] instantiates a template for a target market and
//! hard-stops on any placeholder the variable set cannot fill - a
//! literally-templated string must never reach the remote environment.
//!
//! Both directions are pure transforms over the item's JSON value tree;
//! nested paths such as `views.html.content` or `contentAreas[].content`
//! are visited element by element.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::core::{MetasyncError, Result};
use crate::item::MetadataItem;
use crate::path::FieldPath;
use crate::registry::TypeRegistry;

/// Mapping from placeholder name to the market's literal value.
pub type TemplateVariableSet = BTreeMap<String, Value>;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("valid regex"));

/// Generalize a concrete item into a portable template.
///
/// For every field the schema marks `templatable`, any occurrence of a
/// variable's literal value becomes `{{name}}`. Longer literals win over
/// shorter ones so overlapping values substitute deterministically.
/// Literals matching no variable are left as-is; they are taken to be
/// environment-agnostic.
pub fn build_template(
    registry: &TypeRegistry,
    item: &MetadataItem,
    variables: &TemplateVariableSet,
) -> Result<MetadataItem> {
    let def = registry.get(&item.type_name)?;

    // Longest string literal first; non-string variables only ever match
    // a whole value.
    let mut by_length: Vec<(&String, &Value)> = variables.iter().collect();
    by_length.sort_by_key(|(_, v)| std::cmp::Reverse(v.as_str().map_or(0, str::len)));

    let mut tree = item.to_value();
    for (field_expr, rule) in &def.fields {
        if !rule.templatable {
            continue;
        }
        let path: FieldPath = field_expr.parse()?;
        path.for_each_value_mut(&mut tree, &mut |value| {
            substitute_forward(value, &by_length);
        });
    }

    let Value::Object(fields) = tree else {
        unreachable!("item field map serializes to an object");
    };
    Ok(MetadataItem::new(item.type_name.clone(), item.key.clone(), fields))
}

fn substitute_forward(value: &mut Value, variables: &[(&String, &Value)]) {
    // Whole-value match first, covering non-string literals (numeric
    // flags, booleans) and exact string matches alike.
    for (name, literal) in variables {
        if *value == **literal {
            *value = Value::String(format!("{{{{{name}}}}}"));
            return;
        }
    }
    if let Value::String(s) = value {
        for (name, literal) in variables {
            if let Some(literal) = literal.as_str() {
                if !literal.is_empty() && s.contains(literal) {
                    *s = s.replace(literal, &format!("{{{{{name}}}}}"));
                }
            }
        }
    }
}

/// Instantiate a template for a concrete market.
///
/// Every `{{name}}` token is replaced with the variable set's literal.
/// If any `{{...}}` remains after substitution the item fails with
/// [`MetasyncError::MissingVariable`] naming every unresolved token.
pub fn build_definition(
    item: &MetadataItem,
    variables: &TemplateVariableSet,
) -> Result<MetadataItem> {
    let mut tree = item.to_value();
    let mut unresolved = BTreeSet::new();
    substitute_reverse(&mut tree, variables, &mut unresolved);

    if !unresolved.is_empty() {
        return Err(MetasyncError::MissingVariable {
            tokens: unresolved.into_iter().collect(),
        });
    }

    let Value::Object(fields) = tree else {
        unreachable!("item field map serializes to an object");
    };
    Ok(MetadataItem::new(item.type_name.clone(), item.key.clone(), fields))
}

fn substitute_reverse(
    value: &mut Value,
    variables: &TemplateVariableSet,
    unresolved: &mut BTreeSet<String>,
) {
    match value {
        Value::String(s) => {
            // A string that is exactly one token takes the variable's
            // typed value, restoring non-string literals.
            if let Some(captures) = PLACEHOLDER.captures(s) {
                let whole = captures.get(0).expect("match exists");
                if whole.start() == 0 && whole.end() == s.len() {
                    let name = &captures[1];
                    match variables.get(name) {
                        Some(literal) => *value = literal.clone(),
                        None => {
                            unresolved.insert(name.to_string());
                        }
                    }
                    return;
                }
            }
            let replaced = PLACEHOLDER.replace_all(s, |captures: &regex::Captures<'_>| {
                let name = &captures[1];
                match variables.get(name) {
                    Some(Value::String(literal)) => literal.clone(),
                    Some(other) => other.to_string(),
                    None => {
                        unresolved.insert(name.to_string());
                        captures[0].to_string()
                    }
                }
            });
            *s = replaced.into_owned();
        }
        Value::Array(elements) => {
            for element in elements {
                substitute_reverse(element, variables, unresolved);
            }
        }
        Value::Object(fields) => {
            for field in fields.values_mut() {
                substitute_reverse(field, variables, unresolved);
            }
        }
        _ => {}
    }
}
