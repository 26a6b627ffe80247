//! Restricted JSONPath used by workload resource mappings.
//!
//! Supports:
//! - `$.a.b`, `.a.b` and `a.b` (field access)
//! - `a[0]` (array index)
//! - `a[*]` (every element of an array)
//! - `a['b.c']` and `a["b.c"]` (field names holding dots or brackets)
//!
//! Filters, slices and recursive descent are rejected.

use serde_json::{Map, Value};
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::BindingError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, BindingError> {
        let invalid = |detail: &str| BindingError::InvalidMapping {
            path: path.to_string(),
            detail: detail.to_string(),
        };

        let rest = path.trim();
        let rest = rest.strip_prefix('$').unwrap_or(rest);
        if rest.is_empty() {
            return Err(invalid("path selects nothing"));
        }

        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();
        // A leading field may omit its dot, as in `spec.template`
        let mut expect_field = !rest.starts_with('.') && !rest.starts_with('[');

        loop {
            if expect_field {
                let mut field = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '.' || ch == '[' {
                        break;
                    }
                    field.push(ch);
                    chars.next();
                }
                if field.is_empty() {
                    return Err(invalid("empty field name"));
                }
                if field.contains([']', '*', '?', '@']) {
                    return Err(invalid("unsupported characters in field name"));
                }
                segments.push(Segment::Field(field));
                expect_field = false;
            }

            match chars.next() {
                None => break,
                Some('.') => {
                    if chars.peek() == Some(&'.') {
                        return Err(invalid("recursive descent is not supported"));
                    }
                    expect_field = true;
                }
                Some('[') => {
                    let mut inner = String::new();
                    let mut quote = None;
                    loop {
                        match chars.next() {
                            Some(ch) if quote == Some(ch) => {
                                quote = None;
                                inner.push(ch);
                            }
                            Some(ch @ ('\'' | '"')) if quote.is_none() => {
                                quote = Some(ch);
                                inner.push(ch);
                            }
                            Some(']') if quote.is_none() => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(invalid("unterminated bracket")),
                        }
                    }
                    let segment = bracket_segment(inner.trim())
                        .ok_or_else(|| invalid("only [*], [N] and ['name'] are supported inside brackets"))?;
                    segments.push(segment);
                }
                Some(_) => return Err(invalid("unexpected character")),
            }
        }

        Ok(FieldPath { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Append `other` to this path
    pub fn join(&self, other: &FieldPath) -> FieldPath {
        FieldPath {
            segments: self.segments.iter().chain(other.segments.iter()).cloned().collect(),
        }
    }

    /// Expand wildcards against `root`, yielding one concrete path per
    /// existing node, in document order.
    pub fn expand(&self, root: &Value) -> Vec<FieldPath> {
        let mut found = Vec::new();
        expand_into(root, &self.segments, Vec::new(), &mut found);
        found
    }

    /// Read the node at a concrete path
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, |current, segment| match segment {
            Segment::Field(name) => current.get(name),
            Segment::Index(index) => current.get(*index),
            Segment::Wildcard => None,
        })
    }

    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        self.segments.iter().try_fold(root, |current, segment| match segment {
            Segment::Field(name) => current.get_mut(name),
            Segment::Index(index) => current.get_mut(*index),
            Segment::Wildcard => None,
        })
    }

    /// Return the list at this concrete path, creating it and any missing
    /// intermediate objects. `None` when an existing node has the wrong type
    /// or an index is out of range.
    pub fn ensure_list<'a>(&self, root: &'a mut Value) -> Option<&'a mut Vec<Value>> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = root;

        for (position, segment) in parents.iter().enumerate() {
            current = match segment {
                Segment::Field(name) => {
                    if current.is_null() {
                        *current = Value::Object(Map::new());
                    }
                    let next_is_index = matches!(parents.get(position + 1).unwrap_or(last), Segment::Index(_));
                    current.as_object_mut()?
                        .entry(name.clone())
                        .or_insert_with(|| if next_is_index { Value::Array(Vec::new()) } else { Value::Object(Map::new()) })
                }
                Segment::Index(index) => current.as_array_mut()?.get_mut(*index)?,
                Segment::Wildcard => return None,
            };
        }

        let Segment::Field(name) = last else {
            return None;
        };
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let slot = current.as_object_mut()?
            .entry(name.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if slot.is_null() {
            *slot = Value::Array(Vec::new());
        }
        slot.as_array_mut()
    }
}

fn expand_into(current: &Value, remaining: &[Segment], prefix: Vec<Segment>, found: &mut Vec<FieldPath>) {
    let Some((segment, rest)) = remaining.split_first() else {
        found.push(FieldPath { segments: prefix });
        return;
    };

    match segment {
        Segment::Field(name) => {
            if let Some(next) = current.get(name) {
                let mut prefix = prefix;
                prefix.push(segment.clone());
                expand_into(next, rest, prefix, found);
            }
        }
        Segment::Index(index) => {
            if let Some(next) = current.get(*index) {
                let mut prefix = prefix;
                prefix.push(segment.clone());
                expand_into(next, rest, prefix, found);
            }
        }
        Segment::Wildcard => {
            if let Some(items) = current.as_array() {
                for (index, item) in items.iter().enumerate() {
                    let mut prefix = prefix.clone();
                    prefix.push(Segment::Index(index));
                    expand_into(item, rest, prefix, found);
                }
            }
        }
    }
}

fn bracket_segment(inner: &str) -> Option<Segment> {
    if inner == "*" {
        return Some(Segment::Wildcard);
    }
    for quote in ['\'', '"'] {
        if let Some(name) = inner.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote)) {
            return (!name.is_empty() && !name.contains(quote)).then(|| Segment::Field(name.to_string()));
        }
    }
    inner.parse::<usize>().ok().map(Segment::Index)
}

fn is_plain_field(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', '[', ']', '\'', '"', '*', '?', '@']) && !name.contains(char::is_whitespace)
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for segment in &self.segments {
            match segment {
                Segment::Field(name) if is_plain_field(name) => write!(f, ".{}", name)?,
                Segment::Field(name) if name.contains('\'') => write!(f, "[\"{}\"]", name)?,
                Segment::Field(name) => write!(f, "['{}']", name)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
                Segment::Wildcard => write!(f, "[*]")?,
            }
        }
        Ok(())
    }
}
