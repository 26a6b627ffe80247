//! Derivation of the projected secret entries from the provisioned
//! service's secret and the binding's mappings.
//!
//! Mapping values are templates: `{key}` substitutes the entry named `key`,
//! `{{` and `}}` produce literal braces, and an unclosed `{` is kept as text.
//! A reference to a key of the raw secret always reads the raw value, so a
//! mapping that overrides a raw key never changes what other mappings see.

use std::collections::{BTreeMap, BTreeSet};

use sb_operator_common::utils::{compute_object_hash, short_hash};

use crate::crd::hub::service_binding::SecretMapping;
use crate::error::BindingError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Reference(String),
}

fn tokenize(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    name.push(next);
                }

                if closed && !name.is_empty() {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    tokens.push(Token::Reference(name));
                } else {
                    literal.push('{');
                    literal.push_str(&name);
                    if closed {
                        literal.push('}');
                    }
                }
            }
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

fn references(tokens: &[Token]) -> BTreeSet<&str> {
    tokens
        .iter()
        .filter_map(|token| match token {
            Token::Reference(name) => Some(name.as_str()),
            Token::Literal(_) => None,
        })
        .collect()
}

/// Compute the final entries: `raw` overlaid with every evaluated mapping.
pub fn project(raw: &BTreeMap<String, String>, mappings: &[SecretMapping]) -> Result<BTreeMap<String, String>, BindingError> {
    let mut templates: BTreeMap<&str, Vec<Token>> = BTreeMap::new();
    for mapping in mappings {
        if templates.insert(mapping.name.as_str(), tokenize(&mapping.value)).is_some() {
            return Err(BindingError::DuplicateMapping(mapping.name.clone()));
        }
    }

    // Edges point from a mapping to the derived entries it reads
    let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (&name, tokens) in &templates {
        let mut needs = BTreeSet::new();
        for reference in references(tokens) {
            if raw.contains_key(reference) {
                continue;
            }
            if !templates.contains_key(reference) {
                return Err(BindingError::UnresolvedReference {
                    mapping: name.to_string(),
                    key: reference.to_string(),
                });
            }
            needs.insert(reference);
        }
        dependencies.insert(name, needs);
    }

    // Kahn's algorithm; the ready set is ordered so evaluation is deterministic
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    for (&name, needs) in &dependencies {
        pending.insert(name, needs.len());
        for &need in needs {
            dependents.entry(need).or_default().push(name);
        }
    }

    let mut ready: BTreeSet<&str> = pending.iter().filter(|(_, &count)| count == 0).map(|(&name, _)| name).collect();
    let mut derived: BTreeMap<String, String> = BTreeMap::new();

    while let Some(name) = ready.pop_first() {
        let value = templates[name]
            .iter()
            .map(|token| match token {
                Token::Literal(text) => text.as_str(),
                Token::Reference(key) => raw.get(key).or_else(|| derived.get(key)).map(String::as_str).unwrap_or_default(),
            })
            .collect::<String>();
        derived.insert(name.to_string(), value);

        for &dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if derived.len() < templates.len() {
        let unevaluated: BTreeSet<&str> = templates.keys().copied().filter(|name| !derived.contains_key(*name)).collect();
        return Err(BindingError::CyclicMapping(find_cycle(&dependencies, &unevaluated)));
    }

    let mut entries = raw.clone();
    entries.extend(derived);
    Ok(entries)
}

/// Depth-first search for one cycle among mappings Kahn's algorithm could
/// not evaluate. The returned path starts and ends with the same name.
fn find_cycle(dependencies: &BTreeMap<&str, BTreeSet<&str>>, unevaluated: &BTreeSet<&str>) -> Vec<String> {
    fn visit<'a>(
        node: &'a str,
        dependencies: &BTreeMap<&'a str, BTreeSet<&'a str>>,
        visited: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(start) = path.iter().position(|&entry| entry == node) {
            let mut cycle: Vec<String> = path[start..].iter().map(|entry| entry.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if !visited.insert(node) {
            return None;
        }

        path.push(node);
        for &next in dependencies.get(node).into_iter().flatten() {
            if let Some(cycle) = visit(next, dependencies, visited, path) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }

    let mut visited = BTreeSet::new();
    for &start in unevaluated {
        if let Some(cycle) = visit(start, dependencies, &mut visited, &mut Vec::new()) {
            return cycle;
        }
    }

    // Kahn's algorithm only stalls on a cycle
    unevaluated.iter().map(|name| name.to_string()).collect()
}

const MAX_SECRET_NAME_LENGTH: usize = 253;
const CONTENT_HASH_LENGTH: usize = 8;
const NAME_HASH_LENGTH: usize = 16;

/// Prefix shared by every secret derived for `binding`. Names too long to
/// fit a Secret name keep their head and end in a hash of the full name.
fn secret_prefix(binding: &str) -> String {
    let limit = MAX_SECRET_NAME_LENGTH - CONTENT_HASH_LENGTH - 1;
    if binding.len() <= limit {
        return binding.to_string();
    }

    let head: String = binding.chars().take(limit - NAME_HASH_LENGTH).collect();
    format!("{}{}", head, short_hash(binding, NAME_HASH_LENGTH))
}

/// Name of the secret holding `entries` for `binding`: the binding name
/// plus a content hash, so any change yields a new secret name.
pub fn derived_secret_name(binding: &str, entries: &BTreeMap<String, String>) -> Result<String, BindingError> {
    let hash = compute_object_hash(entries).map_err(|e| BindingError::ObjectStore(e.to_string()))?;
    Ok(format!("{}-{}", secret_prefix(binding), &hash[..CONTENT_HASH_LENGTH]))
}

/// Whether `secret` was produced by [`derived_secret_name`] for `binding`
pub fn is_derived_secret(binding: &str, secret: &str) -> bool {
    secret
        .strip_prefix(secret_prefix(binding).as_str())
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|hash| hash.len() == CONTENT_HASH_LENGTH && hash.chars().all(|ch| ch.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn mapping(name: &str, value: &str) -> SecretMapping {
        SecretMapping { name: name.to_string(), value: value.to_string() }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("postgres://{host}:{port}"),
            vec![
                Token::Literal("postgres://".to_string()),
                Token::Reference("host".to_string()),
                Token::Literal(":".to_string()),
                Token::Reference("port".to_string()),
            ]
        );
        assert_eq!(tokenize("{{literal}}"), vec![Token::Literal("{literal}".to_string())]);
        assert_eq!(tokenize("open {brace"), vec![Token::Literal("open {brace".to_string())]);
        assert_eq!(tokenize("empty {}"), vec![Token::Literal("empty {}".to_string())]);
    }

    #[test]
    fn test_postgres_url_scenario() {
        let entries = project(
            &raw(&[("host", "db.local"), ("port", "5432")]),
            &[mapping("url", "postgres://{host}:{port}")],
        )
        .unwrap();

        assert_eq!(entries, raw(&[("host", "db.local"), ("port", "5432"), ("url", "postgres://db.local:5432")]));
    }

    #[test]
    fn test_chained_mappings_in_any_order() {
        let secret = raw(&[("user", "app"), ("password", "s3cret"), ("host", "db")]);
        let forward = vec![
            mapping("credentials", "{user}:{password}"),
            mapping("authority", "{credentials}@{host}"),
            mapping("url", "postgres://{authority}/app"),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let a = project(&secret, &forward).unwrap();
        let b = project(&secret, &backward).unwrap();

        assert_eq!(a, b);
        assert_eq!(a["url"], "postgres://app:s3cret@db/app");
    }

    #[test]
    fn test_unresolved_reference() {
        let error = project(&raw(&[("host", "db")]), &[mapping("url", "{host}:{port}")]).unwrap_err();

        assert_eq!(error, BindingError::UnresolvedReference { mapping: "url".to_string(), key: "port".to_string() });
    }

    #[test]
    fn test_two_mapping_cycle_names_both() {
        let error = project(&raw(&[]), &[mapping("a", "{b}"), mapping("b", "{a}")]).unwrap_err();

        assert_eq!(error, BindingError::CyclicMapping(vec!["a".to_string(), "b".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let error = project(&raw(&[]), &[mapping("a", "x{a}")]).unwrap_err();

        assert_eq!(error, BindingError::CyclicMapping(vec!["a".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_cycle_reported_alongside_independent_mappings() {
        let error = project(
            &raw(&[("host", "db")]),
            &[mapping("ok", "{host}"), mapping("x", "{y}"), mapping("y", "{z}"), mapping("z", "{x}")],
        )
        .unwrap_err();

        assert_eq!(error.reason(), "CyclicMapping");
        assert_eq!(error.to_string(), "cyclic mapping: x -> y -> z -> x");
    }

    #[test]
    fn test_override_of_raw_key_reads_raw_value() {
        let entries = project(
            &raw(&[("host", "db")]),
            &[mapping("host", "{host}.svc"), mapping("url", "tcp://{host}")],
        )
        .unwrap();

        assert_eq!(entries["host"], "db.svc");
        assert_eq!(entries["url"], "tcp://db");
    }

    #[test]
    fn test_duplicate_mapping() {
        let error = project(&raw(&[]), &[mapping("a", "1"), mapping("a", "2")]).unwrap_err();

        assert_eq!(error, BindingError::DuplicateMapping("a".to_string()));
    }

    #[test]
    fn test_derived_secret_name_tracks_content() {
        let first = derived_secret_name("db", &raw(&[("host", "a")])).unwrap();
        let again = derived_secret_name("db", &raw(&[("host", "a")])).unwrap();
        let changed = derived_secret_name("db", &raw(&[("host", "b")])).unwrap();

        assert_eq!(first, again);
        assert_ne!(first, changed);
        assert!(is_derived_secret("db", &first));
        assert!(!is_derived_secret("db", "db-credentials"));
        assert!(!is_derived_secret("db", &format!("{}-0123abcd", first)));
    }

    #[test]
    fn test_derived_secret_name_fits_long_bindings() {
        let entries = raw(&[("host", "a")]);
        let binding = format!("{}-a", "x".repeat(250));
        let sibling = format!("{}-b", "x".repeat(250));

        let name = derived_secret_name(&binding, &entries).unwrap();

        assert_eq!(name.len(), 253);
        assert!(name.starts_with(&"x".repeat(200)));
        assert!(is_derived_secret(&binding, &name));
        assert!(!is_derived_secret(&sibling, &name));
        assert_ne!(derived_secret_name(&sibling, &entries).unwrap(), name);
    }
}
