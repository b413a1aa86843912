//! Bind point and capture point scanning
//!
//! Two bind point forms are recognized inside string values:
//! - `{name}` refers to a recipe declared in the bindings dictionary
//! - `{{Recipe(args)}}` declares a recipe inline
//!
//! Anything else, including JSON-like text such as `{"a": 1}`, stays
//! literal. Capture points `[name]` or `[name as alias]` mark result fields
//! to extract; the brackets are removed and the name stays in the text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("valid regex")
});

static CAPTURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?P<name>[A-Za-z_]\w*)(?:\s+as\s+(?P<alias>[A-Za-z_]\w*))?\]")
        .expect("valid regex")
});

/// Whether `text` is a valid `{name}` anchor
#[must_use]
pub fn is_anchor(text: &str) -> bool {
    ANCHOR.is_match(text)
}

/// How a bind point names its recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindPointKind {
    /// `{name}`, resolved through the bindings dictionary
    Reference,
    /// `{{recipe}}`, the recipe is the anchor text
    Definition,
}

/// A reference to a recipe inside a string value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindPoint {
    /// Anchor name; the recipe text itself for inline definitions
    pub anchor: String,
    /// Recipe text, empty until a reference is resolved
    pub recipe: String,
    /// Surface form
    pub kind: BindPointKind,
}

impl BindPoint {
    /// A `{name}` reference
    #[must_use]
    pub fn reference(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            recipe: String::new(),
            kind: BindPointKind::Reference,
        }
    }

    /// A `{{recipe}}` definition
    #[must_use]
    pub fn definition(recipe: impl Into<String>) -> Self {
        let recipe = recipe.into();
        Self {
            anchor: recipe.clone(),
            recipe,
            kind: BindPointKind::Definition,
        }
    }
}

/// Alternating literal and bind point pieces of a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scanned {
    /// Literal fragments, always one more than `points`
    pub literals: Vec<String>,
    /// Bind points in order of appearance
    pub points: Vec<BindPoint>,
}

/// Split a string into literal fragments and bind points
#[must_use]
pub fn scan(text: &str) -> Scanned {
    let mut literals = Vec::new();
    let mut points = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        if rest.starts_with("{{") {
            if let Some(end) = inline_end(rest) {
                let recipe = rest[2..end].trim();
                if !recipe.is_empty() {
                    literals.push(std::mem::take(&mut literal));
                    points.push(BindPoint::definition(recipe));
                    i += end + 2;
                    continue;
                }
            }
        } else if rest.starts_with('{') {
            if let Some(close) = rest.find('}') {
                let anchor = &rest[1..close];
                if is_anchor(anchor) {
                    literals.push(std::mem::take(&mut literal));
                    points.push(BindPoint::reference(anchor));
                    i += close + 1;
                    continue;
                }
            }
        }
        let Some(c) = rest.chars().next() else {
            break;
        };
        literal.push(c);
        i += c.len_utf8();
    }
    literals.push(literal);
    Scanned { literals, points }
}

/// Offset of the closing `}}` of an inline recipe, skipping quoted text
fn inline_end(rest: &str) -> Option<usize> {
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in rest.char_indices().skip(2) {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, '}') if rest[i..].starts_with("}}") => return Some(i),
            _ => {}
        }
    }
    None
}

/// A result field to extract after an op executes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapturePoint {
    /// Field name in the result
    pub name: String,
    /// Name to store it under
    pub alias: String,
}

/// Remove capture brackets from `text`, returning the rewritten text and
/// the captures found
#[must_use]
pub fn extract_captures(text: &str) -> (String, Vec<CapturePoint>) {
    let mut captures = Vec::new();
    let rewritten = CAPTURE.replace_all(text, |caps: &regex::Captures<'_>| {
        let name = caps["name"].to_string();
        let alias = caps
            .name("alias")
            .map_or_else(|| name.clone(), |m| m.as_str().to_string());
        captures.push(CapturePoint {
            name: name.clone(),
            alias,
        });
        name
    });
    (rewritten.into_owned(), captures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scan_literal_only() {
        let scanned = scan("plain text");
        assert_eq!(scanned.literals, vec!["plain text".to_string()]);
        assert!(scanned.points.is_empty());
    }

    #[test]
    fn scan_reference_and_definition() {
        let scanned = scan("id-{cycle} m={{Mod(5)}}");
        assert_eq!(scanned.literals, vec!["id-", " m=", ""]);
        assert_eq!(
            scanned.points,
            vec![BindPoint::reference("cycle"), BindPoint::definition("Mod(5)")]
        );
    }

    #[test]
    fn scan_inline_recipe_with_braces_in_quotes() {
        let scanned = scan("{{Template('x}}{}', Identity())}}");
        assert_eq!(scanned.literals, vec!["", ""]);
        assert_eq!(scanned.points[0].recipe, "Template('x}}{}', Identity())");
    }

    #[test]
    fn scan_leaves_json_like_text_literal() {
        let scanned = scan(r#"{"a": 1} and { spaced } and {"#);
        assert!(scanned.points.is_empty());
        assert_eq!(scanned.literals, vec![r#"{"a": 1} and { spaced } and {"#.to_string()]);
    }

    #[test]
    fn captures_are_extracted() {
        let (text, captures) = extract_captures("select [userid], [name as n] from users where k=1");
        assert_eq!(text, "select userid, name from users where k=1");
        assert_eq!(
            captures,
            vec![
                CapturePoint {
                    name: "userid".into(),
                    alias: "userid".into()
                },
                CapturePoint {
                    name: "name".into(),
                    alias: "n".into()
                },
            ]
        );
    }

    #[test]
    fn anchor_pattern() {
        assert!(is_anchor("cycle"));
        assert!(is_anchor("user.id-2"));
        assert!(!is_anchor("2x"));
        assert!(!is_anchor("\"a\": 1"));
    }
}
