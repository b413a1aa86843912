//! Parsed string templates
//!
//! A [`ParsedTemplate`] splits a string into alternating literal and
//! anchor spans. The first and last spans are always literals, so a
//! template with `n` anchors has `2n + 1` spans. An anchor used more than
//! once yields one bind point; [`ParsedTemplate::slots`] maps each anchor
//! span back to it.
//!
//! Capture points are only looked for in literal spans, so brackets inside
//! an inline recipe stay part of the recipe.
//!
//! # Example
//!
//! ```rust,ignore
//! let bindings = IndexMap::from([("cycle".to_string(), "Identity()".to_string())]);
//! let template = ParsedTemplate::parse("id-{cycle}", &bindings);
//! assert_eq!(template.kind(), TemplateKind::Concat);
//! assert_eq!(template.spans(), ["id-", "cycle", ""]);
//! ```

use crate::bind_points::{extract_captures, scan, BindPoint, BindPointKind, CapturePoint};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a parsed string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    /// No bind points
    Literal,
    /// A single bind point and nothing else
    BindRef,
    /// Literal text mixed with one or more bind points
    Concat,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal => write!(f, "literal"),
            Self::BindRef => write!(f, "bindref"),
            Self::Concat => write!(f, "concat"),
        }
    }
}

/// A string value split into literal and bind point spans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    raw: String,
    spans: Vec<String>,
    points: Vec<BindPoint>,
    slots: Vec<usize>,
    captures: Vec<CapturePoint>,
}

impl ParsedTemplate {
    /// Parse `raw`, resolving `{name}` references against `bindings`
    ///
    /// Parsing never fails; unresolved references are reported by
    /// [`ParsedTemplate::missing`].
    #[must_use]
    pub fn parse(raw: &str, bindings: &IndexMap<String, String>) -> Self {
        let scanned = scan(raw);

        let mut captures = Vec::new();
        let literals: Vec<String> = scanned
            .literals
            .iter()
            .map(|literal| {
                let (text, found) = extract_captures(literal);
                captures.extend(found);
                text
            })
            .collect();
        let mut literals = literals.into_iter();
        let mut spans = Vec::with_capacity(scanned.points.len() * 2 + 1);
        let mut points: Vec<BindPoint> = Vec::new();
        let mut slots = Vec::with_capacity(scanned.points.len());
        for mut point in scanned.points {
            spans.push(literals.next().unwrap_or_default());
            spans.push(point.anchor.clone());
            if point.kind == BindPointKind::Reference {
                point.recipe = bindings.get(&point.anchor).cloned().unwrap_or_default();
            }
            let slot = match points.iter().position(|p| *p == point) {
                Some(slot) => slot,
                None => {
                    points.push(point);
                    points.len() - 1
                }
            };
            slots.push(slot);
        }
        spans.push(literals.next().unwrap_or_default());

        Self {
            raw: raw.to_string(),
            spans,
            points,
            slots,
            captures,
        }
    }

    /// The text as given, before capture points were removed
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Classify the template
    #[must_use]
    pub fn kind(&self) -> TemplateKind {
        match self.spans.as_slice() {
            [_] => TemplateKind::Literal,
            [before, _, after] if before.is_empty() && after.is_empty() => TemplateKind::BindRef,
            _ => TemplateKind::Concat,
        }
    }

    /// Alternating literal and anchor spans
    #[inline]
    #[must_use]
    pub fn spans(&self) -> &[String] {
        &self.spans
    }

    /// Literal spans only
    pub fn literals(&self) -> impl Iterator<Item = &str> {
        self.spans.iter().step_by(2).map(String::as_str)
    }

    /// Anchors in order of appearance, repeats included
    pub fn anchors(&self) -> impl Iterator<Item = &str> {
        self.spans.iter().skip(1).step_by(2).map(String::as_str)
    }

    /// Distinct bind points in order of first appearance
    #[inline]
    #[must_use]
    pub fn bind_points(&self) -> &[BindPoint] {
        &self.points
    }

    /// For each anchor span, the index of its bind point
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    /// Capture points removed from the text
    #[inline]
    #[must_use]
    pub fn captures(&self) -> &[CapturePoint] {
        &self.captures
    }

    /// Anchors that have no recipe, each listed once
    #[must_use]
    pub fn missing(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = Vec::new();
        for point in &self.points {
            if point.recipe.is_empty() && !missing.contains(&point.anchor.as_str()) {
                missing.push(&point.anchor);
            }
        }
        missing
    }

    /// Whether any anchor is unresolved
    #[inline]
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.points.iter().any(|p| p.recipe.is_empty())
    }

    /// The sole bind point of a [`TemplateKind::BindRef`] template
    #[must_use]
    pub fn as_binding(&self) -> Option<&BindPoint> {
        match self.kind() {
            TemplateKind::BindRef => self.points.first(),
            _ => None,
        }
    }

    /// Rebuild the text with each anchor replaced by `token(anchor)`
    ///
    /// Drivers with positional placeholders use this to produce, for
    /// example, `insert into t values (?, ?)`.
    #[must_use]
    pub fn positional(&self, token: impl Fn(&str) -> String) -> String {
        let mut out = String::new();
        for (i, span) in self.spans.iter().enumerate() {
            if i % 2 == 0 {
                out.push_str(span);
            } else {
                out.push_str(&token(span));
            }
        }
        out
    }
}

impl fmt::Display for ParsedTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spans.iter().map(|s| format!("[{s}]")).collect::<Vec<_>>().join(","))?;
        let missing = self.missing();
        if !missing.is_empty() {
            write!(f, " missing bindings: [{}]", missing.join(","))?;
        }
        Ok(())
    }
}
