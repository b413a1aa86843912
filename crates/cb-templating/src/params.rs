//! Parameter text
//!
//! Parses `name=value;name=value` text as used for activity definitions
//! and one-line command templates. Segments are separated by `;` or
//! newlines. Values may be wrapped in single or double quotes, in which
//! case separators inside them are kept.

use crate::error::ParamsError;
use indexmap::IndexMap;

/// Parser for `name=value` parameter text
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamsParser;

impl ParamsParser {
    /// Parse into an ordered map; later duplicates replace earlier ones
    ///
    /// # Errors
    /// Returns [`ParamsError`] for segments without `=`, empty names or an
    /// unterminated quote.
    pub fn parse(text: &str) -> Result<IndexMap<String, String>, ParamsError> {
        let mut params = IndexMap::new();
        for segment in split_segments(text)? {
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (name, value) = trimmed.split_once('=').ok_or_else(|| ParamsError::MissingEquals {
                segment: trimmed.to_string(),
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ParamsError::EmptyName {
                    segment: trimmed.to_string(),
                });
            }
            params.insert(name.to_string(), unquote(value.trim()));
        }
        Ok(params)
    }

    /// Whether `text` holds at least one unquoted `=`
    #[must_use]
    pub fn looks_like_params(text: &str) -> bool {
        let mut quote = None;
        for c in text.chars() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (None, '\'' | '"') => quote = Some(c),
                (None, '=') => return true,
                _ => {}
            }
        }
        false
    }
}

fn split_segments(text: &str) -> Result<Vec<&str>, ParamsError> {
    let mut segments = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, ';' | '\n') => {
                segments.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(ParamsError::UnterminatedQuote {
            text: text.to_string(),
        });
    }
    segments.push(&text[start..]);
    Ok(segments)
}

fn unquote(value: &str) -> String {
    for q in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_basic() {
        let params = ParamsParser::parse("alias=writes; threads=4;cycles=0..1000").unwrap();
        assert_eq!(params["alias"], "writes");
        assert_eq!(params["threads"], "4");
        assert_eq!(params["cycles"], "0..1000");
    }

    #[test]
    fn params_parse_keeps_separators_inside_quotes() {
        let params = ParamsParser::parse("op='select a; b from t where k={k}';x=\"1=2\"").unwrap();
        assert_eq!(params["op"], "select a; b from t where k={k}");
        assert_eq!(params["x"], "1=2");
    }

    #[test]
    fn params_parse_rejects_malformed() {
        assert!(matches!(
            ParamsParser::parse("alias"),
            Err(ParamsError::MissingEquals { .. })
        ));
        assert!(matches!(
            ParamsParser::parse("=3"),
            Err(ParamsError::EmptyName { .. })
        ));
        assert!(matches!(
            ParamsParser::parse("op='open"),
            Err(ParamsError::UnterminatedQuote { .. })
        ));
    }

    #[test]
    fn params_looks_like_params() {
        assert!(ParamsParser::looks_like_params("a=1"));
        assert!(!ParamsParser::looks_like_params("select * from t"));
        assert!(!ParamsParser::looks_like_params("'a=1'"));
    }
}
