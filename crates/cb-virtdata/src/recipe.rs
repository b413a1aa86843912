//! Recipe syntax
//!
//! A recipe is a chain of generator constructor calls:
//!
//! ```text
//! [compose] Name(arg, ...) ; Name(arg, ...) ; ...
//! ```
//!
//! Arguments are integers (an `L` suffix and `_` separators are accepted),
//! floats, single or double quoted strings, `true`/`false`, and nested
//! constructor calls. Parentheses may be omitted for calls without
//! arguments, so `Identity` and `Identity()` are the same stage.

use crate::error::RecipeError;
use logos::Logos;
use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
    #[regex(r"-?[0-9][0-9_]*[lL]?", |lex| parse_int(lex.slice()))]
    Int(i64),
    #[regex(r"-?[0-9][0-9_]*\.[0-9]+([eE][+-]?[0-9]+)?", |lex| parse_float(lex.slice()))]
    Float(f64),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r"'([^'\\]|\\.)*'", |lex| unescape(lex.slice()))]
    Str(String),
}

fn parse_int(text: &str) -> Option<i64> {
    let digits: String = text
        .trim_end_matches(['l', 'L'])
        .chars()
        .filter(|c| *c != '_')
        .collect();
    digits.parse().ok()
}

fn parse_float(text: &str) -> Option<f64> {
    text.replace('_', "").parse().ok()
}

fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Literal or nested argument to a constructor call
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Integer literal
    Long(i64),
    /// Float literal
    Double(f64),
    /// String literal
    Text(String),
    /// `true` or `false`
    Bool(bool),
    /// Nested constructor call
    Call(Call),
}

impl Arg {
    /// Type name used in argument diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::Long(_) => "integer",
            Arg::Double(_) => "float",
            Arg::Text(_) => "string",
            Arg::Bool(_) => "boolean",
            Arg::Call(_) => "function",
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Long(v) => write!(f, "{v}"),
            Arg::Double(v) => write!(f, "{v:?}"),
            Arg::Text(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Arg::Bool(b) => write!(f, "{b}"),
            Arg::Call(call) => write!(f, "{call}"),
        }
    }
}

/// One constructor invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Constructor name
    pub name: String,
    /// Arguments in order
    pub args: Vec<Arg>,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// A parsed recipe
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    stages: SmallVec<[Call; 2]>,
}

impl Recipe {
    /// Parse recipe text
    ///
    /// # Errors
    /// Returns [`RecipeError`] for empty input, bad tokens or unbalanced delimiters.
    pub fn parse(text: &str) -> Result<Self, RecipeError> {
        let trimmed = text.trim();
        let body = trimmed
            .strip_prefix("compose ")
            .map_or(trimmed, str::trim_start);
        let offset = body.as_ptr() as usize - text.as_ptr() as usize;
        let tokens = tokenize(body, offset)?;
        Parser {
            tokens,
            pos: 0,
            source: text,
        }
        .recipe()
    }

    /// Stages in evaluation order
    #[inline]
    #[must_use]
    pub fn stages(&self) -> &[Call] {
        &self.stages
    }
}

impl FromStr for Recipe {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}

fn tokenize(body: &str, offset: usize) -> Result<Vec<(Token, Range<usize>)>, RecipeError> {
    let mut lexer = Token::lexer(body);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        let span = lexer.span();
        let span = span.start + offset..span.end + offset;
        match token {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(RecipeError::InvalidToken {
                    at: span.start,
                    text: lexer.slice().to_string(),
                })
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn next(&mut self) -> Option<(Token, Range<usize>)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn unexpected(&self, span: Range<usize>, expected: &'static str) -> RecipeError {
        RecipeError::Unexpected {
            at: span.start,
            found: self.source.get(span).unwrap_or_default().to_string(),
            expected,
        }
    }

    fn recipe(mut self) -> Result<Recipe, RecipeError> {
        let mut stages = SmallVec::new();
        while self.peek().is_some() {
            stages.push(self.call()?);
            match self.next() {
                None | Some((Token::Semi, _)) => {}
                Some((_, span)) => return Err(self.unexpected(span, "';' or end of recipe")),
            }
        }
        if stages.is_empty() {
            return Err(RecipeError::Empty);
        }
        Ok(Recipe { stages })
    }

    fn call(&mut self) -> Result<Call, RecipeError> {
        let name = match self.next() {
            Some((Token::Ident(name), _)) => name,
            Some((_, span)) => return Err(self.unexpected(span, "generator name")),
            None => {
                return Err(RecipeError::UnexpectedEnd {
                    expected: "generator name",
                })
            }
        };
        let mut args = Vec::new();
        if self.peek() != Some(&Token::LParen) {
            return Ok(Call { name, args });
        }
        self.pos += 1;
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(Call { name, args });
        }
        loop {
            args.push(self.arg()?);
            match self.next() {
                Some((Token::Comma, _)) => {}
                Some((Token::RParen, _)) => break,
                Some((_, span)) => return Err(self.unexpected(span, "',' or ')'")),
                None => return Err(RecipeError::UnexpectedEnd { expected: "')'" }),
            }
        }
        Ok(Call { name, args })
    }

    fn arg(&mut self) -> Result<Arg, RecipeError> {
        let Some((token, span)) = self.next() else {
            return Err(RecipeError::UnexpectedEnd {
                expected: "argument",
            });
        };
        match token {
            Token::Int(v) => Ok(Arg::Long(v)),
            Token::Float(v) => Ok(Arg::Double(v)),
            Token::Str(s) => Ok(Arg::Text(s)),
            Token::Ident(name) if self.peek() != Some(&Token::LParen) && name == "true" => {
                Ok(Arg::Bool(true))
            }
            Token::Ident(name) if self.peek() != Some(&Token::LParen) && name == "false" => {
                Ok(Arg::Bool(false))
            }
            Token::Ident(_) => {
                self.pos -= 1;
                self.call().map(Arg::Call)
            }
            _ => Err(self.unexpected(span, "argument")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn recipe_parses_chain() {
        let recipe = Recipe::parse("Mod(5); ToString()").unwrap();
        assert_eq!(recipe.stages().len(), 2);
        assert_eq!(recipe.stages()[0].name, "Mod");
        assert_eq!(recipe.stages()[0].args, vec![Arg::Long(5)]);
        assert_eq!(recipe.stages()[1].args, vec![]);
    }

    #[test]
    fn recipe_strips_compose_prefix_and_trailing_separator() {
        let recipe = Recipe::parse("compose Identity;").unwrap();
        assert_eq!(recipe.stages().len(), 1);
        assert_eq!(recipe.to_string(), "Identity()");
    }

    #[test]
    fn recipe_parses_literals_and_nested_calls() {
        let recipe = Recipe::parse(r#"Template('user-{}', HashRange(1_000L, 2000)); Scale(0.5); Prefix("a\"b"); Flag(true)"#)
            .unwrap();
        let stages = recipe.stages();
        assert_eq!(
            stages[0].args,
            vec![
                Arg::Text("user-{}".into()),
                Arg::Call(Call {
                    name: "HashRange".into(),
                    args: vec![Arg::Long(1000), Arg::Long(2000)],
                }),
            ]
        );
        assert_eq!(stages[1].args, vec![Arg::Double(0.5)]);
        assert_eq!(stages[2].args, vec![Arg::Text("a\"b".into())]);
        assert_eq!(stages[3].args, vec![Arg::Bool(true)]);
    }

    #[test]
    fn recipe_display_round_trips() {
        let text = "Template('x{}', Identity()); Scale(2.0)";
        let recipe = Recipe::parse(text).unwrap();
        assert_eq!(Recipe::parse(&recipe.to_string()).unwrap(), recipe);
    }

    #[test]
    fn recipe_rejects_empty() {
        assert_eq!(Recipe::parse("  "), Err(RecipeError::Empty));
        assert!(matches!(
            Recipe::parse(";"),
            Err(RecipeError::Unexpected { expected: "generator name", .. })
        ));
    }

    #[test]
    fn recipe_rejects_unbalanced_parens() {
        assert_eq!(
            Recipe::parse("Mod(5"),
            Err(RecipeError::UnexpectedEnd { expected: "')'" })
        );
        assert!(matches!(
            Recipe::parse("Mod(5))"),
            Err(RecipeError::Unexpected { at: 6, .. })
        ));
    }

    #[test]
    fn recipe_rejects_bad_tokens() {
        assert!(matches!(
            Recipe::parse("Mod(5) # 3"),
            Err(RecipeError::InvalidToken { at: 7, .. })
        ));
        assert!(matches!(
            Recipe::parse("Mod(,)"),
            Err(RecipeError::Unexpected { .. })
        ));
    }
}
