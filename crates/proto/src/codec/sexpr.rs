//! Bounded-depth S-expression parser.
//!
//! Parses the parenthesized token lists used by SVN-style greetings:
//! atoms separated by whitespace, lists delimited by `(` and `)`. A
//! double-quoted token is one atom regardless of the whitespace or parens
//! inside it (failure greetings carry human-readable messages that way); the
//! quotes are stripped from the parsed atom. Nesting is capped by an explicit
//! depth limit; input deeper than the limit is rejected with a parse error
//! rather than recursed into, so hostile input cannot exhaust the stack.

use std::fmt;

use sonde_platform::{SondeError, SondeResult};

/// Default nesting limit shared by the recursive decoders in this crate.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Recursion budget for nested decoders.
///
/// Created at the root with the maximum allowed depth; each nesting level
/// calls [`DepthGuard::descend`], which fails closed once the budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct DepthGuard {
    remaining: usize,
}

impl DepthGuard {
    /// Creates a guard allowing `max_depth` levels of nesting.
    pub fn new(max_depth: usize) -> Self {
        DepthGuard {
            remaining: max_depth,
        }
    }

    /// Enters one nesting level, returning the guard for the inner scope.
    ///
    /// # Errors
    ///
    /// Returns [`SondeError::Parse`] when the depth budget is exhausted.
    pub fn descend(&self) -> SondeResult<DepthGuard> {
        match self.remaining.checked_sub(1) {
            Some(remaining) => Ok(DepthGuard { remaining }),
            None => Err(SondeError::Parse("nesting too deep".to_string())),
        }
    }
}

impl Default for DepthGuard {
    fn default() -> Self {
        DepthGuard::new(DEFAULT_MAX_DEPTH)
    }
}

/// One node of a parsed S-expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SExpr {
    /// A bare token: word, number, or version string.
    Atom(String),
    /// A parenthesized sequence of child nodes.
    List(Vec<SExpr>),
}

impl SExpr {
    /// Returns the atom text, if this node is an atom.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExpr::Atom(text) => Some(text),
            SExpr::List(_) => None,
        }
    }

    /// Returns the child nodes, if this node is a list.
    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::Atom(_) => None,
            SExpr::List(items) => Some(items),
        }
    }
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExpr::Atom(text) => {
                let needs_quotes = text.is_empty()
                    || text
                        .bytes()
                        .any(|b| b.is_ascii_whitespace() || b == b'(' || b == b')');
                if needs_quotes {
                    write!(f, "\"{}\"", text)
                } else {
                    write!(f, "{}", text)
                }
            }
            SExpr::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Parses a single S-expression from `text`, enforcing `max_depth` nesting.
///
/// The whole input must be one expression; trailing non-whitespace content is
/// a parse error. Unbalanced parentheses and over-deep nesting fail closed.
///
/// # Example
///
/// ```
/// use sonde_proto::codec::sexpr::parse;
///
/// let expr = parse("(success (2 2 () ()))", 10).unwrap();
/// assert_eq!(expr.as_list().unwrap()[0].as_atom(), Some("success"));
/// ```
pub fn parse(text: &str, max_depth: usize) -> SondeResult<SExpr> {
    let mut parser = Parser {
        bytes: text.as_bytes(),
        pos: 0,
    };
    parser.skip_whitespace();
    let expr = parser.parse_node(DepthGuard::new(max_depth))?;
    parser.skip_whitespace();
    if parser.pos != parser.bytes.len() {
        return Err(SondeError::Parse(format!(
            "trailing content at byte {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_whitespace(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .map(|b| b.is_ascii_whitespace())
            .unwrap_or(false)
        {
            self.pos += 1;
        }
    }

    fn parse_node(&mut self, depth: DepthGuard) -> SondeResult<SExpr> {
        match self.bytes.get(self.pos) {
            Some(b'(') => self.parse_list(depth),
            Some(b')') => Err(SondeError::Parse(format!(
                "unbalanced ')' at byte {}",
                self.pos
            ))),
            Some(b'"') => self.parse_quoted_atom(),
            Some(_) => self.parse_atom(),
            None => Err(SondeError::Parse("unexpected end of input".to_string())),
        }
    }

    fn parse_list(&mut self, depth: DepthGuard) -> SondeResult<SExpr> {
        let inner = depth.descend()?;
        self.pos += 1; // consume '('
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.bytes.get(self.pos) {
                Some(b')') => {
                    self.pos += 1;
                    return Ok(SExpr::List(items));
                }
                Some(_) => items.push(self.parse_node(inner)?),
                None => {
                    return Err(SondeError::Parse(
                        "unbalanced '(': input ended inside a list".to_string(),
                    ))
                }
            }
        }
    }

    fn parse_atom(&mut self) -> SondeResult<SExpr> {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .map(|&b| !b.is_ascii_whitespace() && b != b'(' && b != b')')
            .unwrap_or(false)
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| SondeError::Parse("atom is not valid UTF-8".to_string()))?;
        Ok(SExpr::Atom(text.to_string()))
    }

    /// A `"…"` token is one atom; whitespace and parens inside it are
    /// ordinary content, and the quotes are stripped.
    fn parse_quoted_atom(&mut self) -> SondeResult<SExpr> {
        self.pos += 1; // consume opening '"'
        let start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                Some(b'"') => {
                    let text = std::str::from_utf8(&self.bytes[start..self.pos])
                        .map_err(|_| SondeError::Parse("atom is not valid UTF-8".to_string()))?;
                    self.pos += 1;
                    return Ok(SExpr::Atom(text.to_string()));
                }
                Some(_) => self.pos += 1,
                None => {
                    return Err(SondeError::Parse(
                        "unterminated quoted atom".to_string(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_atom() {
        assert_eq!(parse("hello", 10).unwrap(), SExpr::Atom("hello".to_string()));
    }

    #[test]
    fn test_parse_nested_list() {
        let expr = parse("(success (2 2 () (edit-pipeline)))", 10).unwrap();
        let items = expr.as_list().unwrap();
        assert_eq!(items[0].as_atom(), Some("success"));
        let inner = items[1].as_list().unwrap();
        assert_eq!(inner[0].as_atom(), Some("2"));
        assert_eq!(inner[2], SExpr::List(vec![]));
    }

    #[test]
    fn test_parse_unbalanced_open() {
        let err = parse("(a (b c)", 10).unwrap_err();
        assert!(matches!(err, SondeError::Parse(_)));
        assert!(err.to_string().contains("unbalanced"));
    }

    #[test]
    fn test_parse_unbalanced_close() {
        let err = parse("a)", 10).unwrap_err();
        assert!(matches!(err, SondeError::Parse(_)));
    }

    #[test]
    fn test_parse_trailing_content() {
        let err = parse("(a) (b)", 10).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_depth_limit_enforced() {
        // Depth 3 is allowed at limit 3, depth 4 is not.
        assert!(parse("(((x)))", 3).is_ok());
        let err = parse("((((x))))", 3).unwrap_err();
        assert!(err.to_string().contains("too deep"));
    }

    #[test]
    fn test_quoted_atom_is_one_token() {
        let expr = parse("(err \"No repository found\" done)", 10).unwrap();
        let items = expr.as_list().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].as_atom(), Some("No repository found"));
    }

    #[test]
    fn test_quoted_atom_may_contain_parens() {
        let expr = parse("(\"path (with parens\")", 10).unwrap();
        let items = expr.as_list().unwrap();
        assert_eq!(items[0].as_atom(), Some("path (with parens"));
    }

    #[test]
    fn test_unterminated_quote_fails() {
        let err = parse("(\"never closed)", 10).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_quoted_display_round_trip() {
        let expr = parse("(210005 \"No repository found\" \"/x.c\" 0)", 10).unwrap();
        assert_eq!(parse(&expr.to_string(), 10).unwrap(), expr);
    }

    #[test]
    fn test_display_round_trip() {
        let text = "(success (2 2 () (edit-pipeline svndiff1)))";
        let expr = parse(text, 10).unwrap();
        assert_eq!(expr.to_string(), text);
        assert_eq!(parse(&expr.to_string(), 10).unwrap(), expr);
    }

    #[test]
    fn test_depth_guard_descend() {
        let guard = DepthGuard::new(1);
        let inner = guard.descend().unwrap();
        assert!(inner.descend().is_err());
    }
}
