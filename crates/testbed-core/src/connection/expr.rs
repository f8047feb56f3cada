//! Textual form of connection trees.
//!
//! ```text
//! expr   := term ('|' term)*
//! term   := factor ('&' factor)*
//! factor := '(' expr ')' | 'any' | ident ('+' ident)*
//! ```
//!
//! `any` is the bare link, `tcp+ipv4` is one single guaranteeing both tags.
//! `&` binds tighter than `|`.  Whitespace is insignificant.
//!
//! Parentheses nest at most [`MAX_NESTING`] levels and an expression expands
//! to at most [`MAX_ALTERNATIVES`] single alternatives.

use std::fmt;
use std::str::FromStr;

use super::{Connection, ConnectionError, ConnectionNode, Single};

/// Keyword for the bare link.
pub const BARE_KEYWORD: &str = "any";

/// Deepest accepted parenthesis nesting.
pub const MAX_NESTING: usize = 32;

/// Largest accepted number of single alternatives per (sub)expression.
pub const MAX_ALTERNATIVES: usize = 1024;

/// Renders one single in the textual form.
pub fn single_to_string(single: &Single) -> String {
    if single.is_bare() {
        BARE_KEYWORD.to_string()
    } else {
        single.properties().collect::<Vec<_>>().join("+")
    }
}

impl fmt::Display for Single {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&single_to_string(self))
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            ConnectionNode::Single(single) => write!(f, "{single}"),
            ConnectionNode::Or(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{child}")?;
                }
                Ok(())
            }
            ConnectionNode::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" & ")?;
                    }
                    if matches!(child.node(), ConnectionNode::Or(_)) {
                        write!(f, "({child})")?;
                    } else {
                        write!(f, "{child}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Connection {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parses a connection expression.
///
/// # Errors
///
/// [`ConnectionError::Parse`] with the byte offset of the first offending
/// character.
pub fn parse(input: &str) -> Result<Connection, ConnectionError> {
    let mut parser = Parser {
        input,
        pos: 0,
        depth: 0,
    };
    let connection = parser.expr()?;
    parser.skip_ws();
    if parser.pos < input.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(connection)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Currently open parentheses.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn too_many_alternatives(&self) -> ConnectionError {
        self.error(&format!("expression expands to more than {MAX_ALTERNATIVES} alternatives"))
    }

    fn error(&self, message: &str) -> ConnectionError {
        ConnectionError::Parse {
            input: self.input.to_string(),
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn expr(&mut self) -> Result<Connection, ConnectionError> {
        let first = self.term()?;
        let mut count = first.single_alternatives().len();
        let mut items = vec![first];
        while self.eat('|') {
            let next = self.term()?;
            count += next.single_alternatives().len();
            if count > MAX_ALTERNATIVES {
                return Err(self.too_many_alternatives());
            }
            items.push(next);
        }
        Connection::based_on(items)
    }

    fn term(&mut self) -> Result<Connection, ConnectionError> {
        let first = self.factor()?;
        // Upper bound of the AND expansion, checked before expanding it.
        let mut bound = first.single_alternatives().len();
        let mut items = vec![first];
        while self.eat('&') {
            let next = self.factor()?;
            bound = bound.saturating_mul(next.single_alternatives().len());
            if bound > MAX_ALTERNATIVES {
                return Err(self.too_many_alternatives());
            }
            items.push(next);
        }
        Connection::and(items)
    }

    fn factor(&mut self) -> Result<Connection, ConnectionError> {
        if self.eat('(') {
            if self.depth == MAX_NESTING {
                return Err(self.error("parentheses nested too deeply"));
            }
            self.depth += 1;
            let inner = self.expr()?;
            if !self.eat(')') {
                return Err(self.error("expected `)`"));
            }
            self.depth -= 1;
            return Ok(inner);
        }

        let first = self.ident()?;
        if first == BARE_KEYWORD {
            return Ok(Connection::bare());
        }
        let mut properties = vec![first];
        while self.eat('+') {
            let next = self.ident()?;
            if next == BARE_KEYWORD {
                return Err(self.error("`any` cannot be combined with properties"));
            }
            properties.push(next);
        }
        Ok(Connection::single(properties))
    }

    fn ident(&mut self) -> Result<&'a str, ConnectionError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected a property name, `any` or `(`"));
        }
        Ok(&self.input[start..self.pos])
    }
}
