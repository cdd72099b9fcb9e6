//! Parser for the store's selector grammar.
//!
//! Supported requirement forms, comma-separated:
//! `k=v`, `k==v`, `k!=v`, `k`, `!k`, `k in (a,b)`, `k notin (a,b)`.
//! `in`/`notin` are keywords, as in the upstream grammar.

use crate::{QueryError, SelectorClause};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Equals,
    NotEquals,
    In,
    NotIn,
    Bang,
    LParen,
    RParen,
    Comma,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')
}

fn lex(input: &str) -> Result<Vec<Token>, QueryError> {
    let err = |c: char| QueryError::InvalidSelector(format!("unexpected {c:?} in {input:?}"));
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            ',' => tokens.push(Token::Comma),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '=' => {
                // `=` and `==` are the same operator
                if chars.peek() == Some(&'=') {
                    chars.next();
                }
                tokens.push(Token::Equals);
            }
            '!' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEquals);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            c if is_ident_char(c) => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    ident.push(next);
                    chars.next();
                }
                tokens.push(match ident.as_str() {
                    "in" => Token::In,
                    "notin" => Token::NotIn,
                    _ => Token::Ident(ident),
                });
            }
            other => return Err(err(other)),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn fail<T>(&self, what: &str) -> Result<T, QueryError> {
        Err(QueryError::InvalidSelector(format!("{what} in {:?}", self.input)))
    }

    fn ident(&mut self, what: &str) -> Result<String, QueryError> {
        match self.next() {
            Some(Token::Ident(s)) => Ok(s),
            _ => self.fail(what),
        }
    }

    fn values(&mut self) -> Result<Vec<String>, QueryError> {
        if self.next() != Some(Token::LParen) {
            return self.fail("expected value list");
        }
        let mut values = vec![self.ident("expected value")?];
        loop {
            match self.next() {
                Some(Token::RParen) => return Ok(values),
                Some(Token::Comma) => values.push(self.ident("expected value")?),
                _ => return self.fail("unterminated value list"),
            }
        }
    }

    fn requirement(&mut self) -> Result<SelectorClause, QueryError> {
        if self.peek() == Some(&Token::Bang) {
            self.next();
            let key = self.ident("expected key after '!'")?;
            return Ok(SelectorClause::NotExists { key });
        }
        let key = self.ident("expected key")?;
        match self.peek() {
            None | Some(Token::Comma) => Ok(SelectorClause::Exists { key }),
            Some(Token::Equals) => {
                self.next();
                Ok(SelectorClause::Equals { key, value: self.value()? })
            }
            Some(Token::NotEquals) => {
                self.next();
                Ok(SelectorClause::NotEquals { key, value: self.value()? })
            }
            Some(Token::In) => {
                self.next();
                Ok(SelectorClause::In { key, values: self.values()? })
            }
            Some(Token::NotIn) => {
                self.next();
                Ok(SelectorClause::NotIn { key, values: self.values()? })
            }
            Some(_) => self.fail("unexpected token after key"),
        }
    }

    // A value may be empty: `k=` filters for an empty label value.
    fn value(&mut self) -> Result<String, QueryError> {
        match self.peek() {
            Some(Token::Ident(_)) => self.ident("expected value"),
            None | Some(Token::Comma) => Ok(String::new()),
            Some(_) => self.fail("expected value"),
        }
    }
}

pub(crate) fn parse_selector(input: &str) -> Result<Vec<SelectorClause>, QueryError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0, input };
    let mut clauses = Vec::new();
    if parser.peek().is_none() {
        return Ok(clauses);
    }
    loop {
        clauses.push(parser.requirement()?);
        match parser.next() {
            None => return Ok(clauses),
            Some(Token::Comma) => {}
            Some(_) => return parser.fail("expected ',' between requirements"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Vec<SelectorClause> {
        parse_selector(input).unwrap()
    }

    #[test]
    fn parses_equality_forms() {
        assert_eq!(
            parse("a=b"),
            vec![SelectorClause::Equals { key: "a".into(), value: "b".into() }]
        );
        assert_eq!(parse("a==b"), parse("a=b"));
        assert_eq!(
            parse("a != b"),
            vec![SelectorClause::NotEquals { key: "a".into(), value: "b".into() }]
        );
    }

    #[test]
    fn parses_existence_forms() {
        assert_eq!(parse("a"), vec![SelectorClause::Exists { key: "a".into() }]);
        assert_eq!(parse("!a"), vec![SelectorClause::NotExists { key: "a".into() }]);
    }

    #[test]
    fn parses_set_forms() {
        assert_eq!(
            parse("env in (dev, prod)"),
            vec![SelectorClause::In {
                key: "env".into(),
                values: vec!["dev".into(), "prod".into()]
            }]
        );
        assert_eq!(
            parse("env notin (prod)"),
            vec![SelectorClause::NotIn { key: "env".into(), values: vec!["prod".into()] }]
        );
    }

    #[test]
    fn parses_compound_selector() {
        let clauses = parse("a=1,!b, c in (x,y), d");
        assert_eq!(clauses.len(), 4);
        assert_eq!(clauses[3], SelectorClause::Exists { key: "d".into() });
    }

    #[test]
    fn allows_empty_value() {
        assert_eq!(
            parse("a=,b=2"),
            vec![
                SelectorClause::Equals { key: "a".into(), value: String::new() },
                SelectorClause::Equals { key: "b".into(), value: "2".into() },
            ]
        );
    }

    #[test]
    fn allows_qualified_keys() {
        assert_eq!(
            parse("example.com/role=admin"),
            vec![SelectorClause::Equals {
                key: "example.com/role".into(),
                value: "admin".into()
            }]
        );
    }

    #[test]
    fn empty_input_is_the_empty_selector() {
        assert_eq!(parse(""), vec![]);
        assert_eq!(parse("   "), vec![]);
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in [
            "a in ()",
            "a in b",
            "=b",
            "a=b=c",
            "a,,b",
            "(a)",
            "a in (b",
            "a @ b",
            "!",
        ] {
            assert!(
                parse_selector(bad).is_err(),
                "expected parse failure for {bad:?}"
            );
        }
    }

    #[test]
    fn in_is_a_keyword_not_a_key() {
        assert!(parse_selector("in=(a)").is_err());
    }
}
