//! Tokenizer for calculation expressions.
//!
//! Whitespace is kept as tokens so that rewritten expressions re-emit the
//! user's spacing unchanged.

use crate::error::{DbcopyError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Number(String),
    /// Quoted literal including its quotes.
    Str(String),
    Op(String),
    LParen,
    RParen,
    Comma,
    Dot,
    LBracket,
    RBracket,
    Space(String),
}

impl Token {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Ident(s) | Self::Number(s) | Self::Str(s) | Self::Op(s) | Self::Space(s) => s,
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::LBracket => "[",
            Self::RBracket => "]",
        }
    }

    #[must_use]
    pub fn is_space(&self) -> bool {
        matches!(self, Self::Space(_))
    }

    #[must_use]
    pub fn is_ident(&self, name: &str) -> bool {
        matches!(self, Self::Ident(s) if s.eq_ignore_ascii_case(name))
    }
}

/// Keywords rejected anywhere outside quoted literals.
const UNSAFE_WORDS: [&str; 14] = [
    "DELETE", "INSERT", "UPDATE", "DROP", "ALTER", "CREATE", "ATTACH", "DETACH", "PRAGMA",
    "BEGIN", "COMMIT", "ROLLBACK", "REPLACE", "VACUUM",
];

/// Tokenize and reject unsafe SQL: statement separators, comments and
/// data-changing verbs outside quoted literals.
///
/// # Errors
/// Returns `Syntax` for unsafe input, an unterminated quote or an unexpected character.
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let cleaned: String = src
        .chars()
        .filter_map(|c| match c {
            '\t' | '\n' | '\r' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();
    if cleaned.trim().is_empty() {
        return Err(DbcopyError::syntax("expression is empty"));
    }

    let chars: Vec<char> = cleaned.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;
        if c == ' ' {
            while pos < chars.len() && chars[pos] == ' ' {
                pos += 1;
            }
            tokens.push(Token::Space(chars[start..pos].iter().collect()));
        } else if c == '\'' || c == '"' {
            pos += 1;
            loop {
                if pos >= chars.len() {
                    return Err(DbcopyError::syntax(format!("unterminated quoted literal in: {src}")));
                }
                if chars[pos] == c {
                    if chars.get(pos + 1) == Some(&c) {
                        pos += 2;
                        continue;
                    }
                    pos += 1;
                    break;
                }
                pos += 1;
            }
            tokens.push(Token::Str(chars[start..pos].iter().collect()));
        } else if c.is_ascii_alphabetic() || c == '_' {
            while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            let word: String = chars[start..pos].iter().collect();
            if UNSAFE_WORDS.iter().any(|w| w.eq_ignore_ascii_case(&word)) {
                return Err(DbcopyError::syntax(format!("unsafe sql keyword {word} in: {src}")));
            }
            tokens.push(Token::Ident(word));
        } else if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(char::is_ascii_digit)) {
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                let mut p = pos + 1;
                if p < chars.len() && (chars[p] == '+' || chars[p] == '-') {
                    p += 1;
                }
                if p < chars.len() && chars[p].is_ascii_digit() {
                    pos = p;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            tokens.push(Token::Number(chars[start..pos].iter().collect()));
        } else if "+-*/%<>=!|&^~".contains(c) {
            while pos < chars.len() && "+-*/%<>=!|&^~".contains(chars[pos]) {
                pos += 1;
            }
            let op: String = chars[start..pos].iter().collect();
            if op.contains("--") || op.contains("/*") || op.contains("*/") {
                return Err(DbcopyError::syntax(format!("sql comment is not allowed in: {src}")));
            }
            tokens.push(Token::Op(op));
        } else {
            pos += 1;
            tokens.push(match c {
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                '.' => Token::Dot,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                ';' => {
                    return Err(DbcopyError::syntax(format!("statement separator is not allowed in: {src}")))
                }
                other => {
                    return Err(DbcopyError::syntax(format!("unexpected character {other} in: {src}")))
                }
            });
        }
    }

    let mut depth = 0_i32;
    for t in &tokens {
        match t {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(DbcopyError::syntax(format!("unbalanced parentheses in: {src}")));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(DbcopyError::syntax(format!("unbalanced parentheses in: {src}")));
    }
    Ok(tokens)
}

/// Concatenate token text.
#[must_use]
pub fn emit(tokens: &[Token]) -> String {
    tokens.iter().map(Token::text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn splits_names_numbers_and_brackets() -> anyhow::Result<()> {
        let t = tokenize("Expr0[base] + 1.0e-37")?;
        assert_eq!(
            t,
            vec![
                Token::Ident("Expr0".into()),
                Token::LBracket,
                Token::Ident("base".into()),
                Token::RBracket,
                Token::Space(" ".into()),
                Token::Op("+".into()),
                Token::Space(" ".into()),
                Token::Number("1.0e-37".into()),
            ]
        );
        assert_eq!(emit(&t), "Expr0[base] + 1.0e-37");
        Ok(())
    }

    #[test]
    fn keywords_inside_quotes_are_allowed() -> anyhow::Result<()> {
        let t = tokenize("OM_IF(Expr0 = 'drop; --', 1, 2)")?;
        assert!(t.contains(&Token::Str("'drop; --'".into())));
        Ok(())
    }

    #[test]
    fn rejects_unsafe_input() {
        for bad in [
            "Expr0; DROP TABLE x",
            "Expr0 -- comment",
            "Expr0 /* c */",
            "delete from run_lst",
            "Expr0 + (1",
            "'open",
            "Expr0 @ 1",
        ] {
            assert!(tokenize(bad).is_err(), "{bad}");
        }
    }

    proptest! {
        #[test]
        fn any_unquoted_forbidden_word_is_rejected(
            word in prop::sample::select(vec!["DELETE", "insert", "Update", "DROP", "alter", "CREATE", "attach", "PRAGMA", "begin", "COMMIT", "rollback"]),
            prefix in "[a-z0-9 +]{0,8}",
        ) {
            let src = format!("Expr0 + {prefix} {word} x");
            prop_assert!(tokenize(&src).is_err());
        }

        #[test]
        fn separators_and_comments_are_rejected(sep in prop::sample::select(vec![";", "--", "/*", "*/"])) {
            let src = format!("Expr0 {sep} 1");
            prop_assert!(tokenize(&src).is_err());
        }
    }
}
