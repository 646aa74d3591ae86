//! Name references and function macros of calculation expressions.

use crate::calc::lexer::Token;
use crate::error::{DbcopyError, Result};

/// Which run a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    Plain,
    Base,
    Variant,
}

/// A referenced name spanning tokens `start..end`, brackets included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRef {
    pub name: String,
    pub side: Side,
    pub start: usize,
    pub end: usize,
}

/// Find names accepted by `is_name`, with an optional `[base]` or
/// `[variant]` suffix. Names qualified by a dot are skipped.
///
/// # Errors
/// Returns `Syntax` for a bracket suffix other than `[base]`/`[variant]` or a
/// bracket after an unknown name.
pub fn find_refs(tokens: &[Token], is_name: impl Fn(&str) -> bool) -> Result<Vec<NameRef>> {
    let mut refs = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let Token::Ident(name) = &tokens[i] else {
            if tokens[i] == Token::LBracket {
                return Err(DbcopyError::syntax("unexpected [ in expression"));
            }
            i += 1;
            continue;
        };
        let qualified = (i > 0 && tokens[i - 1] == Token::Dot) || tokens.get(i + 1) == Some(&Token::Dot);
        let has_bracket = tokens.get(i + 1) == Some(&Token::LBracket);
        if qualified || !is_name(name) {
            if has_bracket {
                return Err(DbcopyError::syntax(format!("unknown name {name} before [")));
            }
            i += 1;
            continue;
        }
        if has_bracket {
            let side = match (tokens.get(i + 2), tokens.get(i + 3)) {
                (Some(t), Some(Token::RBracket)) if t.is_ident("base") => Side::Base,
                (Some(t), Some(Token::RBracket)) if t.is_ident("variant") => Side::Variant,
                _ => {
                    return Err(DbcopyError::syntax(format!(
                        "{name} must be followed by [base] or [variant]"
                    )))
                }
            };
            refs.push(NameRef { name: name.clone(), side, start: i, end: i + 4 });
            i += 4;
        } else {
            refs.push(NameRef { name: name.clone(), side: Side::Plain, start: i, end: i + 1 });
            i += 1;
        }
    }
    Ok(refs)
}

/// Validate the mixing rules and tell whether the expression compares runs.
///
/// # Errors
/// Returns `Syntax` when plain names are mixed with `[base]`/`[variant]`, when
/// only one of `[base]` and `[variant]` is used, or when nothing is referenced.
pub fn compare_mode(refs: &[NameRef], src: &str) -> Result<bool> {
    if refs.is_empty() {
        return Err(DbcopyError::syntax(format!("no names found in expression: {src}")));
    }
    let plain = refs.iter().any(|r| r.side == Side::Plain);
    let base = refs.iter().any(|r| r.side == Side::Base);
    let variant = refs.iter().any(|r| r.side == Side::Variant);
    if plain && (base || variant) {
        return Err(DbcopyError::syntax(format!(
            "cannot mix plain names with [base] or [variant] names: {src}"
        )));
    }
    if base != variant {
        return Err(DbcopyError::syntax(format!(
            "[base] and [variant] must be used together: {src}"
        )));
    }
    Ok(base)
}

/// Replace each reference by the text from `column`.
#[must_use]
pub fn replace_refs(tokens: &[Token], refs: &[NameRef], column: impl Fn(&NameRef) -> String) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    let mut next = refs.iter().peekable();
    while i < tokens.len() {
        if let Some(r) = next.peek() {
            if r.start == i {
                out.push(Token::Ident(column(r)));
                i = r.end;
                next.next();
                continue;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Macro {
    Denom,
    If,
    Avg,
    Sum,
    Count,
    Min,
    Max,
    Var,
    Sd,
}

impl Macro {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "OM_DENOM" => Some(Self::Denom),
            "OM_IF" => Some(Self::If),
            "OM_AVG" => Some(Self::Avg),
            "OM_SUM" => Some(Self::Sum),
            "OM_COUNT" => Some(Self::Count),
            "OM_MIN" => Some(Self::Min),
            "OM_MAX" => Some(Self::Max),
            "OM_VAR" => Some(Self::Var),
            "OM_SD" => Some(Self::Sd),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_aggregate(self) -> bool {
        !matches!(self, Self::Denom | Self::If)
    }

    fn arity(self) -> usize {
        if self == Self::If {
            3
        } else {
            1
        }
    }

    fn expand(self, args: &[String]) -> String {
        let x = args.first().map_or("", String::as_str);
        match self {
            Self::Denom => format!("CASE WHEN ABS({x}) > 1.0e-37 THEN {x} ELSE NULL END"),
            Self::If => format!(
                "CASE WHEN ({}) THEN ({}) ELSE ({}) END",
                args[0], args[1], args[2]
            ),
            Self::Avg => format!("AVG({x})"),
            Self::Sum => format!("SUM({x})"),
            Self::Count => format!("COUNT({x})"),
            Self::Min => format!("MIN({x})"),
            Self::Max => format!("MAX({x})"),
            Self::Var => variance(x),
            Self::Sd => format!("SQRT({})", variance(x)),
        }
    }
}

fn variance(x: &str) -> String {
    format!("((SUM(({x}) * ({x})) - SUM({x}) * SUM({x}) / COUNT({x})) / (COUNT({x}) - 1))")
}

/// Position of the `(` following a macro name at `at`, skipping blanks.
fn open_paren(tokens: &[Token], at: usize) -> Option<usize> {
    let mut j = at + 1;
    while j < tokens.len() && tokens[j].is_space() {
        j += 1;
    }
    (tokens.get(j) == Some(&Token::LParen)).then_some(j)
}

/// Arguments between `open` and its matching `)`, plus the index of that `)`.
pub fn split_args(tokens: &[Token], open: usize) -> Result<(Vec<&[Token]>, usize)> {
    let mut depth = 0_usize;
    let mut args = Vec::new();
    let mut arg_start = open + 1;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        match t {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    args.push(&tokens[arg_start..i]);
                    return Ok((args, i));
                }
            }
            Token::Comma if depth == 1 => {
                args.push(&tokens[arg_start..i]);
                arg_start = i + 1;
            }
            _ => {}
        }
    }
    Err(DbcopyError::syntax("unbalanced parentheses in function call"))
}

/// A top-level aggregation call found in an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggCall {
    pub start: usize,
    /// Index of the closing parenthesis.
    pub end: usize,
}

/// Aggregation macro calls not nested inside other aggregation calls.
///
/// # Errors
/// Returns `Syntax` when a macro has no argument list or aggregations nest.
pub fn find_aggregations(tokens: &[Token]) -> Result<Vec<AggCall>> {
    let mut calls = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if let Token::Ident(name) = &tokens[i] {
            if let Some(m) = Macro::from_name(name) {
                if m.is_aggregate() {
                    let open = open_paren(tokens, i)
                        .ok_or_else(|| DbcopyError::syntax(format!("{name} must be followed by (")))?;
                    let (_, close) = split_args(tokens, open)?;
                    let inner = &tokens[open + 1..close];
                    let nested = inner.iter().any(|t| {
                        matches!(t, Token::Ident(n) if Macro::from_name(n).is_some_and(Macro::is_aggregate))
                    });
                    if nested {
                        return Err(DbcopyError::syntax(format!("nested aggregation in {name}")));
                    }
                    calls.push(AggCall { start: i, end: close });
                    i = close + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    Ok(calls)
}

/// Expand `OM_` macros into SQL; returns the text and whether any
/// aggregation macro was used.
///
/// # Errors
/// Returns `Syntax` for a macro without parentheses or with a wrong argument count.
pub fn expand_macros(tokens: &[Token]) -> Result<(String, bool)> {
    let mut has_agg = false;
    let text = expand(tokens, &mut has_agg)?;
    Ok((text, has_agg))
}

fn expand(tokens: &[Token], has_agg: &mut bool) -> Result<String> {
    let mut out = String::new();
    let mut i = 0;
    while i < tokens.len() {
        if let Token::Ident(name) = &tokens[i] {
            if let Some(m) = Macro::from_name(name) {
                let open = open_paren(tokens, i)
                    .ok_or_else(|| DbcopyError::syntax(format!("{name} must be followed by (")))?;
                let (args, close) = split_args(tokens, open)?;
                if args.len() != m.arity() {
                    return Err(DbcopyError::syntax(format!(
                        "{name} expects {} argument(s), found {}",
                        m.arity(),
                        args.len()
                    )));
                }
                let mut texts = Vec::with_capacity(args.len());
                for a in args {
                    let text = expand(a, has_agg)?;
                    if text.trim().is_empty() {
                        return Err(DbcopyError::syntax(format!("empty argument of {name}")));
                    }
                    texts.push(text.trim().to_string());
                }
                if m.is_aggregate() {
                    *has_agg = true;
                }
                out.push_str(&m.expand(&texts));
                i = close + 1;
                continue;
            }
        }
        out.push_str(tokens[i].text());
        i += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::lexer::{emit, tokenize};

    fn is_expr(name: &str) -> bool {
        name == "Expr0" || name == "Expr1"
    }

    #[test]
    fn finds_plain_and_bracketed_names() -> anyhow::Result<()> {
        let t = tokenize("Expr0[base] + Expr1[variant] + ABS(x)")?;
        let refs = find_refs(&t, is_expr)?;
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].side, Side::Base);
        assert_eq!(refs[1].side, Side::Variant);
        assert!(compare_mode(&refs, "")?);
        let replaced = replace_refs(&t, &refs, |r| format!("X.{}", r.name));
        assert_eq!(emit(&replaced), "X.Expr0 + X.Expr1 + ABS(x)");
        Ok(())
    }

    #[test]
    fn mixing_rules_are_enforced() -> anyhow::Result<()> {
        for bad in ["Expr0 + Expr1[base]", "Expr0[base] + Expr1[base]", "Expr0[variant]", "1 + 2"] {
            let t = tokenize(bad)?;
            let refs = find_refs(&t, is_expr)?;
            assert!(compare_mode(&refs, bad).is_err(), "{bad}");
        }
        let t = tokenize("Expr0[other]")?;
        assert!(find_refs(&t, is_expr).is_err());
        Ok(())
    }

    #[test]
    fn macros_expand_recursively() -> anyhow::Result<()> {
        let t = tokenize("OM_IF(x > 0, OM_DENOM(y), 0)")?;
        let (sql, has_agg) = expand_macros(&t)?;
        assert_eq!(
            sql,
            "CASE WHEN (x > 0) THEN (CASE WHEN ABS(y) > 1.0e-37 THEN y ELSE NULL END) ELSE (0) END"
        );
        assert!(!has_agg);

        let t = tokenize("OM_AVG(a) - OM_SD(b)")?;
        let (sql, has_agg) = expand_macros(&t)?;
        assert!(has_agg);
        assert!(sql.starts_with("AVG(a) - SQRT(((SUM((b) * (b))"));
        Ok(())
    }

    #[test]
    fn macro_arguments_are_checked() -> anyhow::Result<()> {
        assert!(expand_macros(&tokenize("OM_IF(a, b)")?).is_err());
        assert!(expand_macros(&tokenize("OM_DENOM + 1")?).is_err());
        assert!(expand_macros(&tokenize("OM_AVG()")?).is_err());
        Ok(())
    }

    #[test]
    fn nested_aggregation_is_rejected() -> anyhow::Result<()> {
        assert!(find_aggregations(&tokenize("OM_AVG(OM_SUM(a))")?).is_err());
        let calls = find_aggregations(&tokenize("OM_AVG(a) + OM_MAX(b)")?)?;
        assert_eq!(calls.len(), 2);
        Ok(())
    }
}
