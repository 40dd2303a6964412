//! Statement signature builder
//!
//! Reduces a SQL++ statement to a grouping key: comments dropped, string,
//! numeric and parameter literals replaced by `?`, literal-only lists
//! (`USE KEYS [...]`, `IN (...)`, array and object literals) folded into a
//! single `?`, keywords uppercased, identifiers kept as written and
//! whitespace collapsed.
//!
//! The same token stream also yields a [`StatementShape`] used by the
//! insight rules.

use crate::services::query_analyzer::models::StatementShape;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ALL", "ALTER", "AND", "ANY", "ARRAY", "AS", "ASC", "BETWEEN", "BUILD", "BY", "CASE",
        "CREATE", "DELETE", "DESC", "DISTINCT", "DROP", "EACH", "ELEMENT", "ELSE", "END",
        "EVERY", "EXCEPT", "EXECUTE", "EXISTS", "EXPLAIN", "FALSE", "FIRST", "FOR", "FROM",
        "GRANT", "GROUP", "HAVING", "IF", "IN", "INDEX", "INFER", "INNER", "INSERT",
        "INTERSECT", "INTO", "IS", "JOIN", "KEY", "KEYS", "LEFT", "LET", "LETTING", "LIKE",
        "LIMIT", "MATCHED", "MERGE", "MISSING", "NEST", "NOT", "NULL", "OFFSET", "ON", "OR",
        "ORDER", "OUTER", "OVER", "PARTITION", "PREPARE", "PRIMARY", "RAW", "RETURNING",
        "REVOKE", "RIGHT", "SATISFIES", "SELECT", "SET", "SOME", "THEN", "TRUE", "UNION",
        "UNNEST", "UNSET", "UPDATE", "UPSERT", "USE", "USING", "VALUE", "VALUED", "VALUES",
        "WHEN", "WHERE", "WITH", "WITHIN", "ADVISE", "META", "COUNT", "SUM", "AVG", "MIN",
        "MAX", "ARRAY_AGG",
    ]
    .into_iter()
    .collect()
});

const AGGREGATE_FUNCTIONS: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX", "ARRAY_AGG"];

/// Canonical grouping key for a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementSignature {
    pub text: String,
    /// Hex hash of `text`
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Keyword(String),
    Ident(String),
    Quoted(String),
    StringLit(String),
    Number,
    Param,
    Punct(String),
}

impl Token {
    fn is_literal(&self) -> bool {
        matches!(self, Token::StringLit(_) | Token::Number | Token::Param)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self, Token::Keyword(k) if k == word)
    }

    fn is_punct(&self, symbol: &str) -> bool {
        matches!(self, Token::Punct(p) if p == symbol)
    }
}

/// Token after literal replacement
#[derive(Debug, Clone, PartialEq)]
enum Canonical {
    Placeholder,
    Word(String),
    Symbol(String),
}

impl Canonical {
    fn text(&self) -> &str {
        match self {
            Canonical::Placeholder => "?",
            Canonical::Word(w) => w,
            Canonical::Symbol(s) => s,
        }
    }

    fn is_symbol(&self, symbol: &str) -> bool {
        matches!(self, Canonical::Symbol(s) if s == symbol)
    }
}

pub struct SignatureBuilder;

impl SignatureBuilder {
    /// Signature and shape from one tokenization
    pub fn analyze(statement: &str) -> (StatementSignature, StatementShape) {
        let tokens = tokenize(statement);
        let shape = Self::shape_of(&tokens);
        let text = render(&collapse_literal_groups(canonicalize(&tokens)));
        (StatementSignature { id: signature_id(&text), text }, shape)
    }

    pub fn build(statement: &str) -> StatementSignature {
        Self::analyze(statement).0
    }

    pub fn shape(statement: &str) -> StatementShape {
        Self::shape_of(&tokenize(statement))
    }

    fn shape_of(tokens: &[Token]) -> StatementShape {
        let mut shape = StatementShape::default();

        for (i, token) in tokens.iter().enumerate() {
            let next = tokens.get(i + 1);
            let prev = i.checked_sub(1).and_then(|p| tokens.get(p));

            match token {
                Token::Keyword(k) if k == "WHERE" => shape.has_where = true,
                Token::Keyword(k) if k == "LIMIT" => shape.has_limit = true,
                Token::Keyword(k) if k == "GROUP" => {
                    if next.is_some_and(|n| n.is_keyword("BY")) {
                        shape.has_aggregate = true;
                    }
                },
                Token::Keyword(k) if k == "ORDER" => {
                    if next.is_some_and(|n| n.is_keyword("BY")) {
                        shape.has_order_by = true;
                    }
                },
                Token::Keyword(k) if AGGREGATE_FUNCTIONS.contains(&k.as_str()) => {
                    if next.is_some_and(|n| n.is_punct("(")) {
                        shape.has_aggregate = true;
                    }
                },
                Token::Keyword(k) if k == "USE" => {
                    let keys_at = if next.is_some_and(|n| n.is_keyword("PRIMARY")) { i + 2 } else { i + 1 };
                    if tokens.get(keys_at).is_some_and(|t| t.is_keyword("KEYS")) {
                        shape.uses_keys_clause = true;
                    }
                },
                Token::Keyword(k) if k == "LIKE" => {
                    if let Some(Token::StringLit(pattern)) = next
                        && (pattern.starts_with('%') || pattern.starts_with('_'))
                    {
                        shape.leading_wildcard_like = true;
                    }
                },
                Token::Punct(p) if p == "*" => {
                    let projects_all = prev.is_some_and(|t| {
                        t.is_keyword("SELECT")
                            || t.is_keyword("DISTINCT")
                            || t.is_keyword("ALL")
                            || t.is_keyword("RAW")
                            || t.is_punct(".")
                    });
                    if projects_all {
                        shape.select_star = true;
                    }
                },
                _ => {},
            }
        }

        shape
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a of the signature text; ids must not change across builds
fn signature_id(text: &str) -> String {
    let hash = text.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    format!("{:016x}", hash)
}

// ========================================
// Lexer
// ========================================

fn tokenize(statement: &str) -> Vec<Token> {
    let chars: Vec<char> = statement.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Line comment
        if c == '-' && next == Some('-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        // Block comment, unterminated runs to the end
        if c == '/' && next == Some('*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            continue;
        }

        if c == '\'' || c == '"' {
            let (content, end) = read_quoted(&chars, i, c);
            tokens.push(Token::StringLit(content));
            i = end;
            continue;
        }

        if c == '`' {
            let (content, end) = read_quoted(&chars, i, '`');
            tokens.push(Token::Quoted(format!("`{}`", content)));
            i = end;
            continue;
        }

        let starts_number = c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit()));
        let negative_number =
            c == '-' && next.is_some_and(|n| n.is_ascii_digit()) && expects_operand(tokens.last());
        if starts_number || negative_number {
            i = read_number(&chars, if negative_number { i + 1 } else { i });
            tokens.push(Token::Number);
            continue;
        }

        if c == '$' && next.is_some_and(|n| n.is_alphanumeric() || n == '_') {
            i += 1;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Param);
            continue;
        }

        if c == '?' {
            tokens.push(Token::Param);
            i += 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let upper = word.to_ascii_uppercase();
            if KEYWORDS.contains(upper.as_str()) {
                tokens.push(Token::Keyword(upper));
            } else {
                tokens.push(Token::Ident(word));
            }
            continue;
        }

        let pair: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        if matches!(pair.as_str(), "!=" | "<>" | "<=" | ">=" | "==" | "||") {
            tokens.push(Token::Punct(pair));
            i += 2;
        } else {
            tokens.push(Token::Punct(c.to_string()));
            i += 1;
        }
    }

    tokens
}

/// Read a quoted run starting at `start`; doubled quotes and backslashes escape
fn read_quoted(chars: &[char], start: usize, quote: char) -> (String, usize) {
    let mut content = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            content.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                content.push(quote);
                i += 2;
                continue;
            }
            return (content, i + 1);
        }
        content.push(c);
        i += 1;
    }

    (content, chars.len())
}

fn read_number(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

/// A leading `-` is a sign only where an operand is expected
fn expects_operand(previous: Option<&Token>) -> bool {
    match previous {
        None | Some(Token::Keyword(_)) => true,
        Some(Token::Punct(p)) => !matches!(p.as_str(), ")" | "]" | "}"),
        _ => false,
    }
}

// ========================================
// Canonical form
// ========================================

fn canonicalize(tokens: &[Token]) -> Vec<Canonical> {
    tokens
        .iter()
        .map(|token| match token {
            t if t.is_literal() => Canonical::Placeholder,
            Token::Keyword(k) => Canonical::Word(k.clone()),
            Token::Ident(w) | Token::Quoted(w) => Canonical::Word(w.clone()),
            Token::Punct(p) => Canonical::Symbol(p.clone()),
            _ => Canonical::Placeholder,
        })
        .collect()
}

fn closing_for(open: &str) -> Option<&'static str> {
    match open {
        "(" => Some(")"),
        "[" => Some("]"),
        "{" => Some("}"),
        _ => None,
    }
}

/// Fold bracket groups holding only literals into one placeholder
///
/// Brackets and braces always fold; parentheses fold after `KEYS`, `IN` or
/// `VALUES`, or when they hold a comma-separated list that is not a call's
/// argument list.
fn collapse_literal_groups(tokens: Vec<Canonical>) -> Vec<Canonical> {
    let mut out: Vec<Canonical> = Vec::with_capacity(tokens.len());
    let mut opens: Vec<usize> = Vec::new();

    for token in tokens {
        let Canonical::Symbol(symbol) = &token else {
            out.push(token);
            continue;
        };

        if closing_for(symbol).is_some() {
            opens.push(out.len());
            out.push(token);
            continue;
        }

        if matches!(symbol.as_str(), ")" | "]" | "}")
            && let Some(start) = opens.pop()
        {
            let open = out[start].text().to_string();
            let inner = &out[start + 1..];
            let balanced = closing_for(&open) == Some(symbol.as_str());
            let literal_only = inner.iter().any(|t| *t == Canonical::Placeholder)
                && inner
                    .iter()
                    .all(|t| *t == Canonical::Placeholder || t.is_symbol(",") || t.is_symbol(":"));

            if balanced && literal_only {
                let previous = start.checked_sub(1).and_then(|p| out.get(p));
                let after_list_keyword = previous.is_some_and(|p| {
                    matches!(p, Canonical::Word(w) if w == "KEYS" || w == "IN" || w == "VALUES")
                });
                let after_call = matches!(previous, Some(Canonical::Word(_))) && !after_list_keyword;
                let has_comma = inner.iter().any(|t| t.is_symbol(","));

                let fold = open != "("
                    || after_list_keyword
                    || (has_comma && !after_call);
                if fold {
                    out.truncate(start);
                    out.push(Canonical::Placeholder);
                    continue;
                }
            }
        }

        out.push(token);
    }

    out
}

fn render(tokens: &[Canonical]) -> String {
    let mut text = String::new();
    let mut previous: Option<&Canonical> = None;

    for token in tokens {
        let current = token.text();
        let glue_left = matches!(current, "," | ")" | "]" | "}" | "." | ":");
        let glue_right = matches!(previous.map(Canonical::text), Some("(" | "[" | "{" | "."));
        // Function calls render as name(args)
        let glue_call = current == "("
            && matches!(previous, Some(Canonical::Word(w))
                if !KEYWORDS.contains(w.as_str()) || AGGREGATE_FUNCTIONS.contains(&w.as_str()) || w == "META");
        if !text.is_empty() && !glue_left && !glue_right && !glue_call {
            text.push(' ');
        }
        text.push_str(current);
        previous = Some(token);
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_do_not_change_signature() {
        let a = SignatureBuilder::build("SELECT * FROM b WHERE id=1");
        let b = SignatureBuilder::build("SELECT * FROM b WHERE id=2");
        assert_eq!(a, b);
        assert_eq!(a.text, "SELECT * FROM b WHERE id = ?");
    }

    #[test]
    fn test_string_literals_and_params() {
        let a = SignatureBuilder::build("select name from users where city = 'Paris' and age > $min");
        let b = SignatureBuilder::build("SELECT name FROM users WHERE city = \"Berlin\" AND age > 30");
        assert_eq!(a.text, b.text);
        assert_eq!(a.text, "SELECT name FROM users WHERE city = ? AND age > ?");
    }

    #[test]
    fn test_identifiers_keep_case() {
        let sig = SignatureBuilder::build("select `Type`, firstName from `travel-sample` where Type = 'x'");
        assert_eq!(sig.text, "SELECT `Type`, firstName FROM `travel-sample` WHERE Type = ?");
    }

    #[test]
    fn test_use_keys_lists_group_by_shape() {
        let one = SignatureBuilder::build("SELECT * FROM b USE KEYS 'k1'");
        let many = SignatureBuilder::build("SELECT * FROM b USE KEYS ['k1', 'k2', 'k3']");
        let parens = SignatureBuilder::build("SELECT * FROM b USE KEYS (\"k9\")");
        assert_eq!(one.text, "SELECT * FROM b USE KEYS ?");
        assert_eq!(one, many);
        assert_eq!(one, parens);
    }

    #[test]
    fn test_in_lists_fold() {
        let a = SignatureBuilder::build("SELECT * FROM b WHERE id IN [1, 2]");
        let b = SignatureBuilder::build("SELECT * FROM b WHERE id IN (3, 4, 5, 6)");
        assert_eq!(a.text, "SELECT * FROM b WHERE id IN ?");
        assert_eq!(a, b);
    }

    #[test]
    fn test_function_arguments_are_not_folded() {
        let sig = SignatureBuilder::build("SELECT COUNT(1), ROUND(2.5, 1) FROM b");
        assert_eq!(sig.text, "SELECT COUNT(?), ROUND(?, ?) FROM b");
    }

    #[test]
    fn test_object_literals_fold() {
        let a = SignatureBuilder::build("UPSERT INTO b (KEY, VALUE) VALUES ('k1', {'a': 1, 'b': [1, 2]})");
        let b = SignatureBuilder::build("UPSERT INTO b (KEY, VALUE) VALUES ('k2', {'a': 7, 'b': []})");
        // An empty array holds no literal and stays as written
        assert_ne!(a.text, b.text);
        assert_eq!(a.text, "UPSERT INTO b(KEY, VALUE) VALUES ?");
    }

    #[test]
    fn test_comments_and_whitespace() {
        let a = SignatureBuilder::build("SELECT  a\n\tFROM b -- trailing\n WHERE x = 1 /* note */");
        let b = SignatureBuilder::build("SELECT a FROM b WHERE x = 99");
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_numbers() {
        let a = SignatureBuilder::build("SELECT * FROM b WHERE x = -5");
        let b = SignatureBuilder::build("SELECT * FROM b WHERE x = 5");
        assert_eq!(a, b);

        let minus = SignatureBuilder::build("SELECT a - 5 FROM b");
        assert_eq!(minus.text, "SELECT a - ? FROM b");
    }

    #[test]
    fn test_escaped_quotes() {
        let a = SignatureBuilder::build("SELECT * FROM b WHERE n = 'O''Brien'");
        let b = SignatureBuilder::build("SELECT * FROM b WHERE n = 'it\\'s'");
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_id_is_stable() {
        let a = SignatureBuilder::build("SELECT 1");
        let b = SignatureBuilder::build("select 2");
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 16);
    }

    #[test]
    fn test_signature_id_uses_fnv1a() {
        assert_eq!(signature_id(""), "cbf29ce484222325");
        assert_eq!(signature_id("a"), "af63dc4c8601ec8c");
        assert_eq!(signature_id("foobar"), "85944171f73967e8");
    }

    #[test]
    fn test_shape_detection() {
        let shape = SignatureBuilder::shape("SELECT * FROM b WHERE name LIKE '%son' ORDER BY name LIMIT 10");
        assert!(shape.select_star);
        assert!(shape.has_where);
        assert!(shape.leading_wildcard_like);
        assert!(shape.has_order_by);
        assert!(shape.has_limit);
        assert!(!shape.has_aggregate);

        let agg = SignatureBuilder::shape("SELECT COUNT(*) FROM b");
        assert!(agg.has_aggregate);
        assert!(!agg.select_star);
        assert!(!agg.has_where);

        let keys = SignatureBuilder::shape("SELECT b.* FROM b USE PRIMARY KEYS ['a']");
        assert!(keys.uses_keys_clause);
        assert!(keys.select_star);

        let prefix = SignatureBuilder::shape("SELECT a FROM b WHERE name LIKE 'son%'");
        assert!(!prefix.leading_wildcard_like);
    }
}
