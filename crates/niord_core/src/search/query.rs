//! Free-text query parser for the message index.
//!
//! Accepts a Lucene-flavoured syntax and lowers it to an FTS5 `MATCH`
//! expression:
//!
//! - bare terms are optional (default OR); `+term` is required and
//!   `-term`/`NOT term` excluded; `AND`/`&&` and `OR`/`||` join clauses
//! - `"quoted phrases"` and `( grouped clauses )`
//! - `title:` and `content:` restrict a term, phrase or group to a column
//! - `light*` is a prefix query; `*ight`, `b?oy` and `li*t` are expanded
//!   over the index vocabulary, also inside phrases

use crate::search::{SearchError, SearchResult};

/// Upper bound on terms substituted for one wildcard pattern.
pub const MAX_WILDCARD_EXPANSIONS: usize = 256;
/// Upper bound on phrase variants produced by wildcards inside one phrase.
const MAX_PHRASE_VARIANTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    Should,
    Must,
    MustNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryField {
    Title,
    Content,
}

impl QueryField {
    pub fn column(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Content => "content",
        }
    }

    fn from_prefix(word: &str) -> Option<(Self, &str)> {
        let (name, rest) = word.split_once(':')?;
        let field = match name.to_ascii_lowercase().as_str() {
            "title" => Self::Title,
            "content" => Self::Content,
            _ => return None,
        };
        Some((field, rest))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Term {
        field: Option<QueryField>,
        text: String,
    },
    Phrase {
        field: Option<QueryField>,
        text: String,
    },
    Group {
        field: Option<QueryField>,
        clauses: Vec<Clause>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub occur: Occur,
    pub node: QueryNode,
}

/// Parsed query ready to be lowered to FTS5 syntax.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub clauses: Vec<Clause>,
}

/// Vocabulary lookup for wildcard patterns. Receives a `LIKE` pattern with
/// `\` as escape character and returns matching index terms.
pub type TermExpander<'a> = dyn FnMut(&str) -> SearchResult<Vec<String>> + 'a;

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Lowers the query to an FTS5 `MATCH` expression.
    ///
    /// Returns `None` when the query cannot match anything, e.g. only
    /// negative clauses or a required wildcard without vocabulary hits.
    pub fn to_match_expression(
        &self,
        expand: &mut TermExpander<'_>,
    ) -> SearchResult<Option<String>> {
        clauses_expression(&self.clauses, None, expand)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Plus,
    Minus,
    And,
    Or,
    Not,
    Field(QueryField),
    Phrase(String),
    Word(String),
}

/// Parses user query text.
pub fn parse_query(text: &str) -> SearchResult<ParsedQuery> {
    let tokens = tokenize(text)?;
    let mut parser = QueryParser {
        source: text,
        tokens,
        pos: 0,
    };
    let clauses = parser.parse_clauses(false)?;
    Ok(ParsedQuery { clauses })
}

fn invalid(query: &str, message: impl Into<String>) -> SearchError {
    SearchError::InvalidQuery {
        query: query.to_string(),
        message: message.into(),
    }
}

fn tokenize(text: &str) -> SearchResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    // Words swallow inner `+` and `-`, so operators only ever start a token.
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        match ch {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' | '!' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '"' => {
                let mut phrase = String::new();
                let mut j = i + 1;
                while j < chars.len() && chars[j] != '"' {
                    phrase.push(chars[j]);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(invalid(text, "unterminated phrase"));
                }
                tokens.push(Token::Phrase(phrase));
                i = j + 1;
            }
            _ => {
                let mut word = String::new();
                while i < chars.len()
                    && !chars[i].is_whitespace()
                    && !matches!(chars[i], '(' | ')' | '"')
                {
                    word.push(chars[i]);
                    i += 1;
                }
                match word.as_str() {
                    "AND" | "&&" => tokens.push(Token::And),
                    "OR" | "||" => tokens.push(Token::Or),
                    "NOT" => tokens.push(Token::Not),
                    _ => match QueryField::from_prefix(&word) {
                        Some((field, rest)) => {
                            tokens.push(Token::Field(field));
                            if !rest.is_empty() {
                                tokens.push(Token::Word(rest.to_string()));
                            }
                        }
                        None => tokens.push(Token::Word(word)),
                    },
                }
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conjunction {
    And,
    Or,
}

struct QueryParser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl QueryParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_clauses(&mut self, nested: bool) -> SearchResult<Vec<Clause>> {
        let mut clauses: Vec<Clause> = Vec::new();
        let mut conjunction: Option<Conjunction> = None;

        loop {
            match self.peek() {
                None if nested => return Err(invalid(self.source, "missing `)`")),
                None => break,
                Some(Token::RParen) if nested => {
                    self.pos += 1;
                    break;
                }
                Some(Token::RParen) => return Err(invalid(self.source, "unbalanced `)`")),
                Some(Token::And) | Some(Token::Or) => {
                    if clauses.is_empty() || conjunction.is_some() {
                        return Err(invalid(self.source, "misplaced AND/OR"));
                    }
                    conjunction = match self.next() {
                        Some(Token::And) => Some(Conjunction::And),
                        _ => Some(Conjunction::Or),
                    };
                    continue;
                }
                Some(_) => {}
            }

            let mut occur = match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    Occur::Must
                }
                Some(Token::Minus) | Some(Token::Not) => {
                    self.pos += 1;
                    Occur::MustNot
                }
                _ => Occur::Should,
            };
            let node = self.parse_primary(None)?;

            if conjunction.take() == Some(Conjunction::And) {
                if let Some(previous) = clauses.last_mut() {
                    if previous.occur == Occur::Should {
                        previous.occur = Occur::Must;
                    }
                }
                if occur == Occur::Should {
                    occur = Occur::Must;
                }
            }
            clauses.push(Clause { occur, node });
        }

        if conjunction.is_some() {
            return Err(invalid(self.source, "dangling AND/OR"));
        }
        Ok(clauses)
    }

    fn parse_primary(&mut self, field: Option<QueryField>) -> SearchResult<QueryNode> {
        match self.next() {
            Some(Token::Field(inner)) => {
                if field.is_some() {
                    return Err(invalid(self.source, "nested field prefix"));
                }
                self.parse_primary(Some(inner))
            }
            Some(Token::LParen) => Ok(QueryNode::Group {
                field,
                clauses: self.parse_clauses(true)?,
            }),
            Some(Token::Phrase(text)) => Ok(QueryNode::Phrase { field, text }),
            Some(Token::Word(text)) => Ok(QueryNode::Term { field, text }),
            Some(other) => Err(invalid(
                self.source,
                format!("unexpected operator {other:?}"),
            )),
            None => Err(invalid(self.source, "unexpected end of query")),
        }
    }
}

fn clauses_expression(
    clauses: &[Clause],
    field: Option<QueryField>,
    expand: &mut TermExpander<'_>,
) -> SearchResult<Option<String>> {
    let mut must = Vec::new();
    let mut should = Vec::new();
    let mut must_not = Vec::new();

    for clause in clauses {
        let expression = node_expression(&clause.node, field, expand)?;
        match (clause.occur, expression) {
            (Occur::Must, None) => return Ok(None),
            (Occur::Must, Some(expr)) => must.push(expr),
            (Occur::Should, Some(expr)) => should.push(expr),
            (Occur::MustNot, Some(expr)) => must_not.push(expr),
            (Occur::Should, None) | (Occur::MustNot, None) => {}
        }
    }

    // Optional clauses do not restrict matching once a required one exists.
    let positive = if !must.is_empty() {
        join(&must, "AND")
    } else if !should.is_empty() {
        join(&should, "OR")
    } else {
        return Ok(None);
    };

    Ok(Some(must_not.iter().fold(positive, |expr, excluded| {
        format!("({expr}) NOT ({excluded})")
    })))
}

fn node_expression(
    node: &QueryNode,
    inherited: Option<QueryField>,
    expand: &mut TermExpander<'_>,
) -> SearchResult<Option<String>> {
    let (field, expression) = match node {
        QueryNode::Term { field, text } => (field.or(inherited), term_expression(text, expand)?),
        QueryNode::Phrase { field, text } => {
            (field.or(inherited), phrase_expression(text, expand)?)
        }
        // The group applies its own column filter to the whole expression.
        QueryNode::Group { field, clauses } => {
            return clauses_expression(clauses, field.or(inherited), expand);
        }
    };

    Ok(expression.map(|expr| match field {
        Some(field) => format!("{} : ({expr})", field.column()),
        None => expr,
    }))
}

fn join(items: &[String], operator: &str) -> String {
    if items.len() == 1 {
        return items[0].clone();
    }
    items
        .iter()
        .map(|item| format!("({item})"))
        .collect::<Vec<_>>()
        .join(&format!(" {operator} "))
}

fn has_wildcard(text: &str) -> bool {
    text.contains(['*', '?'])
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// Expression for one word: plain string, FTS5 prefix, or expansion.
fn term_expression(text: &str, expand: &mut TermExpander<'_>) -> SearchResult<Option<String>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    Ok(word_alternatives(text, expand)?.map(|alternatives| join(&alternatives, "OR")))
}

/// FTS5 phrase alternatives for one word. `None` when nothing can match.
fn word_alternatives(
    word: &str,
    expand: &mut TermExpander<'_>,
) -> SearchResult<Option<Vec<String>>> {
    if !has_wildcard(word) {
        return Ok(Some(vec![quote(word)]));
    }

    let stem = word.trim_end_matches('*');
    if !stem.is_empty() && !has_wildcard(stem) {
        return Ok(Some(vec![format!("{}*", quote(stem))]));
    }

    if word.chars().all(|ch| matches!(ch, '*' | '?')) {
        return Ok(None);
    }

    let mut terms = expand(&like_pattern(word))?;
    terms.truncate(MAX_WILDCARD_EXPANSIONS);
    if terms.is_empty() {
        return Ok(None);
    }
    Ok(Some(terms.iter().map(|term| quote(term)).collect()))
}

fn phrase_expression(text: &str, expand: &mut TermExpander<'_>) -> SearchResult<Option<String>> {
    let words = text.split_whitespace().collect::<Vec<_>>();
    if words.is_empty() {
        return Ok(None);
    }
    if !words.iter().any(|word| has_wildcard(word)) {
        return Ok(Some(quote(&words.join(" "))));
    }

    // Each variant is an FTS5 phrase built with `+` so every word may carry
    // its own prefix marker.
    let mut variants: Vec<Vec<String>> = vec![Vec::new()];
    for word in words {
        let Some(alternatives) = word_alternatives(word, expand)? else {
            return Ok(None);
        };
        let mut next = Vec::new();
        'outer: for variant in &variants {
            for alternative in &alternatives {
                if next.len() >= MAX_PHRASE_VARIANTS {
                    break 'outer;
                }
                let mut extended = variant.clone();
                extended.push(alternative.clone());
                next.push(extended);
            }
        }
        variants = next;
    }

    let phrases = variants
        .into_iter()
        .map(|parts| parts.join(" + "))
        .collect::<Vec<_>>();
    Ok(Some(join(&phrases, "OR")))
}

/// Converts `*`/`?` wildcards to a lowercase SQL `LIKE` pattern escaped with `\`.
pub fn like_pattern(word: &str) -> String {
    let mut pattern = String::with_capacity(word.len());
    for ch in word.to_lowercase().chars() {
        match ch {
            '*' => pattern.push('%'),
            '?' => pattern.push('_'),
            '%' | '_' | '\\' => {
                pattern.push('\\');
                pattern.push(ch);
            }
            other => pattern.push(other),
        }
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(text: &str) -> Option<String> {
        let parsed = parse_query(text).unwrap();
        parsed
            .to_match_expression(&mut |pattern: &str| -> SearchResult<Vec<String>> {
                Ok(match pattern {
                    "%ight" => vec!["light".to_string(), "night".to_string()],
                    _ => Vec::new(),
                })
            })
            .unwrap()
    }

    #[test]
    fn bare_terms_default_to_or() {
        assert_eq!(lower("buoy light").as_deref(), Some("(\"buoy\") OR (\"light\")"));
    }

    #[test]
    fn and_makes_both_sides_required() {
        assert_eq!(
            lower("buoy AND light wreck").as_deref(),
            Some("(\"buoy\") AND (\"light\")")
        );
    }

    #[test]
    fn excluded_terms_wrap_positive_expression() {
        assert_eq!(
            lower("+buoy -wreck").as_deref(),
            Some("(\"buoy\") NOT (\"wreck\")")
        );
        assert_eq!(lower("-wreck"), None);
    }

    #[test]
    fn trailing_wildcard_is_prefix_and_leading_is_expanded() {
        assert_eq!(lower("lig*").as_deref(), Some("\"lig\"*"));
        assert_eq!(
            lower("*ight").as_deref(),
            Some("(\"light\") OR (\"night\")")
        );
        assert_eq!(lower("+*zzz buoy"), None);
    }

    #[test]
    fn field_prefix_and_phrase() {
        assert_eq!(
            lower("title:\"north sea\"").as_deref(),
            Some("title : (\"north sea\")")
        );
        assert_eq!(
            lower("content:(buoy OR wreck)").as_deref(),
            Some("(content : (\"buoy\")) OR (content : (\"wreck\"))")
        );
    }

    #[test]
    fn minus_inside_word_is_literal() {
        assert_eq!(lower("DK-123").as_deref(), Some("\"DK-123\""));
    }

    #[test]
    fn unbalanced_parenthesis_is_invalid() {
        assert!(matches!(
            parse_query("(buoy"),
            Err(SearchError::InvalidQuery { .. })
        ));
        assert!(matches!(
            parse_query("buoy AND"),
            Err(SearchError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn like_pattern_escapes_sql_wildcards() {
        assert_eq!(like_pattern("*10%_?"), "%10\\%\\__");
    }
}
