use crate::query_ast::{
    canonical_field, AstNode, BinaryOp, CompareOp, FunctionArg, FunctionOp, LiteralValue,
    RegexLiteral,
};
use once_cell::sync::Lazy;
use regex::Regex;

/// A single parse diagnostic, positioned in the original query string.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ParseError {
    pub message: String,
    /// Character offset into the query.
    pub position: usize,
    /// Token text the parser was looking at, empty at end of input.
    pub token: String,
}

/// Parser output. `ast` is present when at least a prefix of the query
/// parsed; `errors` collects everything that went wrong along the way.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub ast: Option<AstNode>,
    pub is_legacy_text_search: bool,
    pub original: String,
    pub errors: Vec<ParseError>,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Str(String),
    Regex { pattern: String, flags: String },
    Num(f64),
    Ident(String),
    And,
    Or,
    Not,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    LParen,
    RParen,
    Dot,
    Comma,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    position: usize,
    text: String,
}

static RE_LEGACY_OPERATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[=<>!]").unwrap());
static RE_LEGACY_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(and|or|not)\b").unwrap());
static RE_LEGACY_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(contains|startswith|endswith|matches)\s*\(").unwrap());

/// A query with no operators, boolean keywords, or function calls is plain
/// text and goes down the relevance-ranked search path instead.
pub fn is_legacy_text_query(query: &str) -> bool {
    !RE_LEGACY_OPERATOR.is_match(query)
        && !RE_LEGACY_KEYWORD.is_match(query)
        && !RE_LEGACY_FUNCTION.is_match(query)
}

pub fn parse(query: &str) -> ParsedQuery {
    let original = query.to_string();
    if is_legacy_text_query(query) {
        return ParsedQuery {
            ast: None,
            is_legacy_text_search: true,
            original,
            errors: Vec::new(),
        };
    }

    let tokens = lex(query);
    let mut parser = Parser {
        tokens,
        pos: 0,
        errors: Vec::new(),
    };
    let ast = parser.parse_or();
    // Trailing tokens after a complete expression are ignored.
    ParsedQuery {
        ast,
        is_legacy_text_search: false,
        original,
        errors: parser.errors,
    }
}

// Lexer

fn lex(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '"' || c == '\'' {
            let (s, next) = lex_string(&chars, i, c);
            tokens.push(Token {
                kind: TokenKind::Str(s.clone()),
                position: start,
                text: s,
            });
            i = next;
            continue;
        }

        if c == '/' {
            if let Some((pattern, flags, next)) = lex_regex(&chars, i) {
                tokens.push(Token {
                    kind: TokenKind::Regex {
                        pattern: pattern.clone(),
                        flags: flags.clone(),
                    },
                    position: start,
                    text: format!("/{pattern}/{flags}"),
                });
                i = next;
                continue;
            }
            // Lone slash: skip it like any other unknown character.
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && peek_digit(&chars, i + 1)) {
            let mut j = i;
            while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                j += 1;
            }
            let text: String = chars[i..j].iter().collect();
            let num = parse_float_prefix(&text);
            tokens.push(Token {
                kind: TokenKind::Num(num),
                position: start,
                text,
            });
            i = j;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let mut j = i;
            while j < chars.len()
                && (chars[j].is_ascii_alphanumeric() || chars[j] == '_' || chars[j] == '-')
            {
                j += 1;
            }
            let text: String = chars[i..j].iter().collect();
            let kind = match text.to_lowercase().as_str() {
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                _ => TokenKind::Ident(text.clone()),
            };
            tokens.push(Token {
                kind,
                position: start,
                text,
            });
            i = j;
            continue;
        }

        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let (kind, len) = match two.as_str() {
            "!=" => (Some(TokenKind::Ne), 2),
            ">=" => (Some(TokenKind::Ge), 2),
            "<=" => (Some(TokenKind::Le), 2),
            _ => match c {
                '=' => (Some(TokenKind::Eq), 1),
                '>' => (Some(TokenKind::Gt), 1),
                '<' => (Some(TokenKind::Lt), 1),
                '(' => (Some(TokenKind::LParen), 1),
                ')' => (Some(TokenKind::RParen), 1),
                '.' => (Some(TokenKind::Dot), 1),
                ',' => (Some(TokenKind::Comma), 1),
                _ => (None, 1),
            },
        };
        if let Some(kind) = kind {
            tokens.push(Token {
                kind,
                position: start,
                text: chars[i..i + len].iter().collect(),
            });
        }
        // Unknown characters are skipped silently.
        i += len;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: chars.len(),
        text: String::new(),
    });
    tokens
}

fn peek_digit(chars: &[char], i: usize) -> bool {
    chars.get(i).map(|c| c.is_ascii_digit()).unwrap_or(false)
}

/// Quoted string; only the quote character itself can be backslash-escaped.
/// An unterminated string runs to end of input.
fn lex_string(chars: &[char], start: usize, quote: char) -> (String, usize) {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '\\' && chars.get(i + 1) == Some(&quote) {
            out.push(quote);
            i += 2;
        } else if chars[i] == quote {
            return (out, i + 1);
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    (out, i)
}

/// `/pattern/flags` literal. Returns None when no closing slash exists so
/// the caller can treat the slash as noise.
fn lex_regex(chars: &[char], start: usize) -> Option<(String, String, usize)> {
    let mut pattern = String::new();
    let mut i = start + 1;
    loop {
        let c = *chars.get(i)?;
        if c == '\\' && chars.get(i + 1) == Some(&'/') {
            pattern.push('/');
            i += 2;
        } else if c == '/' {
            i += 1;
            break;
        } else {
            pattern.push(c);
            i += 1;
        }
    }
    let mut flags = String::new();
    while let Some(&c) = chars.get(i) {
        if matches!(c, 'g' | 'i' | 'm' | 's' | 'u' | 'v' | 'y') {
            flags.push(c);
            i += 1;
        } else {
            break;
        }
    }
    Some((pattern, flags, i))
}

/// Longest numeric prefix, parseFloat-style. The lexer only feeds digit/dot
/// runs here, so a bad tail like "1.2.3" still yields 1.2.
fn parse_float_prefix(text: &str) -> f64 {
    if let Ok(n) = text.parse::<f64>() {
        return n;
    }
    let mut end = text.len();
    while end > 0 {
        end -= 1;
        if let Ok(n) = text[..end].parse::<f64>() {
            return n;
        }
    }
    0.0
}

// Recursive-descent parser: OR < AND < NOT < primary.

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&mut self, message: impl Into<String>) {
        let tok = self.peek().clone();
        self.errors.push(ParseError {
            message: message.into(),
            position: tok.position,
            token: tok.text,
        });
    }

    fn parse_or(&mut self) -> Option<AstNode> {
        let mut left = self.parse_and()?;
        while matches!(self.peek().kind, TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = AstNode::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Some(left)
    }

    fn parse_and(&mut self) -> Option<AstNode> {
        let mut left = self.parse_not()?;
        while matches!(self.peek().kind, TokenKind::And) {
            self.advance();
            let right = self.parse_not()?;
            left = AstNode::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Some(left)
    }

    fn parse_not(&mut self) -> Option<AstNode> {
        if matches!(self.peek().kind, TokenKind::Not) {
            self.advance();
            let inner = self.parse_not()?;
            return Some(AstNode::Not {
                inner: Box::new(inner),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Option<AstNode> {
        match self.peek().kind.clone() {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                if matches!(self.peek().kind, TokenKind::RParen) {
                    self.advance();
                } else {
                    self.error("expected closing parenthesis");
                    return None;
                }
                Some(inner)
            }
            TokenKind::Ident(_) => self.parse_field_expression(),
            _ => {
                self.error("expected a field name or parenthesized expression");
                None
            }
        }
    }

    /// `field op literal` or `func(field, arg)`. Fields are dot paths.
    fn parse_field_expression(&mut self) -> Option<AstNode> {
        let first = self.advance();
        let TokenKind::Ident(name) = first.kind else {
            unreachable!()
        };

        if matches!(self.peek().kind, TokenKind::LParen) {
            if let Some(func) = FunctionOp::from_ident(&name) {
                return self.parse_call(func);
            }
            self.error(format!("unknown function `{name}`"));
            return None;
        }

        let field = canonical_field(&self.parse_dot_path(name));
        let op = match self.peek().kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Ge => CompareOp::Ge,
            TokenKind::Le => CompareOp::Le,
            _ => {
                self.error(format!("expected a comparison operator after `{field}`"));
                return None;
            }
        };
        self.advance();

        let value = self.parse_literal()?;
        Some(AstNode::Compare { op, field, value })
    }

    fn parse_call(&mut self, func: FunctionOp) -> Option<AstNode> {
        self.advance(); // (

        let field = match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                canonical_field(&self.parse_dot_path(name))
            }
            _ => {
                self.error("expected a field name inside function call");
                return None;
            }
        };

        if matches!(self.peek().kind, TokenKind::Comma) {
            self.advance();
        } else {
            self.error("expected `,` between function arguments");
            return None;
        }

        let arg = match self.peek().kind.clone() {
            TokenKind::Regex { pattern, flags } => {
                self.advance();
                FunctionArg::Regex(RegexLiteral { pattern, flags })
            }
            _ => FunctionArg::Literal(self.parse_literal()?),
        };

        if matches!(self.peek().kind, TokenKind::RParen) {
            self.advance();
        } else {
            self.error("expected closing parenthesis after function arguments");
            return None;
        }

        Some(AstNode::Call { func, field, arg })
    }

    fn parse_dot_path(&mut self, first: String) -> String {
        let mut path = first;
        while matches!(self.peek().kind, TokenKind::Dot) {
            self.advance();
            match self.peek().kind.clone() {
                TokenKind::Ident(seg) => {
                    self.advance();
                    path.push('.');
                    path.push_str(&seg);
                }
                _ => {
                    self.error("expected an identifier after `.`");
                    break;
                }
            }
        }
        path
    }

    fn parse_literal(&mut self) -> Option<LiteralValue> {
        match self.peek().kind.clone() {
            TokenKind::Str(s) => {
                self.advance();
                Some(LiteralValue::Str(s))
            }
            TokenKind::Num(n) => {
                self.advance();
                Some(LiteralValue::Num(n))
            }
            TokenKind::Ident(word) => {
                self.advance();
                match word.as_str() {
                    "true" => Some(LiteralValue::Bool(true)),
                    "false" => Some(LiteralValue::Bool(false)),
                    // Bare words compare as strings.
                    _ => Some(LiteralValue::Str(word)),
                }
            }
            _ => {
                self.error("expected a literal value");
                None
            }
        }
    }
}
