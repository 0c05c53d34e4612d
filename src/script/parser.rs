use super::ast::{BinaryOperator, Expression, Node, Template, UnaryOperator};
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::{Error, Result};
use crate::escape::{Escaper, BUILTINS};

/// Operator precedence levels, loosest binding first
const PRECEDENCE_LEVELS: &[&[(&str, BinaryOperator)]] = &[
    &[("||", BinaryOperator::Or)],
    &[("&&", BinaryOperator::And)],
    &[("==", BinaryOperator::Equal), ("!=", BinaryOperator::NotEqual)],
    &[
        ("<=", BinaryOperator::LessThanOrEqual),
        (">=", BinaryOperator::GreaterThanOrEqual),
        ("<", BinaryOperator::LessThan),
        (">", BinaryOperator::GreaterThan),
    ],
    &[("+", BinaryOperator::Add), ("-", BinaryOperator::Subtract)],
    &[
        ("*", BinaryOperator::Multiply),
        ("/", BinaryOperator::Divide),
        ("%", BinaryOperator::Modulo),
    ],
];

/// Deepest nesting of blocks or sub-expressions a script may use
pub const MAX_NESTING_DEPTH: usize = 128;

/// Bytes after which an operator sign is unary rather than binary
const OPERATOR_BYTES: &[u8] = b"+-*/%<>=!&|(,[";

/// Builds a [`Template`] from script tokens
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    loop_depth: usize,
    block_depth: usize,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self> {
        let tokens = Lexer::new(input).tokenize()?;
        Ok(Self::from_tokens(tokens))
    }

    pub fn from_tokens(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
            let (line, column) = tokens.last().map(|t| (t.line, t.column)).unwrap_or((1, 1));
            tokens.push(Token::new(TokenKind::Eof, line, column));
        }
        Self {
            tokens,
            position: 0,
            loop_depth: 0,
            block_depth: 0,
        }
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn advance(&mut self) {
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
    }

    fn unexpected(&self, context: &str) -> Error {
        Error::template(format!("Unexpected {} {}", self.current(), context))
    }

    /// Parse the entire script
    pub fn parse(&mut self) -> Result<Template> {
        let nodes = self.parse_nodes()?;
        if self.current().kind != TokenKind::Eof {
            return Err(self.unexpected("outside of any block"));
        }
        Ok(Template::new(nodes))
    }

    /// Parse nodes up to a block terminator or the end of input
    fn parse_nodes(&mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();

        loop {
            if matches!(
                self.current().kind,
                TokenKind::Eof
                    | TokenKind::ElseIf(_)
                    | TokenKind::Else
                    | TokenKind::Fi
                    | TokenKind::End
            ) {
                return Ok(nodes);
            }
            nodes.push(self.parse_node()?);
        }
    }

    fn parse_node(&mut self) -> Result<Node> {
        let token = self.current().clone();
        let node = match token.kind.clone() {
            TokenKind::Text(text) => Node::Text(text),
            TokenKind::Output(expr) => Node::Output {
                expr: parse_expression(&expr).map_err(|e| at(&token, e))?,
                raw: false,
            },
            TokenKind::RawOutput(expr) => Node::Output {
                expr: parse_expression(&expr).map_err(|e| at(&token, e))?,
                raw: true,
            },
            TokenKind::If(_) | TokenKind::Foreach(..)
                if self.block_depth >= MAX_NESTING_DEPTH =>
            {
                return Err(Error::template(format!("{} nested too deeply", token)));
            }
            TokenKind::If(condition) => {
                self.block_depth += 1;
                let node = self.parse_conditional(&token, &condition);
                self.block_depth -= 1;
                return node;
            }
            TokenKind::Foreach(item, collection) => {
                self.block_depth += 1;
                let node = self.parse_loop(&token, item, &collection);
                self.block_depth -= 1;
                return node;
            }
            TokenKind::Break | TokenKind::Continue if self.loop_depth == 0 => {
                return Err(Error::template(format!("{} outside of a loop", token)));
            }
            TokenKind::Break => Node::Break,
            TokenKind::Continue => Node::Continue,
            TokenKind::Index => Node::Index,
            TokenKind::Escape(args) => {
                let args = split_args(&args);
                let (value, names) = args
                    .split_first()
                    .ok_or_else(|| Error::template(format!("{} needs a value", token)))?;
                let stages = names
                    .iter()
                    .map(|name| match Expression::parse_literal(name) {
                        Some(Expression::String(name)) => Escaper::builtin(&name)
                            .map_err(|_| {
                                Error::template(format!(
                                    "Unknown escaper '{}' in {} (available: {})",
                                    name,
                                    token,
                                    BUILTINS.join(", ")
                                ))
                            }),
                        _ => Err(Error::template(format!(
                            "Escaper names must be string literals in {}",
                            token
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Node::Escape {
                    value: parse_expression(value).map_err(|e| at(&token, e))?,
                    stages,
                }
            }
            TokenKind::Include(args) => Node::Include(single_arg(&token, &args)?),
            TokenKind::Resource(args) => Node::Resource(single_arg(&token, &args)?),
            TokenKind::Raise(args) => Node::Raise(single_arg(&token, &args)?),
            TokenKind::ElseIf(_) | TokenKind::Else | TokenKind::Fi | TokenKind::End => {
                return Err(self.unexpected("without a matching opening block"));
            }
            TokenKind::Eof => return Err(self.unexpected("while parsing")),
        };

        self.advance();
        Ok(node)
    }

    fn parse_conditional(&mut self, opening: &Token, condition: &str) -> Result<Node> {
        let condition = parse_expression(condition).map_err(|e| at(opening, e))?;
        self.advance();

        let then_branch = self.parse_nodes()?;
        let mut else_if_branches = Vec::new();
        let mut else_branch: Option<Vec<Node>> = None;

        loop {
            let token = self.current().clone();
            match token.kind.clone() {
                TokenKind::ElseIf(cond) if else_branch.is_none() => {
                    let cond = parse_expression(&cond).map_err(|e| at(&token, e))?;
                    self.advance();
                    else_if_branches.push((cond, self.parse_nodes()?));
                }
                TokenKind::Else if else_branch.is_none() => {
                    self.advance();
                    else_branch = Some(self.parse_nodes()?);
                }
                TokenKind::Fi => {
                    self.advance();
                    break;
                }
                _ => {
                    return Err(Error::template(format!(
                        "Unclosed {}, found {}",
                        opening,
                        self.current()
                    )))
                }
            }
        }

        Ok(Node::Conditional {
            condition,
            then_branch,
            else_if_branches,
            else_branch,
        })
    }

    fn parse_loop(&mut self, opening: &Token, item_name: String, collection: &str) -> Result<Node> {
        if !is_identifier(&item_name) {
            return Err(Error::template(format!(
                "Invalid loop variable '{}' in {}",
                item_name, opening
            )));
        }
        let collection = parse_expression(collection).map_err(|e| at(opening, e))?;
        self.advance();

        self.loop_depth += 1;
        let body = self.parse_nodes();
        self.loop_depth -= 1;
        let body = body?;

        if self.current().kind != TokenKind::End {
            return Err(Error::template(format!(
                "Unclosed {}, found {}",
                opening,
                self.current()
            )));
        }
        self.advance();

        Ok(Node::Loop {
            item_name,
            collection,
            body,
        })
    }
}

fn at(token: &Token, err: Error) -> Error {
    match err {
        Error::Template(msg) => Error::template(format!("{} in {}", msg, token)),
        other => other,
    }
}

fn single_arg(token: &Token, args: &str) -> Result<Expression> {
    match split_args(args).as_slice() {
        [arg] => parse_expression(arg).map_err(|e| at(token, e)),
        _ => Err(Error::template(format!("{} takes exactly one argument", token))),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Parse an expression from its source text
pub fn parse_expression(expr: &str) -> Result<Expression> {
    parse_nested(expr, 0)
}

fn parse_nested(expr: &str, depth: usize) -> Result<Expression> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::template("Expression nested too deeply"));
    }
    let nested = |inner: &str| parse_nested(inner, depth + 1);
    let trimmed = expr.trim();

    if trimmed.is_empty() {
        return Err(Error::template("Empty expression"));
    }

    // Grouping parentheses around the whole expression
    if trimmed.starts_with('(') && matching_close(trimmed, 0) == Some(trimmed.len() - 1) {
        return nested(&trimmed[1..trimmed.len() - 1]);
    }

    if let Some((pos, op, len)) = find_operator(trimmed) {
        let left = trimmed[..pos].trim();
        let right = trimmed[pos + len..].trim();
        if right.is_empty() {
            return Err(Error::template(format!(
                "Missing right operand in '{}'",
                trimmed
            )));
        }
        return Ok(Expression::BinaryOp {
            left: Box::new(nested(left)?),
            op,
            right: Box::new(nested(right)?),
        });
    }

    if let Some(operand) = trimmed.strip_prefix('!') {
        return Ok(Expression::UnaryOp {
            op: UnaryOperator::Not,
            operand: Box::new(nested(operand)?),
        });
    }

    if let Some(operand) = trimmed.strip_prefix('-') {
        return Ok(Expression::UnaryOp {
            op: UnaryOperator::Minus,
            operand: Box::new(nested(operand)?),
        });
    }

    if let Some(literal) = Expression::parse_literal(trimmed) {
        return Ok(literal);
    }

    if let Some(items) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let items = split_args(items)
            .into_iter()
            .map(nested)
            .collect::<Result<Vec<_>>>()?;
        return Ok(Expression::Array(items));
    }

    if let Some(paren) = trimmed.find('(') {
        let name = trimmed[..paren].trim();
        if is_identifier(name) && matching_close(trimmed, paren) == Some(trimmed.len() - 1) {
            let args = split_args(&trimmed[paren + 1..trimmed.len() - 1])
                .into_iter()
                .map(nested)
                .collect::<Result<Vec<_>>>()?;
            return Ok(Expression::FunctionCall {
                name: name.to_string(),
                args,
            });
        }
    }

    let mut segments = trimmed.split('.');
    let valid_root = segments.next().is_some_and(is_identifier);
    let valid_rest = segments.all(|s| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_'));
    if valid_root && valid_rest {
        return Ok(Expression::from_path(trimmed));
    }

    Err(Error::template(format!("Invalid expression '{}'", trimmed)))
}

/// Walk `expr` outside of quotes, calling `visit` with each byte position and
/// the bracket depth before that byte
fn scan(expr: &str, mut visit: impl FnMut(usize, i32) -> bool) {
    let bytes = expr.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }

        if !visit(i, depth) {
            return;
        }

        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            _ => {}
        }
    }
}

/// Position of the bracket closing the one at `open`
fn matching_close(expr: &str, open: usize) -> Option<usize> {
    let bytes = expr.as_bytes();
    let mut found = None;

    scan(expr, |i, depth| {
        if i > open && depth == 1 && matches!(bytes[i], b')' | b']') {
            found = Some(i);
            return false;
        }
        true
    });

    found
}

/// Split call arguments on top-level commas
fn split_args(args: &str) -> Vec<&str> {
    let bytes = args.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;

    scan(args, |i, depth| {
        if depth == 0 && bytes[i] == b',' {
            parts.push(args[start..i].trim());
            start = i + 1;
        }
        true
    });

    let last = args[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

/// Find the loosest binding operator, rightmost first so operators associate left
fn find_operator(expr: &str) -> Option<(usize, BinaryOperator, usize)> {
    PRECEDENCE_LEVELS
        .iter()
        .find_map(|operators| find_operator_at_level(expr, operators))
}

fn find_operator_at_level(
    expr: &str,
    operators: &[(&str, BinaryOperator)],
) -> Option<(usize, BinaryOperator, usize)> {
    let bytes = expr.as_bytes();
    let mut found = None;
    let mut skip_until = 0;

    scan(expr, |i, depth| {
        if depth != 0 || i < skip_until {
            return true;
        }
        for (symbol, op) in operators {
            if bytes[i..].starts_with(symbol.as_bytes()) && is_binary_at(bytes, i, symbol.len()) {
                found = Some((i, *op, symbol.len()));
                skip_until = i + symbol.len();
                break;
            }
        }
        true
    });

    found
}

fn is_binary_at(bytes: &[u8], pos: usize, len: usize) -> bool {
    let before = bytes[..pos].iter().rev().find(|b| !b.is_ascii_whitespace());
    let after = bytes.get(pos + len);

    match before {
        None => false,
        Some(b) if OPERATOR_BYTES.contains(b) => false,
        // a one-byte sign directly followed by `=` belongs to a longer operator
        _ => len == 2 || !matches!(after, Some(b'=')),
    }
}
