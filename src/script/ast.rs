use crate::escape::Escaper;

/// AST node types for `@{...}` scripts
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text, written as is
    Text(String),

    /// `@{expr}` or `@{!expr}`
    Output { expr: Expression, raw: bool },

    /// `@{if}`...`@{elif}`...`@{else}`...`@{fi}`
    Conditional {
        condition: Expression,
        then_branch: Vec<Node>,
        else_if_branches: Vec<(Expression, Vec<Node>)>,
        else_branch: Option<Vec<Node>>,
    },

    /// `@{foreach item in collection}`...`@{end}`
    Loop {
        item_name: String,
        collection: Expression,
        body: Vec<Node>,
    },

    Break,
    Continue,

    /// Zero-based position in the innermost loop
    Index,

    /// Print through a one-off chain of built-in escapers
    Escape {
        value: Expression,
        stages: Vec<Escaper>,
    },

    /// Render another template in place
    Include(Expression),

    /// Inline a resource file verbatim
    Resource(Expression),

    /// Abort the script
    Raise(Expression),
}

/// Expression types for conditions and values
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,

    /// Bare name: a loop item, `this`, or an extracted binding
    Variable(String),

    /// Property access (e.g., `this.user.name`, `items.0`)
    PropertyAccess {
        object: Box<Expression>,
        property: String,
    },

    Array(Vec<Expression>),

    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },

    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },

    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    And,
    Or,

    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

/// A parsed script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub nodes: Vec<Node>,
}

impl Template {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

impl Expression {
    /// Build a property access chain from a dotted path
    pub fn from_path(path: &str) -> Self {
        let mut parts = path.split('.');
        let root = parts.next().unwrap_or_default();

        parts.fold(Expression::Variable(root.to_string()), |object, part| {
            Expression::PropertyAccess {
                object: Box::new(object),
                property: part.to_string(),
            }
        })
    }

    /// Parse a literal, returning `None` for anything else
    pub fn parse_literal(value: &str) -> Option<Self> {
        let trimmed = value.trim();

        match trimmed {
            "true" => return Some(Expression::Boolean(true)),
            "false" => return Some(Expression::Boolean(false)),
            "null" => return Some(Expression::Null),
            _ => {}
        }

        if trimmed.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return trimmed.parse::<f64>().ok().map(Expression::Number);
        }

        let quoted = trimmed.len() >= 2
            && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
                || (trimmed.starts_with('\'') && trimmed.ends_with('\'')));
        if quoted {
            return Some(Expression::String(unescape(&trimmed[1..trimmed.len() - 1])));
        }

        None
    }
}

fn unescape(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
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
