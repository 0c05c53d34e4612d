use crate::error::{Error, Result};
use std::fmt;

/// Token types for `@{...}` scripts
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),

    // Interpolation
    Output(String),    // @{expr}
    RawOutput(String), // @{!expr}

    // Control flow
    If(String),     // @{if condition}
    ElseIf(String), // @{elif condition}
    Else,           // @{else}
    Fi,             // @{fi}

    // Loops
    Foreach(String, String), // @{foreach item in collection}
    End,                     // @{end}
    Break,                   // @{break}
    Continue,                // @{continue}
    Index,                   // @{index}

    // Engine calls, raw argument text
    Escape(String),   // @{escape(expr, 'name', ...)}
    Include(String),  // @{include('name')}
    Resource(String), // @{resource('name')}
    Raise(String),    // @{raise('message')}

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Text(_) => write!(f, "text"),
            TokenKind::Output(e) => write!(f, "@{{{}}}", e),
            TokenKind::RawOutput(e) => write!(f, "@{{!{}}}", e),
            TokenKind::If(c) => write!(f, "@{{if {}}}", c),
            TokenKind::ElseIf(c) => write!(f, "@{{elif {}}}", c),
            TokenKind::Else => write!(f, "@{{else}}"),
            TokenKind::Fi => write!(f, "@{{fi}}"),
            TokenKind::Foreach(i, c) => write!(f, "@{{foreach {} in {}}}", i, c),
            TokenKind::End => write!(f, "@{{end}}"),
            TokenKind::Break => write!(f, "@{{break}}"),
            TokenKind::Continue => write!(f, "@{{continue}}"),
            TokenKind::Index => write!(f, "@{{index}}"),
            TokenKind::Escape(a) => write!(f, "@{{escape({})}}", a),
            TokenKind::Include(a) => write!(f, "@{{include({})}}", a),
            TokenKind::Resource(a) => write!(f, "@{{resource({})}}", a),
            TokenKind::Raise(a) => write!(f, "@{{raise({})}}", a),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Self { kind, line, column }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.kind, self.line, self.column)
    }
}

/// Splits a script into text and directives
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let input: Vec<char> = input.chars().collect();
        let current_char = input.first().copied();

        Self {
            input,
            position: 0,
            current_char,
            line: 1,
            column: 1,
        }
    }

    fn advance(&mut self) {
        if self.current_char == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn is_directive_start(&self) -> bool {
        self.current_char == Some('@') && self.peek() == Some('{')
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current_char, Some(ch) if ch.is_whitespace()) {
            self.advance();
        }
    }

    /// Read up to the `}` closing the current directive
    ///
    /// Braces nest and quoted strings may contain `}`.
    fn read_directive_body(&mut self, line: usize, column: usize) -> Result<String> {
        let mut result = String::new();
        let mut brace_depth = 0usize;
        let mut quote: Option<char> = None;
        let mut escaped = false;

        while let Some(ch) = self.current_char {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            } else {
                match ch {
                    '\'' | '"' => quote = Some(ch),
                    '{' => brace_depth += 1,
                    '}' if brace_depth == 0 => {
                        self.advance();
                        return Ok(result);
                    }
                    '}' => brace_depth -= 1,
                    _ => {}
                }
            }

            result.push(ch);
            self.advance();
        }

        Err(Error::template(format!(
            "Unterminated directive opened at {}:{}",
            line, column
        )))
    }

    fn read_text(&mut self) -> String {
        let mut result = String::new();

        while let Some(ch) = self.current_char {
            if self.is_directive_start() {
                break;
            }
            result.push(ch);
            self.advance();
        }

        result
    }

    fn parse_directive(&mut self) -> Result<Token> {
        let line = self.line;
        let column = self.column;

        self.advance(); // @
        self.advance(); // {
        self.skip_whitespace();

        if self.current_char == Some('!') {
            self.advance();
            let expr = self.read_directive_body(line, column)?.trim().to_string();
            return Ok(Token::new(TokenKind::RawOutput(expr), line, column));
        }

        let content = self.read_directive_body(line, column)?;
        let kind = Self::parse_directive_content(content.trim())
            .map_err(|msg| Error::template(format!("{} at {}:{}", msg, line, column)))?;
        Ok(Token::new(kind, line, column))
    }

    /// Classify the text between `@{` and `}`
    fn parse_directive_content(content: &str) -> std::result::Result<TokenKind, String> {
        match content {
            "else" => return Ok(TokenKind::Else),
            "fi" => return Ok(TokenKind::Fi),
            "end" => return Ok(TokenKind::End),
            "break" => return Ok(TokenKind::Break),
            "continue" => return Ok(TokenKind::Continue),
            "index" => return Ok(TokenKind::Index),
            _ => {}
        }

        if let Some(condition) = content.strip_prefix("if ") {
            return Ok(TokenKind::If(condition.trim().to_string()));
        }

        if let Some(condition) = content.strip_prefix("elif ") {
            return Ok(TokenKind::ElseIf(condition.trim().to_string()));
        }

        if let Some(rest) = content.strip_prefix("foreach ") {
            return match rest.split_once(" in ") {
                Some((item, collection)) => Ok(TokenKind::Foreach(
                    item.trim().to_string(),
                    collection.trim().to_string(),
                )),
                None => Err(format!("Expected 'foreach <item> in <collection>', got '{}'", content)),
            };
        }

        let calls: [(&str, fn(String) -> TokenKind); 4] = [
            ("escape", TokenKind::Escape),
            ("include", TokenKind::Include),
            ("resource", TokenKind::Resource),
            ("raise", TokenKind::Raise),
        ];
        for (name, kind) in calls {
            if let Some(args) = call_args(content, name) {
                return Ok(kind(args.trim().to_string()));
            }
        }

        Ok(TokenKind::Output(content.to_string()))
    }

    pub fn next_token(&mut self) -> Result<Token> {
        if self.current_char.is_none() {
            return Ok(Token::new(TokenKind::Eof, self.line, self.column));
        }

        if self.is_directive_start() {
            return self.parse_directive();
        }

        let line = self.line;
        let column = self.column;
        let text = self.read_text();
        Ok(Token::new(TokenKind::Text(text), line, column))
    }

    /// Tokenize the entire input, ending with `Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }
}

/// Arguments of `name(...)` when `content` is exactly such a call
fn call_args<'c>(content: &'c str, name: &str) -> Option<&'c str> {
    content
        .strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}
