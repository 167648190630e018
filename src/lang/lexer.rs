//! Tokenizer for `.snip` sources
//!
//! Go-style: a newline after an identifier, literal, `return`, `break`,
//! `continue`, `++`, `--`, `)`, `]` or `}` becomes an implicit `;`.

use super::ParseError;

/// Source position (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Int(i64),
    Str(String),

    // Keywords
    Package,
    Import,
    Func,
    Return,
    If,
    Else,
    For,
    Range,
    Switch,
    Case,
    Default,
    Var,
    Const,
    Defer,
    Break,
    Continue,
    Map,

    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Not,
    Assign,
    Define,
    PlusAssign,
    MinusAssign,
    Inc,
    Dec,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,

    Eof,
}

impl Tok {
    fn keyword(word: &str) -> Option<Tok> {
        Some(match word {
            "package" => Tok::Package,
            "import" => Tok::Import,
            "func" => Tok::Func,
            "return" => Tok::Return,
            "if" => Tok::If,
            "else" => Tok::Else,
            "for" => Tok::For,
            "range" => Tok::Range,
            "switch" => Tok::Switch,
            "case" => Tok::Case,
            "default" => Tok::Default,
            "var" => Tok::Var,
            "const" => Tok::Const,
            "defer" => Tok::Defer,
            "break" => Tok::Break,
            "continue" => Tok::Continue,
            "map" => Tok::Map,
            _ => return None,
        })
    }

    /// Whether a newline directly after this token ends the statement
    fn ends_statement(&self) -> bool {
        matches!(
            self,
            Tok::Ident(_)
                | Tok::Int(_)
                | Tok::Str(_)
                | Tok::Return
                | Tok::Break
                | Tok::Continue
                | Tok::Inc
                | Tok::Dec
                | Tok::RParen
                | Tok::RBracket
                | Tok::RBrace
        )
    }
}

/// A token with its starting position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub pos: Pos,
}

/// Lexer over a single source file
pub struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    idx: usize,
    line: usize,
    col: usize,
    last: Option<Tok>,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a str, source: &str) -> Self {
        Self {
            file,
            chars: source.chars().collect(),
            idx: 0,
            line: 1,
            col: 1,
            last: None,
        }
    }

    /// Tokenize the whole input
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.tok == Tok::Eof;
            self.last = Some(token.tok.clone());
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, pos: Pos, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            file: self.file.to_string(),
            pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.idx + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.idx).copied()?;
        self.idx += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
        }
    }

    fn auto_semi(&self) -> bool {
        self.last.as_ref().is_some_and(Tok::ends_statement)
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        // Skip whitespace and comments, emitting `;` for significant newlines
        loop {
            match self.peek() {
                Some('\n') => {
                    let pos = self.pos();
                    self.bump();
                    if self.auto_semi() {
                        return Ok(Token { tok: Tok::Semi, pos });
                    }
                }
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let pos = self.pos();
                    self.bump();
                    self.bump();
                    let mut saw_newline = false;
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some('\n') => saw_newline = true,
                            Some(_) => {}
                            None => return Err(self.error(pos, "unterminated block comment")),
                        }
                    }
                    if saw_newline && self.auto_semi() {
                        return Ok(Token { tok: Tok::Semi, pos });
                    }
                }
                _ => break,
            }
        }

        let pos = self.pos();
        let Some(c) = self.bump() else {
            // A final statement without trailing newline still needs its `;`
            if self.auto_semi() {
                return Ok(Token { tok: Tok::Semi, pos });
            }
            return Ok(Token { tok: Tok::Eof, pos });
        };

        let tok = match c {
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(c) = self.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        word.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                Tok::keyword(&word).unwrap_or(Tok::Ident(word))
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::from(c);
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() || c == '_' {
                        if c != '_' {
                            digits.push(c);
                        }
                        self.bump();
                    } else {
                        break;
                    }
                }
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| self.error(pos, format!("integer literal out of range: {}", digits)))?;
                Tok::Int(value)
            }
            '"' => Tok::Str(self.interpreted_string(pos)?),
            '`' => {
                let mut s = String::new();
                loop {
                    match self.bump() {
                        Some('`') => break,
                        Some(c) => s.push(c),
                        None => return Err(self.error(pos, "unterminated raw string")),
                    }
                }
                Tok::Str(s)
            }
            '+' => match self.peek() {
                Some('+') => self.take(Tok::Inc),
                Some('=') => self.take(Tok::PlusAssign),
                _ => Tok::Plus,
            },
            '-' => match self.peek() {
                Some('-') => self.take(Tok::Dec),
                Some('=') => self.take(Tok::MinusAssign),
                _ => Tok::Minus,
            },
            '*' => Tok::Star,
            '/' => Tok::Slash,
            '%' => Tok::Percent,
            '=' => match self.peek() {
                Some('=') => self.take(Tok::Eq),
                _ => Tok::Assign,
            },
            '!' => match self.peek() {
                Some('=') => self.take(Tok::NotEq),
                _ => Tok::Not,
            },
            '<' => match self.peek() {
                Some('=') => self.take(Tok::LtEq),
                _ => Tok::Lt,
            },
            '>' => match self.peek() {
                Some('=') => self.take(Tok::GtEq),
                _ => Tok::Gt,
            },
            '&' if self.peek() == Some('&') => self.take(Tok::AndAnd),
            '|' if self.peek() == Some('|') => self.take(Tok::OrOr),
            ':' => match self.peek() {
                Some('=') => self.take(Tok::Define),
                _ => Tok::Colon,
            },
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            ',' => Tok::Comma,
            ';' => Tok::Semi,
            '.' => Tok::Dot,
            other => return Err(self.error(pos, format!("unexpected character '{}'", other))),
        };

        Ok(Token { tok, pos })
    }

    fn take(&mut self, tok: Tok) -> Tok {
        self.bump();
        tok
    }

    fn interpreted_string(&mut self, start: Pos) -> Result<String, ParseError> {
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(s),
                Some('\\') => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| self.error(start, "unterminated string literal"))?;
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        other => {
                            return Err(self.error(start, format!("unknown escape sequence '\\{}'", other)))
                        }
                    });
                }
                Some('\n') | None => return Err(self.error(start, "unterminated string literal")),
                Some(c) => s.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        Lexer::new("t.snip", src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_semicolon_insertion() {
        let tokens = toks("x := 1\ny++\n");
        assert_eq!(
            tokens,
            vec![
                Tok::Ident("x".into()),
                Tok::Define,
                Tok::Int(1),
                Tok::Semi,
                Tok::Ident("y".into()),
                Tok::Inc,
                Tok::Semi,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_no_semicolon_after_operator() {
        let tokens = toks("a +\nb");
        assert_eq!(
            tokens,
            vec![
                Tok::Ident("a".into()),
                Tok::Plus,
                Tok::Ident("b".into()),
                Tok::Semi,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_comments() {
        let tokens = toks("\"a\\tb\" // trailing\n`raw\\n`");
        assert_eq!(tokens[0], Tok::Str("a\tb".into()));
        assert_eq!(tokens[1], Tok::Semi);
        assert_eq!(tokens[2], Tok::Str("raw\\n".into()));
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("t.snip", "\"abc").tokenize().unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }
}
