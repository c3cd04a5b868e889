use colored::Colorize;
use std::{fmt, rc::Rc};

/// All token kinds recognized by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    OParen,
    CParen,
    OBrace,
    CBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    Identifier,
    String,
    Number,

    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,

    Error,
    Eof,
}

impl TokenKind {
    pub fn keyword(word: &str) -> Option<Self> {
        Some(match word {
            "and" => Self::And,
            "class" => Self::Class,
            "else" => Self::Else,
            "false" => Self::False,
            "for" => Self::For,
            "fun" => Self::Fun,
            "if" => Self::If,
            "nil" => Self::Nil,
            "or" => Self::Or,
            "print" => Self::Print,
            "return" => Self::Return,
            "super" => Self::Super,
            "this" => Self::This,
            "true" => Self::True,
            "var" => Self::Var,
            "while" => Self::While,
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OParen => "(",
            Self::CParen => ")",
            Self::OBrace => "{",
            Self::CBrace => "}",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Minus => "-",
            Self::Plus => "+",
            Self::Semicolon => ";",
            Self::Slash => "/",
            Self::Star => "*",
            Self::Bang => "!",
            Self::BangEqual => "!=",
            Self::Equal => "=",
            Self::EqualEqual => "==",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Identifier => "identifier",
            Self::String => "string",
            Self::Number => "number",
            Self::And => "and",
            Self::Class => "class",
            Self::Else => "else",
            Self::False => "false",
            Self::For => "for",
            Self::Fun => "fun",
            Self::If => "if",
            Self::Nil => "nil",
            Self::Or => "or",
            Self::Print => "print",
            Self::Return => "return",
            Self::Super => "super",
            Self::This => "this",
            Self::True => "true",
            Self::Var => "var",
            Self::While => "while",
            Self::Error => "error",
            Self::Eof => "end of input",
        };
        write!(f, "{s}")
    }
}

/// A lexeme along with its kind and source position.
///
/// `source` is shared (not copied) so that scanning the whole program costs one
/// allocation regardless of token count.
#[derive(Clone)]
pub struct Token {
    pub kind: TokenKind,
    source: Rc<str>,
    start: usize,
    length: usize,
    pub line: usize,
    /// Populated only for `TokenKind::Error`.
    error_message: Option<Rc<str>>,
}

impl Token {
    pub fn new(kind: TokenKind, source: Rc<str>, start: usize, length: usize, line: usize) -> Self {
        Self {
            kind,
            source,
            start,
            length,
            line,
            error_message: None,
        }
    }

    pub fn error(message: String, source: Rc<str>, start: usize, line: usize) -> Self {
        Self {
            kind: TokenKind::Error,
            source,
            start,
            length: 0,
            line,
            error_message: Some(Rc::from(message)),
        }
    }

    pub fn lexeme(&self) -> &str {
        if self.kind == TokenKind::Error {
            self.error_message.as_deref().unwrap_or("")
        } else {
            &self.source[self.start..self.start + self.length]
        }
    }

    /// 1-indexed column of the first character of this token.
    pub fn column(&self) -> usize {
        let line_start = self.source[..self.start]
            .rfind('\n')
            .map(|idx| idx + 1)
            .unwrap_or(0);
        self.source[line_start..self.start].chars().count() + 1
    }

    fn line_text(&self) -> &str {
        self.source
            .lines()
            .nth(self.line.saturating_sub(1))
            .unwrap_or("")
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("lexeme", &self.lexeme())
            .field("line", &self.line)
            .field("column", &self.column())
            .finish()
    }
}

/// Renders the source line the token came from with the lexeme underlined, e.g.
///
/// ```text
///   3 | print 1 +;
///             ^
/// ```
impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = self.line.to_string().len();
        writeln!(f, "{}", format!("{} |", " ".repeat(indent)).cyan())?;
        writeln!(
            f,
            "{} {}",
            format!("{} |", self.line).cyan(),
            self.line_text()
        )?;
        let marker = if self.kind == TokenKind::Error {
            1
        } else {
            self.length.max(1)
        };
        write!(
            f,
            "{} {}{}",
            format!("{} |", " ".repeat(indent)).cyan(),
            " ".repeat(self.column() - 1),
            "^".repeat(marker).red().bold()
        )
    }
}
