pub mod token;

use std::rc::Rc;
use token::{Token, TokenKind};

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

/// Single-pass scanner over a source buffer, producing one token at a time.
///
/// `source` is reference-counted rather than borrowed so that `Token`s can
/// outlive any one call into the scanner (the compiler keeps tokens around for
/// error reporting long after scanning has finished).
pub struct Scanner {
    source: Rc<str>,
    start: usize,
    current: usize,
    line: usize,
}

impl Scanner {
    pub fn new(source: String) -> Self {
        Self {
            source: Rc::from(source),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    fn at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn byte(&self, offset: usize) -> u8 {
        self.source.as_bytes().get(offset).copied().unwrap_or(0)
    }

    fn advance(&mut self) -> u8 {
        let c = self.byte(self.current);
        self.current += 1;
        c
    }

    fn peek(&self) -> u8 {
        self.byte(self.current)
    }

    fn peek_next(&self) -> u8 {
        self.byte(self.current + 1)
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.at_end() || self.byte(self.current) != expected {
            false
        } else {
            self.current += 1;
            true
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.at_end() {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token::new(
            kind,
            Rc::clone(&self.source),
            self.start,
            self.current - self.start,
            self.line,
        )
    }

    fn error(&self, message: impl Into<String>) -> Token {
        Token::error(message.into(), Rc::clone(&self.source), self.start, self.line)
    }

    fn string(&mut self) -> Token {
        while self.peek() != b'"' && !self.at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }
        if self.at_end() {
            return self.error("unterminated string");
        }
        self.advance(); // closing quote
        self.make(TokenKind::String)
    }

    fn number(&mut self) -> Token {
        while is_digit(self.peek()) {
            self.advance();
        }
        if self.peek() == b'.' && is_digit(self.peek_next()) {
            self.advance();
            while is_digit(self.peek()) {
                self.advance();
            }
        }
        self.make(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token {
        while is_alpha(self.peek()) || is_digit(self.peek()) {
            self.advance();
        }
        let word = &self.source[self.start..self.current];
        match TokenKind::keyword(word) {
            Some(kind) => self.make(kind),
            None => self.make(TokenKind::Identifier),
        }
    }

    pub fn scan_token(&mut self) -> Token {
        self.skip_whitespace();
        self.start = self.current;

        if self.at_end() {
            return self.make(TokenKind::Eof);
        }

        let c = self.advance();
        if is_alpha(c) {
            return self.identifier();
        }
        if is_digit(c) {
            return self.number();
        }

        match c {
            b'(' => self.make(TokenKind::OParen),
            b')' => self.make(TokenKind::CParen),
            b'{' => self.make(TokenKind::OBrace),
            b'}' => self.make(TokenKind::CBrace),
            b',' => self.make(TokenKind::Comma),
            b'.' => self.make(TokenKind::Dot),
            b'-' => self.make(TokenKind::Minus),
            b'+' => self.make(TokenKind::Plus),
            b';' => self.make(TokenKind::Semicolon),
            b'*' => self.make(TokenKind::Star),
            b'/' => self.make(TokenKind::Slash),
            b'!' => {
                let kind = if self.matches(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make(kind)
            }
            b'>' => {
                let kind = if self.matches(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make(kind)
            }
            b'"' => self.string(),
            _ => self.error(format!("unexpected character '{}'", c as char)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source.to_owned());
        let mut out = vec![];
        loop {
            let token = scanner.scan_token();
            let kind = token.kind;
            out.push(kind);
            if kind == TokenKind::Eof {
                break;
            }
        }
        out
    }

    #[test]
    fn punctuators() {
        assert_eq!(
            kinds("(){},.-+;*/"),
            vec![
                TokenKind::OParen,
                TokenKind::CParen,
                TokenKind::OBrace,
                TokenKind::CBrace,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Minus,
                TokenKind::Plus,
                TokenKind::Semicolon,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn one_and_two_char_operators() {
        assert_eq!(
            kinds("! != = == < <= > >="),
            vec![
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers() {
        let mut scanner = Scanner::new("123 4.5".to_owned());
        let a = scanner.scan_token();
        assert_eq!(a.kind, TokenKind::Number);
        assert_eq!(a.lexeme(), "123");
        let b = scanner.scan_token();
        assert_eq!(b.kind, TokenKind::Number);
        assert_eq!(b.lexeme(), "4.5");
    }

    #[test]
    fn strings() {
        let mut scanner = Scanner::new("\"hello there\"".to_owned());
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::String);
        assert_eq!(token.lexeme(), "\"hello there\"");
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut scanner = Scanner::new("\"oops".to_owned());
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
    }

    #[test]
    fn keywords_vs_identifiers() {
        assert_eq!(
            kinds("and class else false for fun if nil or print return super this true var while foo"),
            vec![
                TokenKind::And,
                TokenKind::Class,
                TokenKind::Else,
                TokenKind::False,
                TokenKind::For,
                TokenKind::Fun,
                TokenKind::If,
                TokenKind::Nil,
                TokenKind::Or,
                TokenKind::Print,
                TokenKind::Return,
                TokenKind::Super,
                TokenKind::This,
                TokenKind::True,
                TokenKind::Var,
                TokenKind::While,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("// a whole comment\n1"),
            vec![TokenKind::Number, TokenKind::Eof]
        );
    }

    #[test]
    fn newlines_increment_line_but_arent_tokens() {
        let mut scanner = Scanner::new("1\n2\n3".to_owned());
        let a = scanner.scan_token();
        let b = scanner.scan_token();
        let c = scanner.scan_token();
        assert_eq!((a.line, b.line, c.line), (1, 2, 3));
    }

    #[test]
    fn token_slice_round_trips_through_source() {
        let source = "var x = \"hi\" + 1;";
        let mut scanner = Scanner::new(source.to_owned());
        loop {
            let token = scanner.scan_token();
            if token.kind == TokenKind::Eof {
                break;
            }
            let mut rescan = Scanner::new(token.lexeme().to_owned());
            let retoken = rescan.scan_token();
            assert_eq!(retoken.kind, token.kind);
        }
    }
}
