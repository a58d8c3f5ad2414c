//! SQL lexer: converts source text into a token stream.

use super::token::{Token, TokenType};
use crate::error::{Error, Result};

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = matches!(token.token_type, TokenType::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();

        let line = self.line;
        let column = self.column;

        if self.is_eof() {
            return Ok(Token::new(TokenType::Eof, line, column));
        }

        let ch = self.current_char();

        if ch == '-' && self.peek_char() == Some('-') {
            self.skip_line_comment();
            return self.next_token();
        }
        if ch == '/' && self.peek_char() == Some('*') {
            self.skip_block_comment()?;
            return self.next_token();
        }

        let token_type = match ch {
            '\'' => self.read_string()?,
            '"' | '`' => self.read_quoted_identifier(ch)?,
            '0'..='9' => self.read_number()?,
            'a'..='z' | 'A'..='Z' | '_' => self.read_identifier(),
            '$' => self.read_param()?,
            '=' => {
                self.advance();
                TokenType::Eq
            }
            '!' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    TokenType::Ne
                } else {
                    return Err(Error::parse(format!("unexpected character '!' at {line}:{column}"), self.position));
                }
            }
            '<' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    TokenType::Le
                } else if self.current_char() == '>' {
                    self.advance();
                    TokenType::Ne
                } else {
                    TokenType::Lt
                }
            }
            '>' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    TokenType::Ge
                } else {
                    TokenType::Gt
                }
            }
            '|' => {
                self.advance();
                if self.current_char() == '|' {
                    self.advance();
                    TokenType::Concat
                } else {
                    return Err(Error::parse(format!("unexpected character '|' at {line}:{column}"), self.position));
                }
            }
            ':' => {
                self.advance();
                if self.current_char() == '=' {
                    self.advance();
                    TokenType::Assign
                } else {
                    return Err(Error::parse(format!("unexpected character ':' at {line}:{column}"), self.position));
                }
            }
            '+' => {
                self.advance();
                TokenType::Plus
            }
            '-' => {
                self.advance();
                TokenType::Minus
            }
            '*' => {
                self.advance();
                TokenType::Star
            }
            '/' => {
                self.advance();
                TokenType::Slash
            }
            '%' => {
                self.advance();
                TokenType::Percent
            }
            '(' => {
                self.advance();
                TokenType::LParen
            }
            ')' => {
                self.advance();
                TokenType::RParen
            }
            '[' => {
                self.advance();
                TokenType::LBracket
            }
            ']' => {
                self.advance();
                TokenType::RBracket
            }
            ',' => {
                self.advance();
                TokenType::Comma
            }
            ';' => {
                self.advance();
                TokenType::Semicolon
            }
            '.' if !self.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                self.advance();
                TokenType::Dot
            }
            '.' => self.read_number()?,
            _ => {
                return Err(Error::parse(format!("unexpected character '{ch}' at {line}:{column}"), self.position));
            }
        };

        Ok(Token::new(token_type, line, column))
    }

    fn current_char(&self) -> char {
        if self.is_eof() {
            '\0'
        } else {
            self.input[self.position]
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if !self.is_eof() {
            if self.input[self.position] == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.position += 1;
        }
    }

    fn is_eof(&self) -> bool {
        self.position >= self.input.len()
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    fn skip_line_comment(&mut self) {
        while !self.is_eof() && self.current_char() != '\n' {
            self.advance();
        }
        if !self.is_eof() {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        self.advance();
        self.advance();
        while !self.is_eof() {
            if self.current_char() == '*' && self.peek_char() == Some('/') {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(Error::parse("unterminated block comment", self.position))
    }

    /// Single-quoted string literal. A literal quote is written as `''`
    /// (SQL-standard doubling), not a backslash escape.
    fn read_string(&mut self) -> Result<TokenType> {
        self.advance();
        let mut value = String::new();
        loop {
            if self.is_eof() {
                return Err(Error::parse("unterminated string literal", self.position));
            }
            if self.current_char() == '\'' {
                if self.peek_char() == Some('\'') {
                    value.push('\'');
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
                break;
            }
            value.push(self.current_char());
            self.advance();
        }
        Ok(TokenType::String(value))
    }

    /// `"..."` or `` `...` `` quoted identifier, doubled-quote escaped the
    /// same way string literals are.
    fn read_quoted_identifier(&mut self, quote: char) -> Result<TokenType> {
        self.advance();
        let mut value = String::new();
        loop {
            if self.is_eof() {
                return Err(Error::parse("unterminated quoted identifier", self.position));
            }
            if self.current_char() == quote {
                if self.peek_char() == Some(quote) {
                    value.push(quote);
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
                break;
            }
            value.push(self.current_char());
            self.advance();
        }
        Ok(TokenType::QuotedIdentifier(value))
    }

    fn read_param(&mut self) -> Result<TokenType> {
        self.advance();
        let mut digits = String::new();
        while !self.is_eof() && self.current_char().is_ascii_digit() {
            digits.push(self.current_char());
            self.advance();
        }
        if digits.is_empty() {
            return Err(Error::parse("expected parameter index after '$'", self.position));
        }
        digits
            .parse::<usize>()
            .map(TokenType::Param)
            .map_err(|_| Error::parse(format!("invalid parameter index '${digits}'"), self.position))
    }

    fn read_number(&mut self) -> Result<TokenType> {
        let mut value = String::new();
        let mut is_float = false;

        while !self.is_eof() && self.current_char().is_ascii_digit() {
            value.push(self.current_char());
            self.advance();
        }
        if !self.is_eof() && self.current_char() == '.' {
            is_float = true;
            value.push('.');
            self.advance();
            while !self.is_eof() && self.current_char().is_ascii_digit() {
                value.push(self.current_char());
                self.advance();
            }
        }
        if !self.is_eof() && (self.current_char() == 'e' || self.current_char() == 'E') {
            is_float = true;
            value.push(self.current_char());
            self.advance();
            if !self.is_eof() && (self.current_char() == '+' || self.current_char() == '-') {
                value.push(self.current_char());
                self.advance();
            }
            while !self.is_eof() && self.current_char().is_ascii_digit() {
                value.push(self.current_char());
                self.advance();
            }
        }

        if is_float {
            value
                .parse::<f64>()
                .map(TokenType::Number)
                .map_err(|_| Error::parse(format!("invalid number '{value}'"), self.position))
        } else {
            value
                .parse::<i64>()
                .map(TokenType::IntegerLiteral)
                .or_else(|_| value.parse::<f64>().map(TokenType::Number))
                .map_err(|_| Error::parse(format!("invalid number '{value}'"), self.position))
        }
    }

    fn read_identifier(&mut self) -> TokenType {
        let mut value = String::new();
        while !self.is_eof() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || ch == '_' {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        TokenType::from_keyword(&value).unwrap_or(TokenType::Identifier(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexer_simple_select() {
        let mut lexer = Lexer::new("SELECT * FROM users");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens.len(), 5);
        assert!(matches!(tokens[0].token_type, TokenType::Select));
        assert!(matches!(tokens[1].token_type, TokenType::Star));
        assert!(matches!(tokens[3].token_type, TokenType::Identifier(_)));
        assert!(matches!(tokens[4].token_type, TokenType::Eof));
    }

    #[test]
    fn test_lexer_doubled_quote_escape() {
        let mut lexer = Lexer::new("'it''s'");
        let tokens = lexer.tokenize().unwrap();
        assert!(matches!(&tokens[0].token_type, TokenType::String(s) if s == "it's"));
    }

    #[test]
    fn test_lexer_integer_vs_float() {
        let mut lexer = Lexer::new("42 3.14 1.5e10");
        let tokens = lexer.tokenize().unwrap();
        assert!(matches!(tokens[0].token_type, TokenType::IntegerLiteral(42)));
        assert!(matches!(tokens[1].token_type, TokenType::Number(_)));
        assert!(matches!(tokens[2].token_type, TokenType::Number(_)));
    }

    #[test]
    fn test_lexer_operators() {
        let mut lexer = Lexer::new("= != <> < > <= >= + - * / || :=");
        let tokens = lexer.tokenize().unwrap();
        assert!(matches!(tokens[0].token_type, TokenType::Eq));
        assert!(matches!(tokens[1].token_type, TokenType::Ne));
        assert!(matches!(tokens[2].token_type, TokenType::Ne));
        assert!(matches!(tokens[10].token_type, TokenType::Concat));
        assert!(matches!(tokens[11].token_type, TokenType::Assign));
    }

    #[test]
    fn test_lexer_comment_and_quoted_identifier() {
        let mut lexer = Lexer::new("SELECT \"col\" -- comment\nFROM t");
        let tokens = lexer.tokenize().unwrap();
        assert!(matches!(&tokens[1].token_type, TokenType::QuotedIdentifier(s) if s == "col"));
        assert!(matches!(tokens[2].token_type, TokenType::From));
    }

    #[test]
    fn test_lexer_param() {
        let mut lexer = Lexer::new("WHERE id = $1");
        let tokens = lexer.tokenize().unwrap();
        assert!(matches!(tokens[3].token_type, TokenType::Param(1)));
    }
}
