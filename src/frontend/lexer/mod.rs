// Myulax compiler lexical analyzer
// Created by: Zimeng Li <zimengli@mail.nwpu.edu.cn>
//
// Changelog:
//      26-05-03: Initial version, rewritten as a pull scanner (the compiler asks
//                for one token at a time, nothing is buffered)
//      26-05-10: Long strings [[...]] and block comments --[[...]]
//      26-05-20: Extension keywords
//      26-06-01: '123.' no longer eats the dot unless a digit follows, so
//                '123.abc' scans as number/dot/ident and '1..10' works

pub mod token;

use crate::frontend::lexer::token::{Token, TokenKind};

pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: u32,
    // byte offset where the current line begins; columns derive from it
    line_start: usize,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Scanner<'src> {
        return Scanner {
            source,
            start: 0,
            current: 0,
            line: 1,
            line_start: 0,
        };
    }

    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_ws_and_comments();
        self.start = self.current;

        if self.is_eof() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        match c {
            b'0'..=b'9' => return self.num_literal(),
            b'"' | b'\'' => return self.str_literal(c),
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => return self.ident_or_keyword(),

            b'+' => return self.make_token(TokenKind::Plus),
            b'-' => return self.make_token(TokenKind::Minus),
            b'*' => return self.make_token(TokenKind::Asterisk),
            b'/' => return self.make_token(TokenKind::Slash),
            b'%' => return self.make_token(TokenKind::Percent),
            b'#' => return self.make_token(TokenKind::Hash),
            b'(' => return self.make_token(TokenKind::LParen),
            b')' => return self.make_token(TokenKind::RParen),
            b'{' => return self.make_token(TokenKind::LBrace),
            b'}' => return self.make_token(TokenKind::RBrace),
            b']' => return self.make_token(TokenKind::RBracket),
            b',' => return self.make_token(TokenKind::Comma),
            b';' => return self.make_token(TokenKind::Semicolon),
            b':' => return self.make_token(TokenKind::Colon),

            b'[' => {
                // '[[' opens a long string, a single '[' is the index bracket
                if self.peek() == Some(b'[') {
                    self.advance();
                    return self.long_str_literal();
                }
                return self.make_token(TokenKind::LBracket);
            }

            b'.' => {
                if self.peek() == Some(b'.') {
                    self.advance();
                    if self.peek() == Some(b'.') {
                        self.advance();
                        return self.make_token(TokenKind::Ellipsis);
                    }
                    return self.make_token(TokenKind::Concat);
                }
                return self.make_token(TokenKind::Dot);
            }

            b'=' => return self.double_char_op(b'=', TokenKind::Eq, TokenKind::Assign),
            b'<' => return self.double_char_op(b'=', TokenKind::Leq, TokenKind::Lt),
            b'>' => return self.double_char_op(b'=', TokenKind::Geq, TokenKind::Gt),
            b'~' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    return self.make_token(TokenKind::Neq);
                }
                return self.error_token("Unexpected character '~' (did you mean '~='?).");
            }

            _ => return self.error_token("Unexpected character."),
        }
    }

    pub fn line(&self) -> u32 {
        return self.line;
    }

    fn is_eof(&self) -> bool {
        return self.current >= self.source.len();
    }

    fn peek(&self) -> Option<u8> {
        return self.source.as_bytes().get(self.current).copied();
    }

    fn peek_next(&self) -> Option<u8> {
        return self.source.as_bytes().get(self.current + 1).copied();
    }

    fn advance(&mut self) -> u8 {
        let c = self.source.as_bytes()[self.current];
        self.current += 1;
        if c == b'\n' {
            self.line += 1;
            self.line_start = self.current;
        }
        return c;
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        return Token {
            kind,
            lexeme: &self.source[self.start..self.current],
            line: self.line,
            column: (self.start - self.line_start.min(self.start)) as u32 + 1,
        };
    }

    /// Token position of the start, lexeme replaced by the reason.
    fn error_token(&self, message: &'static str) -> Token<'src> {
        return Token {
            kind: TokenKind::Errno,
            lexeme: message,
            line: self.line,
            column: (self.start - self.line_start.min(self.start)) as u32 + 1,
        };
    }

    /// Multi-line tokens (strings) should report where they began, not where
    /// the scanner gave up.
    fn error_token_at(&self, message: &'static str, line: u32, column: u32) -> Token<'src> {
        return Token {
            kind: TokenKind::Errno,
            lexeme: message,
            line,
            column,
        };
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.advance();
                }
                Some(b'-') if self.peek_next() == Some(b'-') => {
                    self.advance();
                    self.advance();
                    if self.peek() == Some(b'[')
                        && self.peek_next() == Some(b'[')
                    {
                        self.advance();
                        self.advance();
                        self.skip_block_comment();
                    } else {
                        while let Some(c) = self.peek() {
                            if c == b'\n' {
                                break;
                            }
                            self.advance();
                        }
                    }
                }
                _ => break,
            }
        }
    }

    // --[[ ... ]], non-nesting; an unterminated one just runs to EOF
    fn skip_block_comment(&mut self) {
        while !self.is_eof() {
            if self.peek() == Some(b']') && self.peek_next() == Some(b']') {
                self.advance();
                self.advance();
                return;
            }
            self.advance();
        }
    }

    fn num_literal(&mut self) -> Token<'src> {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }

        // the dot belongs to the number only when a digit follows it;
        // this is what keeps '123.abc' and '1..10' scanning correctly
        if self.peek() == Some(b'.') && matches!(self.peek_next(), Some(b'0'..=b'9')) {
            self.advance();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.advance();
            }
        }

        // scientific suffix, same maximal-munch rule: '1e' stays number+ident
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let exp_ok = match self.peek_next() {
                Some(b'0'..=b'9') => true,
                Some(b'+') | Some(b'-') => {
                    matches!(self.source.as_bytes().get(self.current + 2), Some(b'0'..=b'9'))
                }
                _ => false,
            };
            if exp_ok {
                self.advance();
                if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.advance();
                }
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.advance();
                }
            }
        }

        return self.make_token(TokenKind::NumLit);
    }

    fn str_literal(&mut self, quote: u8) -> Token<'src> {
        let open_line = self.line;
        let open_col = (self.start - self.line_start.min(self.start)) as u32 + 1;
        let mut escape = false;
        while let Some(c) = self.peek() {
            if escape {
                escape = false;
                self.advance();
                continue;
            }
            match c {
                b'\\' => {
                    escape = true;
                    self.advance();
                }
                c if c == quote => {
                    self.advance();
                    return self.make_token(TokenKind::StrLit);
                }
                _ => {
                    self.advance();
                }
            }
        }
        return self.error_token_at("Unterminated string.", open_line, open_col);
    }

    fn long_str_literal(&mut self) -> Token<'src> {
        let open_line = self.line;
        let open_col = (self.start - self.line_start.min(self.start)) as u32 + 1;
        while !self.is_eof() {
            if self.peek() == Some(b']') && self.peek_next() == Some(b']') {
                self.advance();
                self.advance();
                return self.make_token(TokenKind::StrLit);
            }
            self.advance();
        }
        return self.error_token_at("Unterminated long string.", open_line, open_col);
    }

    fn ident_or_keyword(&mut self) -> Token<'src> {
        while matches!(
            self.peek(),
            Some(b'A'..=b'Z') | Some(b'a'..=b'z') | Some(b'0'..=b'9') | Some(b'_')
        ) {
            self.advance();
        }
        let text = &self.source[self.start..self.current];
        let kind = Scanner::keyword_kind(text).unwrap_or(TokenKind::Ident);
        return self.make_token(kind);
    }

    fn keyword_kind(s: &str) -> Option<TokenKind> {
        match s {
            "and" => Some(TokenKind::KwAnd),
            "break" => Some(TokenKind::KwBreak),
            "continue" => Some(TokenKind::KwContinue),
            "do" => Some(TokenKind::KwDo),
            "else" => Some(TokenKind::KwElse),
            "elseif" => Some(TokenKind::KwElseIf),
            "end" => Some(TokenKind::KwEnd),
            "false" => Some(TokenKind::KwFalse),
            "for" => Some(TokenKind::KwFor),
            "function" => Some(TokenKind::KwFunction),
            "if" => Some(TokenKind::KwIf),
            "in" => Some(TokenKind::KwIn),
            "local" => Some(TokenKind::KwLocal),
            "nil" => Some(TokenKind::KwNil),
            "not" => Some(TokenKind::KwNot),
            "or" => Some(TokenKind::KwOr),
            "repeat" => Some(TokenKind::KwRepeat),
            "return" => Some(TokenKind::KwReturn),
            "then" => Some(TokenKind::KwThen),
            "true" => Some(TokenKind::KwTrue),
            "until" => Some(TokenKind::KwUntil),
            "while" => Some(TokenKind::KwWhile),
            "class" => Some(TokenKind::KwClass),
            "extends" => Some(TokenKind::KwExtends),
            "new" => Some(TokenKind::KwNew),
            "super" => Some(TokenKind::KwSuper),
            "self" => Some(TokenKind::KwSelf),
            "private" => Some(TokenKind::KwPrivate),
            "trait" => Some(TokenKind::KwTrait),
            "implements" => Some(TokenKind::KwImplements),
            _ => None,
        }
    }

    fn double_char_op(
        &mut self,
        second: u8,
        double_kind: TokenKind,
        single_kind: TokenKind,
    ) -> Token<'src> {
        if self.peek() == Some(second) {
            self.advance();
            return self.make_token(double_kind);
        }
        return self.make_token(single_kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = vec![];
        loop {
            let tok = scanner.scan_token();
            let kind = tok.kind;
            out.push(kind);
            if kind == TokenKind::Eof {
                return out;
            }
        }
    }

    #[test]
    fn dot_sequences_are_maximal_munch() {
        assert_eq!(kinds(".."), vec![TokenKind::Concat, TokenKind::Eof]);
        assert_eq!(kinds("..."), vec![TokenKind::Ellipsis, TokenKind::Eof]);
        assert_eq!(
            kinds("...."),
            vec![TokenKind::Ellipsis, TokenKind::Dot, TokenKind::Eof]
        );
    }

    #[test]
    fn number_dot_ident_splits() {
        assert_eq!(
            kinds("123.abc"),
            vec![
                TokenKind::NumLit,
                TokenKind::Dot,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn number_range_splits() {
        assert_eq!(
            kinds("1..10"),
            vec![
                TokenKind::NumLit,
                TokenKind::Concat,
                TokenKind::NumLit,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn scientific_numbers_scan_as_one_token() {
        let mut scanner = Scanner::new("1.5e-3 2E8");
        assert_eq!(scanner.scan_token().lexeme, "1.5e-3");
        assert_eq!(scanner.scan_token().lexeme, "2E8");
    }

    #[test]
    fn keyword_prefixed_identifiers_stay_identifiers() {
        assert_eq!(
            kinds("classes iffy"),
            vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Eof]
        );
        assert_eq!(kinds("class"), vec![TokenKind::KwClass, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_strings_report_distinct_reasons() {
        let mut scanner = Scanner::new("\"abc");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Errno);
        assert_eq!(tok.lexeme, "Unterminated string.");

        let mut scanner = Scanner::new("[[abc");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Errno);
        assert_eq!(tok.lexeme, "Unterminated long string.");
    }

    #[test]
    fn newlines_inside_strings_bump_the_line_counter() {
        let mut scanner = Scanner::new("[[a\nb]] x");
        let s = scanner.scan_token();
        assert_eq!(s.kind, TokenKind::StrLit);
        let x = scanner.scan_token();
        assert_eq!(x.line, 2);
        assert_eq!(x.column, 5);
    }

    #[test]
    fn comments_are_skipped_silently() {
        assert_eq!(
            kinds("-- line\n1 --[[ block\nstill block ]] 2"),
            vec![TokenKind::NumLit, TokenKind::NumLit, TokenKind::Eof]
        );
    }

    #[test]
    fn repeated_scans_are_deterministic() {
        let source = "local x = 1 .. 2 ~= 3";
        assert_eq!(kinds(source), kinds(source));
    }

    #[test]
    fn columns_measure_from_line_start() {
        let mut scanner = Scanner::new("a\n  bb");
        scanner.scan_token();
        let tok = scanner.scan_token();
        assert_eq!(tok.line, 2);
        assert_eq!(tok.column, 3);
        assert_eq!(tok.length(), 2);
    }
}
