// Myulax compiler token definitions
// Created by: Zimeng Li <zimengli@mail.nwpu.edu.cn>
//
// Changelog:
//      26-05-03: Initial version, tokens now carry their source slice and position
//                so the reporter can underline them
//      26-05-20: Added the class extension keywords (class/extends/new/super/self/
//                private/trait/implements) and break/continue
//      26-06-01: Added Ellipsis; '....' must scan as '...' then '.'

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // scan error; the token's lexeme holds the reason
    Errno,

    Eof,

    Ident,
    NumLit,
    StrLit,

    Assign,

    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Hash,
    Concat,
    Ellipsis,

    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Comma,
    Dot,
    Semicolon,
    Colon,

    KwAnd,
    KwBreak,
    KwContinue,
    KwDo,
    KwElse,
    KwElseIf,
    KwEnd,
    KwFalse,
    KwFor,
    KwFunction,
    KwIf,
    KwIn,
    KwLocal,
    KwNil,
    KwNot,
    KwOr,
    KwRepeat,
    KwReturn,
    KwThen,
    KwTrue,
    KwUntil,
    KwWhile,

    KwClass,
    KwExtends,
    KwNew,
    KwSuper,
    KwSelf,
    KwPrivate,
    KwTrait,
    KwImplements,
}

/// A token borrows its lexeme straight out of the source buffer. For Errno
/// tokens the lexeme is the human-readable reason instead.
#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
    /// 1-based, measured from the start of the current line
    pub column: u32,
}

impl<'src> Token<'src> {
    pub fn length(&self) -> usize {
        return self.lexeme.len();
    }

    pub fn synthetic(kind: TokenKind, lexeme: &'src str) -> Token<'src> {
        return Token {
            kind,
            lexeme,
            line: 0,
            column: 0,
        };
    }
}
