// Myulax compiler
// Created by: Zimeng Li <zimengli@mail.nwpu.edu.cn>
//
// Changelog:
//      26-05-12: Initial version. Single-pass this time: the Pratt expression
//                parser emits bytecode directly while it consumes tokens, no AST
//                and no IR stage like Myula 1.x (the register scanner is gone too)
//      26-05-24: Locals / upvalue resolution, scopes, loops with break/continue
//      26-06-03: class/trait declarations, methods, super dispatch, new
//      26-06-14: dead-store warnings driven by the per-local init byte range
//      26-06-20: peephole folder split out into fold.rs
//
// 这里是整个项目最重的模块，改动前先跑完 frontend 测试

mod fold;

use crate::backend::vm::heap::Heap;
use crate::common::chunk::Chunk;
use crate::common::object::{Function, GCObject, Value};
use crate::common::opcode::OpCode;
use crate::frontend::diagnostics::{codes, DiagnosticReporter, Severity, MAX_COMPILE_ERRORS};
use crate::frontend::lexer::token::{Token, TokenKind};
use crate::frontend::lexer::Scanner;

pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;
const MAX_BREAKS: usize = 256;

/// Compilation failed; diagnostics already went to the reporter.
#[derive(Debug)]
pub struct CompileFailure {
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == ~=
    Comparison, // < > <= >=
    Concat,     // .. (right associative)
    Term,       // + -
    Factor,     // * / %
    Unary,      // not - #
    Call,       // . : () []
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Concat,
            Precedence::Concat => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: String,
    depth: i32, // -1 until the initializer has run
    is_captured: bool,
    used: bool,
    assigned: bool,
    is_param: bool,
    line: u32,
    column: u32,
    length: usize,
    // [start, end) byte range of the initializer, for dead-store analysis
    init_start: usize,
    init_end: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct UpvalueRef {
    index: u8,
    is_local: bool,
}

struct LoopState {
    /// backward continue target (loop top); None means the target is not yet
    /// known and continues collect forward patches (numeric for increment)
    continue_target: Option<usize>,
    continue_jumps: Vec<usize>,
    break_jumps: Vec<usize>,
    /// scope depth at loop entry; break/continue pop anything deeper
    depth: i32,
}

struct FuncState {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueRef>,
    scope_depth: i32,
    loops: Vec<LoopState>,
    // start offset of every emitted instruction; the peephole folder reads the
    // trailing two and must still see the right neighbor after a rewind, so
    // the whole history is kept rather than a two-slot window
    instr_starts: Vec<usize>,
}

impl FuncState {
    fn new(kind: FunctionKind, name: Option<String>) -> Self {
        // slot 0 belongs to the callee; methods see it as `self`
        let slot_zero = Local {
            name: if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
                "self".to_string()
            } else {
                String::new()
            },
            depth: 0,
            is_captured: false,
            used: true,
            assigned: true,
            is_param: false,
            line: 0,
            column: 0,
            length: 0,
            init_start: 0,
            init_end: 0,
        };
        Self {
            function: Function::new(name),
            kind,
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            instr_starts: Vec::new(),
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

type ParseFn<'src, 'h> = fn(&mut Compiler<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

pub struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    reporter: DiagnosticReporter<'src>,
    heap: &'h mut Heap,
    states: Vec<FuncState>,
    classes: Vec<ClassState>,
    had_error: bool,
    panic_mode: bool,
    aborted: bool,
}

/// Compile a whole script into a Function, diagnostics going to stderr.
pub fn compile<'src>(
    source: &'src str,
    origin: &str,
    heap: &mut Heap,
) -> Result<*mut GCObject<Function>, CompileFailure> {
    let reporter = DiagnosticReporter::new(origin, source);
    compile_with_reporter(source, reporter, heap)
}

/// Same, but with a caller-supplied reporter (tests capture diagnostics here).
pub fn compile_with_reporter<'src>(
    source: &'src str,
    reporter: DiagnosticReporter<'src>,
    heap: &mut Heap,
) -> Result<*mut GCObject<Function>, CompileFailure> {
    let placeholder = Token::synthetic(TokenKind::Eof, "");
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        current: placeholder,
        previous: placeholder,
        reporter,
        heap,
        states: vec![FuncState::new(FunctionKind::Script, None)],
        classes: Vec::new(),
        had_error: false,
        panic_mode: false,
        aborted: false,
    };

    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }

    let function = compiler.end_script();
    if compiler.had_error {
        compiler.reporter.summary();
        return Err(CompileFailure {
            errors: compiler.reporter.error_count,
        });
    }

    match compiler.heap.alloc_function(function) {
        Some(ptr) => Ok(ptr),
        None => {
            compiler.report_error(
                compiler.previous,
                codes::TOO_MANY_CONSTANTS,
                "Out of memory while finalizing the compiled script",
                None,
            );
            compiler.reporter.summary();
            Err(CompileFailure {
                errors: compiler.reporter.error_count,
            })
        }
    }
}

impl<'src, 'h> Compiler<'src, 'h> {
    // ---------------------------------------------------------------- tokens

    fn advance(&mut self) {
        self.previous = self.current;
        if self.aborted {
            self.current = Token::synthetic(TokenKind::Eof, "");
            return;
        }
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Errno {
                break;
            }
            let code = if self.current.lexeme.starts_with("Unterminated") {
                codes::UNTERMINATED_STRING
            } else {
                codes::UNEXPECTED_CHAR
            };
            let tok = self.current;
            self.report_error(tok, code, tok.lexeme, None);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        return true;
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        let tok = self.current;
        self.report_error(tok, codes::EXPECT_TOKEN, message, None);
    }

    // ----------------------------------------------------------- diagnostics

    fn report_error(&mut self, token: Token, code: &str, message: &str, help: Option<&str>) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        if self.aborted {
            return;
        }
        let length = if token.kind == TokenKind::Errno {
            1
        } else {
            token.length().max(1)
        };
        self.reporter.report(
            Severity::Error,
            code,
            message,
            token.line.max(1),
            token.column.max(1),
            length,
            help,
        );
        if self.reporter.error_count >= MAX_COMPILE_ERRORS {
            self.aborted = true;
        }
    }

    fn warn(&mut self, line: u32, column: u32, length: usize, code: &str, message: &str, help: Option<&str>) {
        if self.aborted {
            return;
        }
        self.reporter.report(
            Severity::Warning,
            code,
            message,
            line.max(1),
            column.max(1),
            length,
            help,
        );
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            match self.current.kind {
                TokenKind::KwClass
                | TokenKind::KwFunction
                | TokenKind::KwLocal
                | TokenKind::KwFor
                | TokenKind::KwIf
                | TokenKind::KwWhile
                | TokenKind::KwReturn => return,
                _ => self.advance(),
            }
        }
    }

    // -------------------------------------------------------------- emitting

    fn state(&mut self) -> &mut FuncState {
        self.states.last_mut().unwrap()
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.state().function.chunk
    }

    fn current_offset(&self) -> usize {
        self.states.last().unwrap().function.chunk.count()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line.max(1);
        self.chunk().write(byte, line);
    }

    /// All instruction starts flow through here so the peephole folder knows
    /// the boundaries of the trailing emitted instructions.
    fn emit_op(&mut self, op: OpCode) {
        let offset = self.current_offset();
        self.state().instr_starts.push(offset);
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_op_bytes(&mut self, op: OpCode, a: u8, b: u8) {
        self.emit_op(op);
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.chunk().add_constant(value);
        if index > u8::MAX as usize {
            let tok = self.previous;
            self.report_error(
                tok,
                codes::TOO_MANY_CONSTANTS,
                "Too many constants in one chunk (limit 256)",
                None,
            );
            return 0;
        }
        return index as u8;
    }

    fn emit_constant(&mut self, value: Value) {
        let k = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, k);
    }

    fn intern(&mut self, s: &str) -> Value {
        match self.heap.intern(s) {
            Some(ptr) => Value::String(ptr),
            None => {
                let tok = self.previous;
                self.report_error(tok, codes::TOO_MANY_CONSTANTS, "Out of memory", None);
                Value::Nil
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let value = self.intern(name);
        self.make_constant(value)
    }

    /// Emits the operand placeholder, returns its offset for patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_offset() - 2
    }

    fn patch_jump(&mut self, operand_at: usize) {
        let jump = self.current_offset() - operand_at - 2;
        if jump > u16::MAX as usize {
            let tok = self.previous;
            self.report_error(tok, codes::JUMP_TOO_FAR, "Too much code to jump over", None);
            return;
        }
        // big-endian
        self.chunk().code[operand_at] = (jump >> 8) as u8;
        self.chunk().code[operand_at + 1] = jump as u8;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_offset() - loop_start + 2;
        if offset > u16::MAX as usize {
            let tok = self.previous;
            self.report_error(tok, codes::JUMP_TOO_FAR, "Loop body too large", None);
            self.emit_byte(0);
            self.emit_byte(0);
            return;
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    fn emit_return(&mut self) {
        if self.states.last().unwrap().kind == FunctionKind::Initializer {
            self.emit_op_byte(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    // ------------------------------------------------------ scopes and locals

    fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state().scope_depth -= 1;
        loop {
            let info = {
                let st = self.states.last().unwrap();
                match st.locals.last() {
                    Some(l) if l.depth > st.scope_depth => Some((
                        l.is_captured,
                        l.used,
                        l.assigned,
                        l.is_param,
                        l.name.clone(),
                        l.line,
                        l.column,
                        l.length,
                        l.init_start,
                        l.init_end,
                    )),
                    _ => None,
                }
            };
            let Some((
                captured,
                used,
                assigned,
                is_param,
                name,
                line,
                column,
                length,
                init_start,
                init_end,
            )) = info
            else {
                break;
            };
            self.maybe_warn_unused(
                captured, used, assigned, is_param, &name, line, column, length, init_start,
                init_end,
            );
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.state().locals.pop();
        }
    }

    fn maybe_warn_unused(
        &mut self,
        captured: bool,
        used: bool,
        assigned: bool,
        is_param: bool,
        name: &str,
        line: u32,
        column: u32,
        length: usize,
        init_start: usize,
        init_end: usize,
    ) {
        if captured || used || name.is_empty() || name.starts_with('(') {
            return;
        }
        if name == "self" || name == "super" {
            return;
        }
        if is_param {
            let msg = format!("parameter '{}' is never used", name);
            self.warn(line, column, length, codes::UNUSED_PARAMETER, &msg, None);
            return;
        }
        // later assignments keep their own side effects; only an untouched
        // local with a pure initializer is safe to call removable
        if assigned {
            return;
        }
        let removable = {
            let chunk = &self.states.last().unwrap().function.chunk;
            side_effect_free(&chunk.code, init_start, init_end)
        };
        if removable {
            let msg = format!("local variable '{}' is never used", name);
            self.warn(
                line,
                column,
                length,
                codes::UNUSED_VARIABLE,
                &msg,
                Some("the initializer has no side effects, the declaration can be removed"),
            );
        }
    }

    fn add_local(&mut self, token: Token, is_param: bool) {
        if self.states.last().unwrap().locals.len() >= MAX_LOCALS {
            self.report_error(
                token,
                codes::TOO_MANY_LOCALS,
                "Too many local variables in function (limit 256)",
                None,
            );
            return;
        }
        let local = Local {
            name: token.lexeme.to_string(),
            depth: -1,
            is_captured: false,
            used: false,
            assigned: false,
            is_param,
            line: token.line,
            column: token.column,
            length: token.length(),
            init_start: 0,
            init_end: 0,
        };
        self.state().locals.push(local);
    }

    fn declare_local(&mut self, token: Token, is_param: bool) {
        let name = token.lexeme;
        let mut redeclared = false;
        let mut shadows = false;
        {
            let st = self.states.last().unwrap();
            for local in st.locals.iter().rev() {
                if local.depth != -1 && local.depth < st.scope_depth {
                    if local.name == name {
                        shadows = true;
                    }
                    continue;
                }
                if local.name == name {
                    redeclared = true;
                    break;
                }
            }
        }
        if redeclared {
            let msg = format!("Variable '{}' is already declared in this scope", name);
            self.report_error(token, codes::BAD_VARIABLE, &msg, None);
        } else if shadows {
            let msg = format!("local '{}' shadows an earlier declaration", name);
            self.warn(
                token.line,
                token.column,
                token.length(),
                codes::SHADOWED_VARIABLE,
                &msg,
                None,
            );
        }
        self.add_local(token, is_param);
    }

    fn mark_initialized(&mut self) {
        let depth = self.state().scope_depth;
        if let Some(local) = self.state().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn resolve_local(&mut self, state_idx: usize, token: Token) -> Option<u8> {
        let mut found: Option<(usize, bool)> = None;
        {
            let st = &self.states[state_idx];
            for (i, local) in st.locals.iter().enumerate().rev() {
                if local.name == token.lexeme && !local.name.is_empty() {
                    found = Some((i, local.depth == -1));
                    break;
                }
            }
        }
        let (index, uninitialized) = found?;
        if uninitialized {
            self.report_error(
                token,
                codes::BAD_VARIABLE,
                "Can't read a local variable in its own initializer",
                None,
            );
        }
        Some(index as u8)
    }

    fn add_upvalue(&mut self, state_idx: usize, index: u8, is_local: bool) -> u8 {
        let wanted = UpvalueRef { index, is_local };
        {
            let st = &self.states[state_idx];
            for (i, existing) in st.upvalues.iter().enumerate() {
                if *existing == wanted {
                    return i as u8;
                }
            }
        }
        if self.states[state_idx].upvalues.len() >= MAX_UPVALUES {
            let tok = self.previous;
            self.report_error(
                tok,
                codes::TOO_MANY_LOCALS,
                "Too many captured variables in function (limit 256)",
                None,
            );
            return 0;
        }
        let st = &mut self.states[state_idx];
        st.upvalues.push(wanted);
        st.function.upvalue_count = st.upvalues.len();
        (st.upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, state_idx: usize, token: Token) -> Option<u8> {
        if state_idx == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(state_idx - 1, token) {
            let enclosing = &mut self.states[state_idx - 1];
            enclosing.locals[local as usize].is_captured = true;
            enclosing.locals[local as usize].used = true;
            return Some(self.add_upvalue(state_idx, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(state_idx - 1, token) {
            return Some(self.add_upvalue(state_idx, upvalue, false));
        }
        None
    }

    /// Emits break/continue cleanup: every local deeper than `target_depth`
    /// leaves the stack, captured ones through CloseUpvalue. The locals array
    /// itself is untouched, compilation of the rest of the block continues.
    fn discard_locals(&mut self, target_depth: i32) {
        let plan: Vec<bool> = {
            let st = self.states.last().unwrap();
            st.locals
                .iter()
                .rev()
                .take_while(|l| l.depth > target_depth)
                .map(|l| l.is_captured)
                .collect()
        };
        let mut plain_run = 0u8;
        for captured in plan {
            if captured {
                self.flush_pops(plain_run);
                plain_run = 0;
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                plain_run += 1;
            }
        }
        self.flush_pops(plain_run);
    }

    fn flush_pops(&mut self, count: u8) {
        match count {
            0 => {}
            1 => self.emit_op(OpCode::Pop),
            n => self.emit_op_byte(OpCode::PopN, n),
        }
    }

    // ---------------------------------------------------------- pratt parser

    fn get_rule(kind: TokenKind) -> ParseRule<'src, 'h> {
        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'h>>,
            Option<ParseFn<'src, 'h>>,
            Precedence,
        ) = match kind {
            TokenKind::LParen => (Some(Self::grouping), Some(Self::call), Precedence::Call),
            TokenKind::LBrace => (Some(Self::table_literal), None, Precedence::None),
            TokenKind::LBracket => (None, Some(Self::subscript), Precedence::Call),
            TokenKind::Dot => (None, Some(Self::dot), Precedence::Call),
            TokenKind::Colon => (None, Some(Self::colon_invoke), Precedence::Call),
            TokenKind::Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            TokenKind::Plus => (None, Some(Self::binary), Precedence::Term),
            TokenKind::Asterisk | TokenKind::Slash | TokenKind::Percent => {
                (None, Some(Self::binary), Precedence::Factor)
            }
            TokenKind::Hash => (Some(Self::unary), None, Precedence::None),
            TokenKind::KwNot => (Some(Self::unary), None, Precedence::None),
            TokenKind::Concat => (None, Some(Self::binary), Precedence::Concat),
            TokenKind::Eq | TokenKind::Neq => (None, Some(Self::binary), Precedence::Equality),
            TokenKind::Lt | TokenKind::Gt | TokenKind::Leq | TokenKind::Geq => {
                (None, Some(Self::binary), Precedence::Comparison)
            }
            TokenKind::KwAnd => (None, Some(Self::and_op), Precedence::And),
            TokenKind::KwOr => (None, Some(Self::or_op), Precedence::Or),
            TokenKind::Ident => (Some(Self::variable), None, Precedence::None),
            TokenKind::NumLit => (Some(Self::number), None, Precedence::None),
            TokenKind::StrLit => (Some(Self::string), None, Precedence::None),
            TokenKind::KwNil | TokenKind::KwTrue | TokenKind::KwFalse => {
                (Some(Self::literal), None, Precedence::None)
            }
            TokenKind::KwFunction => (Some(Self::anonymous_function), None, Precedence::None),
            TokenKind::KwSelf => (Some(Self::self_expr), None, Precedence::None),
            TokenKind::KwSuper => (Some(Self::super_expr), None, Precedence::None),
            TokenKind::KwNew => (Some(Self::new_expr), None, Precedence::None),
            _ => (None, None, Precedence::None),
        };
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = Self::get_rule(self.previous.kind).prefix else {
            let tok = self.previous;
            self.report_error(tok, codes::EXPECT_EXPRESSION, "Expected expression", None);
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);
        self.parse_infix_loop(precedence, can_assign);

        if can_assign && self.match_token(TokenKind::Assign) {
            let tok = self.previous;
            self.report_error(
                tok,
                codes::INVALID_ASSIGN,
                "Invalid assignment target",
                Some("only variables, properties and subscripts can be assigned to"),
            );
        }
    }

    fn parse_infix_loop(&mut self, precedence: Precedence, can_assign: bool) {
        while precedence <= Self::get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            } else {
                break;
            }
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    // ------------------------------------------------------------ prefix fns

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RParen, "Expected ')' after expression");
    }

    fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => {
                let tok = self.previous;
                self.report_error(tok, codes::EXPECT_EXPRESSION, "Invalid number literal", None);
            }
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let content = if lexeme.starts_with("[[") {
            // long strings are raw, no escape processing
            lexeme[2..lexeme.len() - 2].to_string()
        } else {
            unescape(&lexeme[1..lexeme.len() - 1])
        };
        let value = self.intern(&content);
        self.emit_constant(value);
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::KwNil => self.emit_op(OpCode::Nil),
            TokenKind::KwTrue => self.emit_op(OpCode::True),
            TokenKind::KwFalse => self.emit_op(OpCode::False),
            _ => unreachable!("literal() called for a non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let token = self.previous;
        self.named_variable(token, can_assign);
    }

    fn named_variable(&mut self, token: Token<'src>, can_assign: bool) {
        let top = self.states.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(top, token) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(upvalue) = self.resolve_upvalue(top, token) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, upvalue)
        } else {
            let k = self.identifier_constant(token.lexeme);
            (OpCode::GetGlobal, OpCode::SetGlobal, k)
        };

        if can_assign && self.match_token(TokenKind::Assign) {
            self.expression();
            if get_op == OpCode::GetLocal {
                self.states[top].locals[arg as usize].assigned = true;
            }
            self.emit_op_byte(set_op, arg);
        } else {
            if get_op == OpCode::GetLocal {
                self.states[top].locals[arg as usize].used = true;
            }
            self.emit_op_byte(get_op, arg);
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_unary_folded(OpCode::Negate),
            TokenKind::KwNot => self.emit_unary_folded(OpCode::Not),
            TokenKind::Hash => self.emit_op(OpCode::Length),
            _ => unreachable!("unary() called for a non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        let rule_precedence = Self::get_rule(op_kind).precedence;
        // '..' is right associative, everything else left
        if op_kind == TokenKind::Concat {
            self.parse_precedence(rule_precedence);
        } else {
            self.parse_precedence(rule_precedence.next());
        }

        match op_kind {
            TokenKind::Plus => self.emit_binary_folded(OpCode::Add),
            TokenKind::Minus => self.emit_binary_folded(OpCode::Subtract),
            TokenKind::Asterisk => self.emit_binary_folded(OpCode::Multiply),
            TokenKind::Slash => self.emit_binary_folded(OpCode::Divide),
            TokenKind::Percent => self.emit_binary_folded(OpCode::Modulo),
            TokenKind::Concat => self.emit_binary_folded(OpCode::Concat),
            TokenKind::Eq => self.emit_binary_folded(OpCode::Equal),
            TokenKind::Neq => {
                self.emit_binary_folded(OpCode::Equal);
                self.emit_unary_folded(OpCode::Not);
            }
            TokenKind::Gt => self.emit_binary_folded(OpCode::Greater),
            TokenKind::Lt => self.emit_binary_folded(OpCode::Less),
            TokenKind::Geq => {
                self.emit_binary_folded(OpCode::Less);
                self.emit_unary_folded(OpCode::Not);
            }
            TokenKind::Leq => {
                self.emit_binary_folded(OpCode::Greater);
                self.emit_unary_folded(OpCode::Not);
            }
            _ => unreachable!("binary() called for a non-binary token"),
        }
    }

    fn and_op(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_op(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op_byte(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Ident, "Expected property name after '.'");
        let name = self.previous.lexeme;
        let k = self.identifier_constant(name);

        if can_assign && self.match_token(TokenKind::Assign) {
            self.expression();
            self.emit_op_byte(OpCode::SetProperty, k);
        } else if self.match_token(TokenKind::LParen) {
            let argc = self.argument_list();
            self.emit_op_bytes(OpCode::Invoke, k, argc);
        } else {
            self.emit_op_byte(OpCode::GetProperty, k);
        }
    }

    // obj:name(args) is sugar for obj.name(args); identical bytecode
    fn colon_invoke(&mut self, _can_assign: bool) {
        self.consume(TokenKind::Ident, "Expected method name after ':'");
        let name = self.previous.lexeme;
        let k = self.identifier_constant(name);
        self.consume(TokenKind::LParen, "Expected '(' after method name");
        let argc = self.argument_list();
        self.emit_op_bytes(OpCode::Invoke, k, argc);
    }

    fn subscript(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RBracket, "Expected ']' after subscript");
        if can_assign && self.match_token(TokenKind::Assign) {
            self.expression();
            self.emit_op(OpCode::TableSet);
        } else {
            self.emit_op(OpCode::TableGet);
        }
    }

    fn table_literal(&mut self, _can_assign: bool) {
        self.emit_op(OpCode::Table);
        if !self.check(TokenKind::RBrace) {
            loop {
                if self.check(TokenKind::RBrace) {
                    break;
                }
                if self.check(TokenKind::Ident) {
                    self.advance();
                    if self.check(TokenKind::Assign) {
                        // name = value field entry
                        let name = self.previous.lexeme;
                        let k = self.identifier_constant(name);
                        self.advance(); // '='
                        self.expression();
                        self.emit_op_byte(OpCode::TableSetField, k);
                    } else {
                        // positional entry that happens to start with a name
                        self.variable(false);
                        self.parse_infix_loop(Precedence::Or, false);
                        self.emit_op(OpCode::TableAdd);
                    }
                } else {
                    self.expression();
                    self.emit_op(OpCode::TableAdd);
                }
                if !self.match_token(TokenKind::Comma) && !self.match_token(TokenKind::Semicolon) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBrace, "Expected '}' to close table literal");
    }

    fn anonymous_function(&mut self, _can_assign: bool) {
        self.function_body(FunctionKind::Function, None);
    }

    fn self_expr(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            let tok = self.previous;
            self.report_error(
                tok,
                codes::SELF_OUTSIDE_CLASS,
                "Can't use 'self' outside of a class",
                None,
            );
            return;
        }
        let token = Token::synthetic(TokenKind::Ident, "self");
        self.named_variable(token, false);
    }

    fn super_expr(&mut self, _can_assign: bool) {
        let keyword = self.previous;
        if self.classes.is_empty() {
            self.report_error(
                keyword,
                codes::BAD_SUPER,
                "Can't use 'super' outside of a class",
                None,
            );
        } else if !self.classes.last().unwrap().has_superclass {
            self.report_error(
                keyword,
                codes::BAD_SUPER,
                "Can't use 'super' in a class with no superclass",
                None,
            );
        }

        if !self.match_token(TokenKind::Dot) && !self.match_token(TokenKind::Colon) {
            let tok = self.current;
            self.report_error(tok, codes::EXPECT_TOKEN, "Expected '.' after 'super'", None);
            return;
        }
        self.consume(TokenKind::Ident, "Expected superclass method name");
        let k = self.identifier_constant(self.previous.lexeme);

        let self_token = Token::synthetic(TokenKind::Ident, "self");
        let super_token = Token::synthetic(TokenKind::Ident, "super");
        self.named_variable(self_token, false);
        if self.match_token(TokenKind::LParen) {
            let argc = self.argument_list();
            self.named_variable(super_token, false);
            self.emit_op_bytes(OpCode::SuperInvoke, k, argc);
        } else {
            self.named_variable(super_token, false);
            self.emit_op_byte(OpCode::GetSuper, k);
        }
    }

    fn new_expr(&mut self, _can_assign: bool) {
        self.consume(TokenKind::Ident, "Expected class name after 'new'");
        let class_token = self.previous;
        self.named_variable(class_token, false);
        self.consume(TokenKind::LParen, "Expected '(' after class name");
        let argc = self.argument_list();
        self.emit_op_byte(OpCode::New, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RParen) {
            loop {
                self.expression();
                if count == 255 {
                    let tok = self.previous;
                    self.report_error(
                        tok,
                        codes::TOO_MANY_ARGS,
                        "Too many arguments (limit 255)",
                        None,
                    );
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expected ')' after arguments");
        count.min(255) as u8
    }

    // ------------------------------------------------------------ statements

    fn declaration(&mut self) {
        if self.match_token(TokenKind::KwLocal) {
            self.local_declaration();
        } else if self.match_token(TokenKind::KwFunction) {
            self.function_declaration();
        } else if self.match_token(TokenKind::KwClass) {
            self.class_declaration();
        } else if self.match_token(TokenKind::KwTrait) {
            self.trait_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::KwIf) {
            self.if_statement();
        } else if self.match_token(TokenKind::KwWhile) {
            self.while_statement();
        } else if self.match_token(TokenKind::KwRepeat) {
            self.repeat_statement();
        } else if self.match_token(TokenKind::KwFor) {
            self.for_statement();
        } else if self.match_token(TokenKind::KwDo) {
            self.begin_scope();
            self.block(&[TokenKind::KwEnd]);
            self.consume(TokenKind::KwEnd, "Expected 'end' to close 'do' block");
            self.end_scope();
        } else if self.match_token(TokenKind::KwReturn) {
            self.return_statement();
        } else if self.match_token(TokenKind::KwBreak) {
            self.break_statement();
        } else if self.match_token(TokenKind::KwContinue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::Semicolon) {
            // empty statement
        } else {
            self.expression();
            self.emit_op(OpCode::Pop);
        }
    }

    fn block(&mut self, terminators: &[TokenKind]) {
        while !terminators.contains(&self.current.kind) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
    }

    fn local_declaration(&mut self) {
        if self.match_token(TokenKind::KwFunction) {
            self.consume(TokenKind::Ident, "Expected function name after 'local function'");
            let name_token = self.previous;
            self.declare_local(name_token, false);
            // eager binding so the function can call itself
            self.mark_initialized();
            self.function_body(FunctionKind::Function, Some(name_token.lexeme.to_string()));
            return;
        }

        self.consume(TokenKind::Ident, "Expected variable name after 'local'");
        let name_token = self.previous;
        self.declare_local(name_token, false);

        let init_start = self.current_offset();
        if self.match_token(TokenKind::Assign) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        let init_end = self.current_offset();

        if let Some(local) = self.state().locals.last_mut() {
            local.init_start = init_start;
            local.init_end = init_end;
        }
        self.mark_initialized();
    }

    fn function_declaration(&mut self) {
        self.consume(TokenKind::Ident, "Expected function name");
        let name_token = self.previous;
        let k = self.identifier_constant(name_token.lexeme);
        self.function_body(FunctionKind::Function, Some(name_token.lexeme.to_string()));
        // `function name(...)` always (re)defines the global, Lua-style
        self.emit_op_byte(OpCode::DefineGlobal, k);
    }

    fn function_body(&mut self, kind: FunctionKind, name: Option<String>) {
        self.states.push(FuncState::new(kind, name));
        self.begin_scope();

        self.consume(TokenKind::LParen, "Expected '(' to open the parameter list");
        if !self.check(TokenKind::RParen) {
            loop {
                let arity = self.states.last().unwrap().function.arity;
                if arity == u8::MAX {
                    let tok = self.current;
                    self.report_error(
                        tok,
                        codes::TOO_MANY_PARAMS,
                        "Too many parameters (limit 255)",
                        None,
                    );
                }
                self.state().function.arity = arity.saturating_add(1);
                self.consume(TokenKind::Ident, "Expected parameter name");
                let param = self.previous;
                self.declare_local(param, true);
                self.mark_initialized();
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expected ')' after parameters");

        self.block(&[TokenKind::KwEnd]);
        self.consume(TokenKind::KwEnd, "Expected 'end' to close the function body");

        let (function, upvalues) = self.end_state();
        match self.heap.alloc_function(function) {
            Some(ptr) => {
                let k = self.make_constant(Value::Function(ptr));
                self.emit_op_byte(OpCode::Closure, k);
                for upvalue in upvalues {
                    self.emit_byte(upvalue.is_local as u8);
                    self.emit_byte(upvalue.index);
                }
            }
            None => {
                let tok = self.previous;
                self.report_error(tok, codes::TOO_MANY_CONSTANTS, "Out of memory", None);
            }
        }
    }

    /// Close the innermost function state: implicit return, leftover unused
    /// warnings, then hand the finished Function back.
    fn end_state(&mut self) -> (Function, Vec<UpvalueRef>) {
        self.emit_return();

        let leftovers: Vec<_> = {
            let st = self.states.last().unwrap();
            st.locals
                .iter()
                .skip(1) // slot 0 is the callee
                .map(|l| {
                    (
                        l.is_captured,
                        l.used,
                        l.assigned,
                        l.is_param,
                        l.name.clone(),
                        l.line,
                        l.column,
                        l.length,
                        l.init_start,
                        l.init_end,
                    )
                })
                .collect()
        };
        for (captured, used, assigned, is_param, name, line, column, length, start, end) in leftovers
        {
            self.maybe_warn_unused(
                captured, used, assigned, is_param, &name, line, column, length, start, end,
            );
        }

        let st = self.states.pop().unwrap();
        (st.function, st.upvalues)
    }

    fn end_script(&mut self) -> Function {
        let (function, _) = self.end_state();
        function
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Ident, "Expected class name");
        let name_token = self.previous;
        let name_k = self.identifier_constant(name_token.lexeme);
        let is_global = self.states.last().unwrap().scope_depth == 0;

        if !is_global {
            self.declare_local(name_token, false);
        }
        self.emit_op_byte(OpCode::Class, name_k);
        if is_global {
            self.emit_op_byte(OpCode::DefineGlobal, name_k);
        } else {
            self.mark_initialized();
        }

        self.classes.push(ClassState {
            has_superclass: false,
        });

        let mut has_superclass = false;
        if self.match_token(TokenKind::KwExtends) {
            self.consume(TokenKind::Ident, "Expected superclass name after 'extends'");
            let super_token = self.previous;
            if super_token.lexeme == name_token.lexeme {
                self.report_error(
                    super_token,
                    codes::INHERIT_SELF,
                    "A class can't inherit from itself",
                    None,
                );
            }
            self.variable(false); // push the superclass

            self.begin_scope();
            let synthetic = Token::synthetic(TokenKind::Ident, "super");
            self.add_local(synthetic, false);
            self.mark_initialized();
            if let Some(local) = self.state().locals.last_mut() {
                local.used = true;
            }

            self.named_variable(name_token, false); // push the new class
            self.emit_op(OpCode::Inherit);
            has_superclass = true;
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        if self.match_token(TokenKind::KwImplements) {
            loop {
                self.consume(TokenKind::Ident, "Expected trait name after 'implements'");
                self.variable(false); // push the trait
                self.named_variable(name_token, false); // push the class
                self.emit_op(OpCode::Implement);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.named_variable(name_token, false); // class on stack for METHOD
        while !self.check(TokenKind::KwEnd) && !self.check(TokenKind::Eof) {
            self.method(false);
            if self.panic_mode {
                break;
            }
        }
        self.consume(TokenKind::KwEnd, "Expected 'end' to close the class body");
        self.emit_op(OpCode::Pop); // the class

        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn trait_declaration(&mut self) {
        self.consume(TokenKind::Ident, "Expected trait name");
        let name_token = self.previous;
        let name_k = self.identifier_constant(name_token.lexeme);
        let is_global = self.states.last().unwrap().scope_depth == 0;

        if !is_global {
            self.declare_local(name_token, false);
        }
        self.emit_op_byte(OpCode::Trait, name_k);
        if is_global {
            self.emit_op_byte(OpCode::DefineGlobal, name_k);
        } else {
            self.mark_initialized();
        }

        self.classes.push(ClassState {
            has_superclass: false,
        });

        self.named_variable(name_token, false);
        while !self.check(TokenKind::KwEnd) && !self.check(TokenKind::Eof) {
            self.method(true);
            if self.panic_mode {
                break;
            }
        }
        self.consume(TokenKind::KwEnd, "Expected 'end' to close the trait body");
        self.emit_op(OpCode::Pop);
        self.classes.pop();
    }

    fn method(&mut self, in_trait: bool) {
        let is_private = self.match_token(TokenKind::KwPrivate);
        self.consume(TokenKind::KwFunction, "Expected 'function' to begin a method");
        self.consume(TokenKind::Ident, "Expected method name");
        let name_token = self.previous;
        let k = self.identifier_constant(name_token.lexeme);

        let kind = if !in_trait && name_token.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function_body(kind, Some(name_token.lexeme.to_string()));
        self.emit_op_bytes(OpCode::Method, k, is_private as u8);
    }

    fn if_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::KwThen, "Expected 'then' after condition");

        let mut end_jumps: Vec<usize> = Vec::new();
        let mut else_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.begin_scope();
        self.block(&[TokenKind::KwEnd, TokenKind::KwElse, TokenKind::KwElseIf]);
        self.end_scope();

        while self.check(TokenKind::KwElseIf) {
            end_jumps.push(self.emit_jump(OpCode::Jump));
            self.patch_jump(else_jump);
            self.emit_op(OpCode::Pop);
            self.advance(); // elseif
            self.expression();
            self.consume(TokenKind::KwThen, "Expected 'then' after condition");
            else_jump = self.emit_jump(OpCode::JumpIfFalse);
            self.emit_op(OpCode::Pop);
            self.begin_scope();
            self.block(&[TokenKind::KwEnd, TokenKind::KwElse, TokenKind::KwElseIf]);
            self.end_scope();
        }

        end_jumps.push(self.emit_jump(OpCode::Jump));
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::KwElse) {
            self.begin_scope();
            self.block(&[TokenKind::KwEnd]);
            self.end_scope();
        }
        self.consume(TokenKind::KwEnd, "Expected 'end' to close 'if'");

        // every arm funnels into the same end label
        for jump in end_jumps {
            self.patch_jump(jump);
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_offset();
        self.expression();
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.consume(TokenKind::KwDo, "Expected 'do' after while condition");

        let depth = self.state().scope_depth;
        self.state().loops.push(LoopState {
            continue_target: Some(loop_start),
            continue_jumps: Vec::new(),
            break_jumps: Vec::new(),
            depth,
        });

        self.begin_scope();
        self.block(&[TokenKind::KwEnd]);
        self.consume(TokenKind::KwEnd, "Expected 'end' to close the while body");
        self.end_scope();

        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        let finished = self.state().loops.pop().unwrap();
        for jump in finished.break_jumps {
            self.patch_jump(jump);
        }
    }

    fn repeat_statement(&mut self) {
        let body_start = self.current_offset();

        let depth = self.state().scope_depth;
        self.state().loops.push(LoopState {
            continue_target: Some(body_start),
            continue_jumps: Vec::new(),
            break_jumps: Vec::new(),
            depth,
        });

        self.begin_scope();
        self.block(&[TokenKind::KwUntil]);
        self.consume(TokenKind::KwUntil, "Expected 'until' after repeat body");
        self.end_scope();

        self.expression();
        // condition false -> go around again
        let again = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        let done = self.emit_jump(OpCode::Jump);
        self.patch_jump(again);
        self.emit_op(OpCode::Pop);
        self.emit_loop(body_start);
        self.patch_jump(done);

        let finished = self.state().loops.pop().unwrap();
        for jump in finished.break_jumps {
            self.patch_jump(jump);
        }
    }

    fn for_statement(&mut self) {
        self.begin_scope();

        self.consume(TokenKind::Ident, "Expected loop variable name");
        let var_token = self.previous;
        self.declare_local(var_token, false);
        let var_slot = (self.states.last().unwrap().locals.len() - 1) as u8;
        self.consume(TokenKind::Assign, "Expected '=' after loop variable");
        self.expression();
        self.mark_initialized();
        if let Some(local) = self.state().locals.last_mut() {
            local.used = true;
        }

        self.consume(TokenKind::Comma, "Expected ',' after the start value");
        let limit_token = Token::synthetic(TokenKind::Ident, "(for limit)");
        self.add_local(limit_token, false);
        self.expression();
        self.mark_initialized();

        let step_token = Token::synthetic(TokenKind::Ident, "(for step)");
        self.add_local(step_token, false);
        if self.match_token(TokenKind::Comma) {
            self.expression();
        } else {
            self.emit_constant(Value::Number(1.0));
        }
        self.mark_initialized();

        self.consume(TokenKind::KwDo, "Expected 'do' after for clauses");

        let loop_start = self.current_offset();
        // condition: continue while not (var > limit); negative steps are not
        // special-cased
        self.emit_op_byte(OpCode::GetLocal, var_slot);
        self.emit_op_byte(OpCode::GetLocal, var_slot + 1);
        self.emit_op(OpCode::Greater);
        self.emit_op(OpCode::Not);
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        let depth = self.state().scope_depth;
        self.state().loops.push(LoopState {
            continue_target: None, // forward-patched to the increment section
            continue_jumps: Vec::new(),
            break_jumps: Vec::new(),
            depth,
        });

        self.begin_scope();
        self.block(&[TokenKind::KwEnd]);
        self.consume(TokenKind::KwEnd, "Expected 'end' to close the for body");
        self.end_scope();

        // increment section; continue lands here, not on the condition
        let continues = std::mem::take(&mut self.state().loops.last_mut().unwrap().continue_jumps);
        for jump in continues {
            self.patch_jump(jump);
        }
        self.emit_op_byte(OpCode::GetLocal, var_slot);
        self.emit_op_byte(OpCode::GetLocal, var_slot + 2);
        self.emit_op(OpCode::Add);
        self.emit_op_byte(OpCode::SetLocal, var_slot);
        self.emit_op(OpCode::Pop);
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        let finished = self.state().loops.pop().unwrap();
        for jump in finished.break_jumps {
            self.patch_jump(jump);
        }

        self.end_scope(); // loop variable, limit, step
    }

    fn break_statement(&mut self) {
        if self.states.last().unwrap().loops.is_empty() {
            let tok = self.previous;
            self.report_error(
                tok,
                codes::BREAK_OUTSIDE_LOOP,
                "'break' outside of a loop",
                None,
            );
            return;
        }
        let depth = self.state().loops.last().unwrap().depth;
        self.discard_locals(depth);
        let jump = self.emit_jump(OpCode::Jump);
        let loop_state = self.state().loops.last_mut().unwrap();
        if loop_state.break_jumps.len() >= MAX_BREAKS {
            let tok = self.previous;
            self.report_error(
                tok,
                codes::JUMP_TOO_FAR,
                "Too many 'break' statements in one loop",
                None,
            );
            return;
        }
        self.state().loops.last_mut().unwrap().break_jumps.push(jump);
    }

    fn continue_statement(&mut self) {
        if self.states.last().unwrap().loops.is_empty() {
            let tok = self.previous;
            self.report_error(
                tok,
                codes::BREAK_OUTSIDE_LOOP,
                "'continue' outside of a loop",
                None,
            );
            return;
        }
        let depth = self.state().loops.last().unwrap().depth;
        self.discard_locals(depth);
        match self.state().loops.last().unwrap().continue_target {
            Some(target) => self.emit_loop(target),
            None => {
                let jump = self.emit_jump(OpCode::Jump);
                self.state()
                    .loops
                    .last_mut()
                    .unwrap()
                    .continue_jumps
                    .push(jump);
            }
        }
    }

    fn return_statement(&mut self) {
        let kind = self.states.last().unwrap().kind;
        if kind == FunctionKind::Script {
            let tok = self.previous;
            self.report_error(
                tok,
                codes::BAD_RETURN,
                "Can't return from top-level code",
                None,
            );
        }

        let bare = matches!(
            self.current.kind,
            TokenKind::KwEnd
                | TokenKind::KwElse
                | TokenKind::KwElseIf
                | TokenKind::KwUntil
                | TokenKind::Semicolon
                | TokenKind::Eof
        );
        if bare {
            self.emit_return();
            return;
        }

        if kind == FunctionKind::Initializer {
            let tok = self.current;
            self.report_error(
                tok,
                codes::BAD_RETURN,
                "Can't return a value from 'init'",
                None,
            );
        }
        self.expression();
        self.emit_op(OpCode::Return);
    }
}

/// Only these opcodes may appear in an initializer for its store to count as
/// dead: constants, locals, arithmetic/logic, and bare table creation.
/// Globals, calls, property access, closures and NEW all disqualify it.
fn side_effect_free(code: &[u8], start: usize, end: usize) -> bool {
    let mut i = start;
    while i < end && i < code.len() {
        let Ok(op) = OpCode::try_from(code[i]) else {
            return false;
        };
        match op {
            OpCode::Constant
            | OpCode::Nil
            | OpCode::True
            | OpCode::False
            | OpCode::GetLocal
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Modulo
            | OpCode::Negate
            | OpCode::Not
            | OpCode::Equal
            | OpCode::Greater
            | OpCode::Less
            | OpCode::Concat
            | OpCode::Length
            | OpCode::Table => {}
            _ => return false,
        }
        i += 1 + op.operand_len();
    }
    true
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
