// Myulax compiler diagnostics
// Created by: Zimeng Li <zimengli@mail.nwpu.edu.cn>
//
// Changelog:
//      26-05-12: Initial version, rustc-style source-context blocks instead of the
//                bare eprintln we shipped in Myula 1.x
//      26-05-27: Stable E/W codes, warning support, 8-error cap lives in the
//                compiler but the summary line is printed here

use std::io::{IsTerminal, Write};

pub const MAX_COMPILE_ERRORS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Stable diagnostic codes. The numbers are part of the tool's interface,
/// never renumber them.
pub mod codes {
    pub const UNEXPECTED_CHAR: &str = "E001";
    pub const UNTERMINATED_STRING: &str = "E002";
    pub const EXPECT_EXPRESSION: &str = "E003";
    pub const EXPECT_TOKEN: &str = "E004";
    pub const BAD_VARIABLE: &str = "E005"; // undefined / redeclared / own-initializer
    pub const INVALID_ASSIGN: &str = "E006";
    pub const BREAK_OUTSIDE_LOOP: &str = "E007";
    pub const SELF_OUTSIDE_CLASS: &str = "E008";
    pub const BAD_SUPER: &str = "E009";
    pub const BAD_RETURN: &str = "E010";
    pub const TOO_MANY_CONSTANTS: &str = "E011";
    pub const TOO_MANY_LOCALS: &str = "E012";
    pub const TOO_MANY_PARAMS: &str = "E013";
    pub const TOO_MANY_ARGS: &str = "E014";
    pub const INHERIT_SELF: &str = "E015";
    pub const JUMP_TOO_FAR: &str = "E016";

    pub const UNUSED_VARIABLE: &str = "W001";
    pub const UNUSED_PARAMETER: &str = "W002";
    pub const SHADOWED_VARIABLE: &str = "W003";
}

const RED: &str = "\x1b[31;1m";
const YELLOW: &str = "\x1b[33;1m";
const BLUE: &str = "\x1b[34;1m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Prints one diagnostic as four blocks:
///     <level>[<code>]: <message>
///       --> <file>:<line>:<column>
///     gutter + source line + caret run
///     optional help line
pub struct DiagnosticReporter<'src> {
    file: String,
    source: &'src str,
    out: Box<dyn Write>,
    color: bool,
    pub error_count: usize,
    pub warning_count: usize,
}

impl<'src> DiagnosticReporter<'src> {
    pub fn new(file: &str, source: &'src str) -> DiagnosticReporter<'src> {
        let color = std::io::stderr().is_terminal();
        return DiagnosticReporter {
            file: file.to_string(),
            source,
            out: Box::new(std::io::stderr()),
            color,
            error_count: 0,
            warning_count: 0,
        };
    }

    /// Redirect output, used by the test suites to capture diagnostics.
    pub fn with_sink(file: &str, source: &'src str, sink: Box<dyn Write>) -> DiagnosticReporter<'src> {
        return DiagnosticReporter {
            file: file.to_string(),
            source,
            out: sink,
            color: false,
            error_count: 0,
            warning_count: 0,
        };
    }

    pub fn report(
        &mut self,
        severity: Severity,
        code: &str,
        message: &str,
        line: u32,
        column: u32,
        length: usize,
        help: Option<&str>,
    ) {
        match severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
        }

        let (label, tint) = match severity {
            Severity::Error => ("error", RED),
            Severity::Warning => ("warning", YELLOW),
        };

        if self.color {
            let _ = writeln!(
                self.out,
                "{}{}[{}]{}{}: {}{}",
                tint, label, code, RESET, BOLD, message, RESET
            );
        } else {
            let _ = writeln!(self.out, "{}[{}]: {}", label, code, message);
        }

        let _ = writeln!(self.out, "  --> {}:{}:{}", self.file, line, column);

        if let Some(src_line) = self.source.lines().nth(line as usize - 1) {
            let gutter_width = format!("{}", line).len().max(2);
            let arrow = if self.color { BLUE } else { "" };
            let reset = if self.color { RESET } else { "" };
            let _ = writeln!(self.out, "{}{:>width$} |{}", arrow, "", reset, width = gutter_width);
            let _ = writeln!(
                self.out,
                "{}{:>width$} |{} {}",
                arrow,
                line,
                reset,
                src_line,
                width = gutter_width
            );
            let caret_pad = " ".repeat(column.saturating_sub(1) as usize);
            let carets = "^".repeat(length.max(1));
            if self.color {
                let _ = writeln!(
                    self.out,
                    "{}{:>width$} |{} {}{}{}{}",
                    arrow, "", RESET, caret_pad, tint, carets, RESET,
                    width = gutter_width
                );
            } else {
                let _ = writeln!(
                    self.out,
                    "{:>width$} | {}{}",
                    "",
                    caret_pad,
                    carets,
                    width = gutter_width
                );
            }
        }

        if let Some(help) = help {
            let _ = writeln!(self.out, "help: {}", help);
        }
        let _ = writeln!(self.out);
    }

    /// One summary line after compilation ends with errors.
    pub fn summary(&mut self) {
        if self.error_count == 0 {
            return;
        }
        let capped = if self.error_count >= MAX_COMPILE_ERRORS {
            " (further errors suppressed)"
        } else {
            ""
        };
        let _ = writeln!(
            self.out,
            "compilation failed: {} error(s), {} warning(s){}",
            self.error_count, self.warning_count, capped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn four_block_layout() {
        let buf = SharedBuf::default();
        let source = "local x = \nprint(x)";
        let mut reporter =
            DiagnosticReporter::with_sink("demo.mlx", source, Box::new(buf.clone()));
        reporter.report(
            Severity::Error,
            codes::EXPECT_EXPRESSION,
            "Expected expression",
            1,
            11,
            1,
            Some("initializers need a value; use 'nil' to leave it empty"),
        );

        let text = String::from_utf8(buf.0.borrow().clone()).unwrap();
        assert!(text.contains("error[E003]: Expected expression"));
        assert!(text.contains("--> demo.mlx:1:11"));
        assert!(text.contains(" 1 | local x = "));
        assert!(text.contains("^"));
        assert!(text.contains("help: initializers need a value"));
        assert_eq!(reporter.error_count, 1);
    }

    #[test]
    fn caret_spans_token_length() {
        let buf = SharedBuf::default();
        let source = "return 1";
        let mut reporter =
            DiagnosticReporter::with_sink("demo.mlx", source, Box::new(buf.clone()));
        reporter.report(
            Severity::Warning,
            codes::UNUSED_VARIABLE,
            "unused",
            1,
            1,
            6,
            None,
        );
        let text = String::from_utf8(buf.0.borrow().clone()).unwrap();
        assert!(text.contains("^^^^^^"));
        assert_eq!(reporter.warning_count, 1);
    }
}
