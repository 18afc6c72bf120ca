// Error model and diagnostics for the assembler.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmErrorKind {
    Cli,
    Directive,
    Emit,
    Instruction,
    Io,
    Operand,
    Symbol,
}

#[derive(Debug, Clone)]
pub struct AsmError {
    kind: AsmErrorKind,
    message: String,
}

impl AsmError {
    pub fn new(kind: AsmErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self {
            kind,
            message: format_error(msg, param),
        }
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Fatal errors abort the whole run; everything else is reported
    /// per line and assembly continues with the next line.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, AsmErrorKind::Emit | AsmErrorKind::Io)
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AsmError {}

fn format_error(msg: &str, param: Option<&str>) -> String {
    match param {
        Some(p) => format!("{msg}: {p}"),
        None => msg.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    line: u32,
    column: Option<usize>,
    severity: Severity,
    error: AsmError,
    file: Option<String>,
}

impl Diagnostic {
    pub fn new(line: u32, severity: Severity, error: AsmError) -> Self {
        Self {
            line,
            column: None,
            severity,
            error,
            file: None,
        }
    }

    pub fn with_column(mut self, column: Option<usize>) -> Self {
        self.column = column;
        self
    }

    pub fn with_file(mut self, file: Option<String>) -> Self {
        self.file = file;
        self
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> Option<usize> {
        self.column
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        self.error.message()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn format(&self) -> String {
        let sev = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        format!("{}: {} - {}", self.line, sev, self.error.message())
    }

    pub fn format_with_context(&self, lines: Option<&[String]>, use_color: bool) -> String {
        let sev = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        let header = match &self.file {
            Some(file) => format!("{file}:{}: {sev}", self.line),
            None => format!("{}: {sev}", self.line),
        };

        let mut out = String::new();
        out.push_str(&header);
        out.push('\n');

        for line in build_context_lines(self.line, self.column, lines, use_color) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(&format!("{sev}: {}", self.error.message()));
        out
    }
}

/// Per-file run summary handed back to the caller: the assembled image
/// plus every diagnostic produced along the way.
pub struct AsmRunReport {
    image: Vec<u8>,
    diagnostics: Vec<Diagnostic>,
    source_lines: Vec<String>,
}

impl AsmRunReport {
    pub fn new(image: Vec<u8>, diagnostics: Vec<Diagnostic>, source_lines: Vec<String>) -> Self {
        Self {
            image,
            diagnostics,
            source_lines,
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn bytes(&self) -> u32 {
        self.image.len() as u32
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity() == Severity::Error)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn source_lines(&self) -> &[String] {
        &self.source_lines
    }
}

#[derive(Debug)]
pub struct AsmRunError {
    error: AsmError,
    diagnostics: Vec<Diagnostic>,
    source_lines: Vec<String>,
}

impl AsmRunError {
    pub fn new(error: AsmError, diagnostics: Vec<Diagnostic>, source_lines: Vec<String>) -> Self {
        Self {
            error,
            diagnostics,
            source_lines,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn source_lines(&self) -> &[String] {
        &self.source_lines
    }
}

impl fmt::Display for AsmRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for AsmRunError {}

pub fn build_context_lines(
    line_num: u32,
    column: Option<usize>,
    lines: Option<&[String]>,
    use_color: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    let line_idx = line_num.saturating_sub(1) as usize;

    let lines = match lines {
        Some(lines) if !lines.is_empty() => lines,
        _ => {
            out.push(format!("{:>5} | <source unavailable>", line_num));
            return out;
        }
    };

    if line_idx >= lines.len() {
        out.push(format!("{:>5} | <source unavailable>", line_num));
        return out;
    }

    let display = highlight_line(&lines[line_idx], column, use_color);
    out.push(format!("{:>5} | {}", line_num, display));
    out
}

fn highlight_line(line: &str, column: Option<usize>, use_color: bool) -> String {
    let col = match column {
        Some(c) if c > 0 => c,
        _ => return line.to_string(),
    };
    let idx = col - 1;
    if idx >= line.len() {
        if use_color {
            return format!("{line}\x1b[31m^\x1b[0m");
        }
        return format!("{line}^");
    }
    let (head, tail) = line.split_at(idx);
    let ch = tail.chars().next().unwrap_or(' ');
    let rest = &tail[ch.len_utf8()..];
    if use_color {
        format!("{head}\x1b[31m{ch}\x1b[0m{rest}")
    } else {
        format!("{head}{ch}{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::{build_context_lines, AsmError, AsmErrorKind, Diagnostic, Severity};

    #[test]
    fn error_message_appends_param() {
        let err = AsmError::new(AsmErrorKind::Symbol, "Undefined symbol", Some("loop_top"));
        assert_eq!(err.message(), "Undefined symbol: loop_top");
    }

    #[test]
    fn emit_and_io_errors_are_fatal() {
        assert!(AsmError::new(AsmErrorKind::Emit, "Code size exceeded", None).is_fatal());
        assert!(AsmError::new(AsmErrorKind::Io, "Cannot open file", None).is_fatal());
        assert!(!AsmError::new(AsmErrorKind::Instruction, "No such instruction", None).is_fatal());
    }

    #[test]
    fn diagnostic_format_has_line_and_severity() {
        let diag = Diagnostic::new(
            3,
            Severity::Error,
            AsmError::new(AsmErrorKind::Instruction, "No such instruction", Some("foobar")),
        );
        assert_eq!(diag.format(), "3: ERROR - No such instruction: foobar");
    }

    #[test]
    fn context_lines_show_the_offending_source() {
        let lines = vec!["nop".to_string(), "foobar".to_string()];
        let out = build_context_lines(2, None, Some(&lines), false);
        assert_eq!(out, vec!["    2 | foobar".to_string()]);
    }

    #[test]
    fn context_lines_handle_missing_source() {
        let out = build_context_lines(9, None, None, false);
        assert_eq!(out, vec!["    9 | <source unavailable>".to_string()]);
    }
}
