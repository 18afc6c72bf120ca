// Assembler core: the per-run context, the line processor, the two-pass
// driver and the command-line front end.

use std::fs;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::directives::{is_directive, process_directive};
use crate::emitter::{CodeEmitter, Pass};
use crate::error::{AsmError, AsmErrorKind, AsmRunError, AsmRunReport, Diagnostic, Severity};
use crate::instructions::assemble_instruction;
use crate::labels::LabelTable;
use crate::operands::{self, Operand};

const VERSION: &str = "1.0";
const LONG_ABOUT: &str = "Two-pass x86 assembler for 16-bit real-mode code \
with 32-bit operand support, producing flat binary images (boot sectors, \
option ROMs, raw blobs). Pass 1 collects label addresses, pass 2 emits bytes; \
the output is written verbatim with no container format.";

#[derive(Parser, Debug)]
#[command(
    name = "asm386",
    version = VERSION,
    about = "Two-pass x86 real-mode assembler producing flat binary images",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(value_name = "INPUT", help = "Input assembly source file")]
    pub input: PathBuf,
    #[arg(value_name = "OUTPUT", help = "Output flat binary file")]
    pub output: PathBuf,
    #[arg(
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Diagnostic output format"
    )]
    pub format: OutputFormat,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        help = "Suppress the success summary"
    )]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Per-run assembler state: the code emitter, the label table and the
/// current origin. One instance covers both passes of one source file.
pub struct Assembler {
    pub emitter: CodeEmitter,
    pub labels: LabelTable,
    pub origin: u32,
    pub pass: Pass,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            emitter: CodeEmitter::new(),
            labels: LabelTable::new(),
            origin: 0,
            pass: Pass::One,
        }
    }

    /// Reset position and origin for a pass. Pass 1 also starts with an
    /// empty label table; pass 2 treats the table as read-only.
    pub fn begin_pass(&mut self, pass: Pass) {
        self.pass = pass;
        self.origin = 0;
        self.emitter.begin_pass(pass);
        if pass == Pass::One {
            self.labels.clear();
        }
    }

    /// Current absolute address: origin plus emitted position, wrapping
    /// like the rest of the dialect's 32-bit address arithmetic.
    pub fn here(&self) -> u32 {
        self.origin.wrapping_add(self.emitter.pos())
    }

    pub fn parse_operand(&self, text: &str) -> Result<Operand, AsmError> {
        operands::parse_operand(text, &self.labels, self.pass, self.here(), self.origin)
    }

    pub fn parse_number(&self, text: &str) -> Option<u32> {
        operands::parse_number(text, self.here(), self.origin)
    }

    /// Process one source line: strip the comment, peel off a label
    /// definition, then hand the rest to the directive or instruction
    /// path. A returned error means the line contributed nothing.
    pub fn process_line(&mut self, line: &str) -> Result<(), AsmError> {
        let line = strip_comment(line);
        let mut rest = line.trim();
        if rest.is_empty() {
            return Ok(());
        }

        // A label only when the prefix before ':' is a plain identifier,
        // so far-jump targets like 0x07c0:0x0000 are left alone.
        if let Some(idx) = rest.find(':') {
            let head = rest[..idx].trim_end();
            if is_identifier(head) {
                if self.pass == Pass::One {
                    self.labels.define(head, self.here())?;
                }
                rest = rest[idx + 1..].trim();
                if rest.is_empty() {
                    return Ok(());
                }
            }
        }

        let (head, tail) = match rest.split_once(char::is_whitespace) {
            Some((head, tail)) => (head, tail.trim_start()),
            None => (rest, ""),
        };

        if head.starts_with('.') || is_directive(head) {
            process_directive(self, head, tail)
        } else {
            let mnemonic = head.to_ascii_lowercase();
            assemble_instruction(self, &mnemonic, tail)
        }
    }

    /// Run one full pass over the source. Recoverable per-line errors
    /// become diagnostics; only fatal errors abort the pass.
    pub fn run_pass(
        &mut self,
        pass: Pass,
        lines: &[String],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), AsmError> {
        self.begin_pass(pass);
        for (idx, line) in lines.iter().enumerate() {
            if let Err(err) = self.process_line(line) {
                if err.is_fatal() {
                    return Err(err);
                }
                diagnostics.push(Diagnostic::new(idx as u32 + 1, Severity::Error, err));
            }
        }
        Ok(())
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, ch) in line.char_indices() {
        match ch {
            '\'' | '"' => match quote {
                Some(q) if q == ch => quote = None,
                Some(_) => {}
                None => quote = Some(ch),
            },
            ';' if quote.is_none() => return &line[..i],
            _ => {}
        }
    }
    line
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Assemble one source text through both passes. Diagnostics from pass 1
/// end the run before pass 2, since label addresses recorded alongside
/// errors cannot be trusted.
pub fn assemble(source: &str) -> Result<AsmRunReport, AsmRunError> {
    let source_lines: Vec<String> = source.lines().map(str::to_string).collect();
    let mut asm = Assembler::new();
    let mut diagnostics = Vec::new();

    if let Err(err) = asm.run_pass(Pass::One, &source_lines, &mut diagnostics) {
        return Err(AsmRunError::new(err, diagnostics, source_lines));
    }
    if !diagnostics.is_empty() {
        return Ok(AsmRunReport::new(Vec::new(), diagnostics, source_lines));
    }
    if let Err(err) = asm.run_pass(Pass::Two, &source_lines, &mut diagnostics) {
        return Err(AsmRunError::new(err, diagnostics, source_lines));
    }
    Ok(AsmRunReport::new(
        asm.emitter.code().to_vec(),
        diagnostics,
        source_lines,
    ))
}

/// CLI entry: read the source, assemble it, and write the image unless
/// any error diagnostics were produced.
pub fn run(cli: &Cli) -> Result<AsmRunReport, AsmRunError> {
    let source = fs::read_to_string(&cli.input).map_err(|err| {
        AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Io,
                &err.to_string(),
                Some(&cli.input.to_string_lossy()),
            ),
            Vec::new(),
            Vec::new(),
        )
    })?;

    let report = assemble(&source)?;
    if report.has_errors() {
        return Ok(report);
    }

    fs::write(&cli.output, report.image()).map_err(|err| {
        AsmRunError::new(
            AsmError::new(
                AsmErrorKind::Io,
                &err.to_string(),
                Some(&cli.output.to_string_lossy()),
            ),
            Vec::new(),
            Vec::new(),
        )
    })?;
    Ok(report)
}
