// Data and layout directives. Names are accepted with or without the
// leading dot, so both `.times 3 db 0` and the bare boot-sector idiom
// `times 510-($-$$) db 0` work.

use crate::assembler::Assembler;
use crate::error::{AsmError, AsmErrorKind};

const DIRECTIVES: &[&str] = &["org", "db", "dw", "dd", "align", "times", "pad"];

/// True when `name` (dot optional) is a known directive.
pub fn is_directive(name: &str) -> bool {
    let bare = name.strip_prefix('.').unwrap_or(name);
    DIRECTIVES.iter().any(|&d| d == bare)
}

pub fn process_directive(
    asm: &mut Assembler,
    name: &str,
    operands: &str,
) -> Result<(), AsmError> {
    let bare = name.strip_prefix('.').unwrap_or(name);
    match bare {
        "org" => directive_org(asm, operands),
        "db" => directive_db(asm, operands),
        "dw" => directive_dw(asm, operands),
        "dd" => directive_dd(asm, operands),
        "align" => directive_align(asm, operands),
        "times" => directive_times(asm, operands),
        "pad" => directive_pad(asm, operands),
        _ => Err(AsmError::new(
            AsmErrorKind::Directive,
            "Unknown directive",
            Some(name),
        )),
    }
}

fn directive_org(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    match asm.parse_number(operands) {
        Some(address) => {
            asm.origin = address;
            Ok(())
        }
        None => Err(AsmError::new(
            AsmErrorKind::Directive,
            "Invalid origin address",
            Some(operands.trim()),
        )),
    }
}

/// Bytes: a mix of numeric values and quoted strings. String contents
/// are emitted raw, no escape processing. The whole argument list is
/// scanned before anything is emitted, so a bad token contributes
/// zero bytes.
fn directive_db(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let mut bytes = Vec::new();
    let mut chars = operands.char_indices().peekable();
    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_whitespace() || ch == ',' {
            chars.next();
            continue;
        }
        if ch == '"' || ch == '\'' {
            chars.next();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == ch {
                    closed = true;
                    break;
                }
                if !c.is_ascii() {
                    return Err(AsmError::new(
                        AsmErrorKind::Directive,
                        "Non-ASCII character in string literal",
                        None,
                    ));
                }
                bytes.push(c as u8);
            }
            if !closed {
                return Err(AsmError::new(
                    AsmErrorKind::Directive,
                    "Unterminated string literal",
                    None,
                ));
            }
            continue;
        }
        // Numeric token: runs to the next whitespace or comma.
        let mut end = operands.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == ',' {
                end = i;
                break;
            }
            chars.next();
        }
        let token = &operands[start..end];
        match asm.parse_number(token) {
            Some(value) => bytes.push(value as u8),
            None => {
                return Err(AsmError::new(
                    AsmErrorKind::Directive,
                    "Invalid byte value",
                    Some(token),
                ))
            }
        }
    }
    for byte in bytes {
        asm.emitter.emit_byte(byte)?;
    }
    Ok(())
}

fn directive_dw(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let values = parse_value_list(asm, operands, "Invalid word value")?;
    for value in values {
        asm.emitter.emit_word(value as u16)?;
    }
    Ok(())
}

fn directive_dd(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let values = parse_value_list(asm, operands, "Invalid dword value")?;
    for value in values {
        asm.emitter.emit_dword(value)?;
    }
    Ok(())
}

fn parse_value_list(asm: &Assembler, operands: &str, msg: &str) -> Result<Vec<u32>, AsmError> {
    let mut values = Vec::new();
    for token in operands.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        match asm.parse_number(token) {
            Some(value) => values.push(value),
            None => return Err(AsmError::new(AsmErrorKind::Directive, msg, Some(token))),
        }
    }
    Ok(values)
}

fn directive_align(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let alignment = asm.parse_number(operands).filter(|&n| n > 0).ok_or_else(|| {
        AsmError::new(
            AsmErrorKind::Directive,
            "Invalid alignment",
            Some(operands.trim()),
        )
    })?;
    while asm.emitter.pos() % alignment != 0 {
        asm.emitter.emit_byte(0x00)?;
    }
    Ok(())
}

fn directive_pad(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let target = asm.parse_number(operands).ok_or_else(|| {
        AsmError::new(
            AsmErrorKind::Directive,
            "Invalid pad address",
            Some(operands.trim()),
        )
    })?;
    while asm.here() < target {
        asm.emitter.emit_byte(0x00)?;
    }
    Ok(())
}

/// `times <count> <db|dw|dd> args`: the count expression is evaluated
/// once, before any repetition advances the position.
fn directive_times(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let trimmed = operands.trim();
    let (count_text, rest) = trimmed.split_once(char::is_whitespace).ok_or_else(|| {
        AsmError::new(AsmErrorKind::Directive, "Malformed times directive", Some(trimmed))
    })?;
    let count = asm.parse_number(count_text).ok_or_else(|| {
        AsmError::new(
            AsmErrorKind::Directive,
            "Invalid repeat count",
            Some(count_text),
        )
    })?;

    let rest = rest.trim_start();
    let (sub, args) = match rest.split_once(char::is_whitespace) {
        Some((sub, args)) => (sub, args),
        None => (rest, ""),
    };
    let sub = sub.strip_prefix('.').unwrap_or(sub);
    if !matches!(sub, "db" | "dw" | "dd") {
        return Err(AsmError::new(
            AsmErrorKind::Directive,
            "times expects a db/dw/dd body",
            Some(rest),
        ));
    }
    for _ in 0..count {
        process_directive(asm, sub, args)?;
    }
    Ok(())
}
