// Operand model and parsing: registers, segment registers, immediates
// (numbers, character literals, the restricted +/- expression form) and
// bracketed memory operands.

use crate::emitter::Pass;
use crate::error::{AsmError, AsmErrorKind};
use crate::labels::LabelTable;
use crate::registers::{register_info, segment_code};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W8,
    W16,
    W32,
}

impl Width {
    pub fn bits(self) -> u8 {
        match self {
            Width::W8 => 8,
            Width::W16 => 16,
            Width::W32 => 32,
        }
    }
}

/// A decomposed `[base+index*scale+disp]` operand. `width` is the
/// addressing width, taken from the registers used inside the brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOperand {
    pub base: Option<u8>,
    pub index: Option<u8>,
    pub scale: u8,
    pub disp: i32,
    pub width: Option<Width>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Register { code: u8, width: Width },
    Segment { code: u8 },
    Immediate(u32),
    Memory(MemOperand),
}

/// Split an instruction's operand field at commas, honoring brackets and
/// quotes so `[bx+2]` and `'a,b'` stay intact.
pub fn split_operands(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0u32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        match ch {
            '\'' | '"' => match quote {
                Some(q) if q == ch => quote = None,
                Some(_) => {}
                None => quote = Some(ch),
            },
            '[' if quote.is_none() => depth += 1,
            ']' if quote.is_none() => depth = depth.saturating_sub(1),
            ',' if quote.is_none() && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

/// Parse a numeric literal: decimal, `0x` hex, `h`-suffixed hex, a
/// character literal, `$` (current address), `$$` (origin), or a
/// restricted `+`/`-` expression over those forms. Expressions evaluate
/// strictly left to right; parentheses are skipped like whitespace.
pub fn parse_number(text: &str, at: u32, origin: u32) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.starts_with('\'') || text.starts_with('"') {
        return parse_char_literal(text);
    }
    if text.contains('+') || text.contains('-') {
        return eval_expression(text, at, origin);
    }
    parse_plain_number(text, at, origin)
}

fn parse_char_literal(text: &str) -> Option<u32> {
    let mut chars = text.chars();
    let quote = chars.next()?;
    let value = chars.next()?;
    if chars.next() != Some(quote) || !value.is_ascii() {
        return None;
    }
    Some(value as u32)
}

fn parse_plain_number(text: &str, at: u32, origin: u32) -> Option<u32> {
    match text {
        "$" => return Some(at),
        "$$" => return Some(origin),
        _ => {}
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Some(digits) = text.strip_suffix('h').or_else(|| text.strip_suffix('H')) {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return u32::from_str_radix(digits, 16).ok();
        }
    }
    text.parse::<u32>().ok()
}

fn eval_expression(text: &str, at: u32, origin: u32) -> Option<u32> {
    let mut acc: u32 = 0;
    let mut op = '+';
    let mut token = String::new();
    let mut seen = false;

    let mut flush = |acc: &mut u32, token: &mut String, op: char| -> Option<()> {
        if token.is_empty() {
            return Some(());
        }
        let value = parse_plain_number(token, at, origin)
            .or_else(|| parse_char_literal(token))?;
        *acc = match op {
            '+' => acc.wrapping_add(value),
            _ => acc.wrapping_sub(value),
        };
        token.clear();
        Some(())
    };

    for ch in text.chars() {
        match ch {
            '+' | '-' => {
                flush(&mut acc, &mut token, op)?;
                op = ch;
            }
            '(' | ')' => flush(&mut acc, &mut token, op)?,
            ch if ch.is_whitespace() => flush(&mut acc, &mut token, op)?,
            ch => {
                token.push(ch);
                seen = true;
            }
        }
    }
    flush(&mut acc, &mut token, op)?;
    if seen {
        Some(acc)
    } else {
        None
    }
}

/// Parse one operand. Unresolved identifiers become a zero immediate in
/// pass 1 (forward references) and an error in pass 2.
pub fn parse_operand(
    text: &str,
    labels: &LabelTable,
    pass: Pass,
    at: u32,
    origin: u32,
) -> Result<Operand, AsmError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Operand::None);
    }
    if text.starts_with('[') {
        return parse_memory(text, at, origin);
    }
    if let Some((code, width)) = register_info(text) {
        return Ok(Operand::Register { code, width });
    }
    if let Some(code) = segment_code(text) {
        return Ok(Operand::Segment { code });
    }
    if let Some(value) = parse_number(text, at, origin) {
        return Ok(Operand::Immediate(value));
    }
    if let Some(address) = labels.lookup(text) {
        return Ok(Operand::Immediate(address));
    }
    if pass == Pass::One {
        return Ok(Operand::Immediate(0));
    }
    Err(AsmError::new(
        AsmErrorKind::Symbol,
        "Undefined symbol",
        Some(text),
    ))
}

fn parse_memory(text: &str, at: u32, origin: u32) -> Result<Operand, AsmError> {
    let inner = text
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| {
            AsmError::new(AsmErrorKind::Operand, "Malformed memory operand", Some(text))
        })?;

    let mut mem = MemOperand {
        base: None,
        index: None,
        scale: 1,
        disp: 0,
        width: None,
    };

    for (sign, term) in split_terms(inner) {
        let term = term.trim();
        if term.is_empty() {
            return Err(AsmError::new(
                AsmErrorKind::Operand,
                "Malformed memory operand",
                Some(text),
            ));
        }

        // reg*scale, only valid as an index in 32-bit addressing
        if let Some((reg, scale)) = term.split_once('*') {
            let (code, width) = lookup_address_register(reg.trim(), text)?;
            let scale = match scale.trim() {
                "1" => 1,
                "2" => 2,
                "4" => 4,
                "8" => 8,
                other => {
                    return Err(AsmError::new(
                        AsmErrorKind::Operand,
                        "Invalid scale factor (must be 1, 2, 4 or 8)",
                        Some(other),
                    ))
                }
            };
            if sign < 0 || width != Width::W32 || mem.index.is_some() {
                return Err(AsmError::new(
                    AsmErrorKind::Operand,
                    "Malformed memory operand",
                    Some(text),
                ));
            }
            mem.index = Some(code);
            mem.scale = scale;
            set_address_width(&mut mem, width, text)?;
            continue;
        }

        if let Some((code, width)) = register_info(term) {
            let (code, width) = validate_address_register(code, width, term, text)?;
            if sign < 0 {
                return Err(AsmError::new(
                    AsmErrorKind::Operand,
                    "Malformed memory operand",
                    Some(text),
                ));
            }
            if mem.base.is_none() {
                mem.base = Some(code);
            } else if mem.index.is_none() {
                mem.index = Some(code);
            } else {
                return Err(AsmError::new(
                    AsmErrorKind::Operand,
                    "Malformed memory operand",
                    Some(text),
                ));
            }
            set_address_width(&mut mem, width, text)?;
            continue;
        }

        if let Some(value) = parse_number(term, at, origin) {
            mem.disp = mem.disp.wrapping_add(sign.wrapping_mul(value as i32));
            continue;
        }

        return Err(AsmError::new(
            AsmErrorKind::Operand,
            "Malformed memory operand",
            Some(term),
        ));
    }

    // Index-only 32-bit forms have no encodable base in this dialect.
    if mem.width == Some(Width::W32) && mem.base.is_none() {
        return Err(AsmError::new(
            AsmErrorKind::Operand,
            "32-bit memory operand requires a base register",
            Some(text),
        ));
    }

    Ok(Operand::Memory(mem))
}

fn lookup_address_register(name: &str, operand: &str) -> Result<(u8, Width), AsmError> {
    let (code, width) = register_info(name).ok_or_else(|| {
        AsmError::new(AsmErrorKind::Operand, "Malformed memory operand", Some(operand))
    })?;
    validate_address_register(code, width, name, operand)
}

fn validate_address_register(
    code: u8,
    width: Width,
    name: &str,
    operand: &str,
) -> Result<(u8, Width), AsmError> {
    match width {
        Width::W8 => Err(AsmError::new(
            AsmErrorKind::Operand,
            "8-bit register not valid in an address",
            Some(name),
        )),
        // Only bx, bp, si, di can form a 16-bit address.
        Width::W16 if !matches!(code, 3 | 5 | 6 | 7) => Err(AsmError::new(
            AsmErrorKind::Operand,
            "Register not valid in a 16-bit address",
            Some(name),
        )),
        _ => Ok((code, width)),
    }
}

fn set_address_width(mem: &mut MemOperand, width: Width, operand: &str) -> Result<(), AsmError> {
    match mem.width {
        None => {
            mem.width = Some(width);
            Ok(())
        }
        Some(existing) if existing == width => Ok(()),
        Some(_) => Err(AsmError::new(
            AsmErrorKind::Operand,
            "Mixed 16-bit and 32-bit registers in an address",
            Some(operand),
        )),
    }
}

fn split_terms(inner: &str) -> Vec<(i32, &str)> {
    let mut terms = Vec::new();
    let mut sign = 1;
    let mut start = 0;
    for (i, ch) in inner.char_indices() {
        if ch == '+' || ch == '-' {
            terms.push((sign, &inner[start..i]));
            sign = if ch == '+' { 1 } else { -1 };
            start = i + 1;
        }
    }
    terms.push((sign, &inner[start..]));
    // A leading sign produces an empty first term; drop it.
    if terms.len() > 1 && terms[0].1.trim().is_empty() {
        terms.remove(0);
    }
    terms
}
