// Register and segment-register name tables. Pure lookup, no state.

use crate::operands::Width;

const REGS8: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];
const REGS16: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
const REGS32: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];

/// Look up a general-purpose register name, returning its 3-bit encoding
/// and operand width. Case-insensitive.
pub fn register_info(name: &str) -> Option<(u8, Width)> {
    for (code, reg) in REGS8.iter().enumerate() {
        if name.eq_ignore_ascii_case(reg) {
            return Some((code as u8, Width::W8));
        }
    }
    for (code, reg) in REGS16.iter().enumerate() {
        if name.eq_ignore_ascii_case(reg) {
            return Some((code as u8, Width::W16));
        }
    }
    for (code, reg) in REGS32.iter().enumerate() {
        if name.eq_ignore_ascii_case(reg) {
            return Some((code as u8, Width::W32));
        }
    }
    None
}

/// Look up a segment-register name, returning its ModR/M reg-field encoding.
pub fn segment_code(name: &str) -> Option<u8> {
    const SREGS: [&str; 6] = ["es", "cs", "ss", "ds", "fs", "gs"];
    SREGS
        .iter()
        .position(|sreg| name.eq_ignore_ascii_case(sreg))
        .map(|code| code as u8)
}
