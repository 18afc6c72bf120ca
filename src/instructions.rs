// Instruction dispatch and encoding. Mnemonics are matched lowercase;
// each family handler validates its operand shapes and emits opcode,
// ModR/M and immediate bytes through the shared emitter.

use crate::assembler::Assembler;
use crate::emitter::Pass;
use crate::error::{AsmError, AsmErrorKind};
use crate::operands::{MemOperand, Operand, Width};

/// Zero-operand instructions with a fixed single-byte encoding.
const SIMPLE_OPS: &[(&str, u8)] = &[
    ("nop", 0x90),
    ("ret", 0xc3),
    ("hlt", 0xf4),
    ("cli", 0xfa),
    ("sti", 0xfb),
    ("cld", 0xfc),
    ("std", 0xfd),
    ("lodsb", 0xac),
    ("stosb", 0xaa),
    ("movsb", 0xa4),
    ("cmpsb", 0xa6),
    ("scasb", 0xae),
    ("lodsw", 0xad),
    ("stosw", 0xab),
    ("movsw", 0xa5),
    ("cmpsw", 0xa7),
    ("scasw", 0xaf),
    ("pushf", 0x9c),
    ("pushfw", 0x9c),
    ("popf", 0x9d),
    ("popfw", 0x9d),
    ("cbw", 0x98),
    ("cwd", 0x99),
    ("lahf", 0x9f),
    ("sahf", 0x9e),
];

/// One arith/logic family: accumulator-immediate short opcodes, the
/// 0x80/0x81 extension value, the rm,reg opcode pair, and the optional
/// reg,rm and mem,imm forms.
struct AluFamily {
    acc_imm8: u8,
    acc_imm: u8,
    ext: u8,
    rm_reg8: u8,
    rm_reg: u8,
    reg_rm: Option<(u8, u8)>,
    mem_imm: bool,
    // test reg,imm encodes as 0xf6/0xf7 /0 instead of 0x80/0x81
    imm_group3: bool,
}

const ADD: AluFamily = AluFamily {
    acc_imm8: 0x04,
    acc_imm: 0x05,
    ext: 0,
    rm_reg8: 0x00,
    rm_reg: 0x01,
    reg_rm: Some((0x02, 0x03)),
    mem_imm: true,
    imm_group3: false,
};
const OR: AluFamily = AluFamily {
    acc_imm8: 0x0c,
    acc_imm: 0x0d,
    ext: 1,
    rm_reg8: 0x08,
    rm_reg: 0x09,
    reg_rm: None,
    mem_imm: false,
    imm_group3: false,
};
const AND: AluFamily = AluFamily {
    acc_imm8: 0x24,
    acc_imm: 0x25,
    ext: 4,
    rm_reg8: 0x20,
    rm_reg: 0x21,
    reg_rm: None,
    mem_imm: false,
    imm_group3: false,
};
const SUB: AluFamily = AluFamily {
    acc_imm8: 0x2c,
    acc_imm: 0x2d,
    ext: 5,
    rm_reg8: 0x28,
    rm_reg: 0x29,
    reg_rm: Some((0x2a, 0x2b)),
    mem_imm: false,
    imm_group3: false,
};
const XOR: AluFamily = AluFamily {
    acc_imm8: 0x34,
    acc_imm: 0x35,
    ext: 6,
    rm_reg8: 0x30,
    rm_reg: 0x31,
    reg_rm: None,
    mem_imm: false,
    imm_group3: false,
};
const CMP: AluFamily = AluFamily {
    acc_imm8: 0x3c,
    acc_imm: 0x3d,
    ext: 7,
    rm_reg8: 0x38,
    rm_reg: 0x39,
    reg_rm: Some((0x3a, 0x3b)),
    mem_imm: true,
    imm_group3: false,
};
const TEST: AluFamily = AluFamily {
    acc_imm8: 0xa8,
    acc_imm: 0xa9,
    ext: 0,
    rm_reg8: 0x84,
    rm_reg: 0x85,
    reg_rm: None,
    mem_imm: false,
    imm_group3: true,
};

pub fn assemble_instruction(
    asm: &mut Assembler,
    mnemonic: &str,
    operands: &str,
) -> Result<(), AsmError> {
    if let Some(&(_, opcode)) = SIMPLE_OPS.iter().find(|&&(name, _)| name == mnemonic) {
        return asm.emitter.emit_byte(opcode);
    }

    match mnemonic {
        "mov" => assemble_mov(asm, operands),
        "push" => assemble_push(asm, operands),
        "pop" => assemble_pop(asm, operands),
        "lea" => assemble_lea(asm, operands),

        "add" => assemble_alu(asm, mnemonic, &ADD, operands),
        "or" => assemble_alu(asm, mnemonic, &OR, operands),
        "and" => assemble_alu(asm, mnemonic, &AND, operands),
        "sub" => assemble_alu(asm, mnemonic, &SUB, operands),
        "xor" => assemble_alu(asm, mnemonic, &XOR, operands),
        "cmp" => assemble_alu(asm, mnemonic, &CMP, operands),
        "test" => assemble_alu(asm, mnemonic, &TEST, operands),

        "inc" => assemble_inc_dec(asm, mnemonic, 0x40, 0, operands),
        "dec" => assemble_inc_dec(asm, mnemonic, 0x48, 1, operands),
        "not" => assemble_group3(asm, mnemonic, 2, operands),
        "neg" => assemble_group3(asm, mnemonic, 3, operands),
        "mul" => assemble_group3(asm, mnemonic, 4, operands),
        "imul" => assemble_group3(asm, mnemonic, 5, operands),
        "div" => assemble_group3(asm, mnemonic, 6, operands),
        "idiv" => assemble_group3(asm, mnemonic, 7, operands),

        "shl" => assemble_shift(asm, mnemonic, 4, operands),
        "shr" => assemble_shift(asm, mnemonic, 5, operands),

        "jmp" => assemble_jmp(asm, operands),
        "je" | "jz" => assemble_jcc(asm, mnemonic, 0x74, operands),
        "jne" | "jnz" => assemble_jcc(asm, mnemonic, 0x75, operands),
        "jl" => assemble_jcc(asm, mnemonic, 0x7c, operands),
        "jg" => assemble_jcc(asm, mnemonic, 0x7f, operands),
        "jle" => assemble_jcc(asm, mnemonic, 0x7e, operands),
        "jge" => assemble_jcc(asm, mnemonic, 0x7d, operands),
        "ja" => assemble_jcc(asm, mnemonic, 0x77, operands),
        "jae" | "jnc" => assemble_jcc(asm, mnemonic, 0x73, operands),
        "jb" | "jc" => assemble_jcc(asm, mnemonic, 0x72, operands),
        "jbe" | "jna" => assemble_jcc(asm, mnemonic, 0x76, operands),

        "call" => assemble_call(asm, operands),
        "int" => assemble_int(asm, operands),

        "loop" => assemble_loop(asm, mnemonic, 0xe2, operands),
        "loope" | "loopz" => assemble_loop(asm, mnemonic, 0xe1, operands),
        "loopne" | "loopnz" => assemble_loop(asm, mnemonic, 0xe0, operands),

        "xchg" => assemble_xchg(asm, operands),
        "in" => assemble_in(asm, operands),
        "out" => assemble_out(asm, operands),

        _ => Err(AsmError::new(
            AsmErrorKind::Instruction,
            "Unknown instruction",
            Some(mnemonic),
        )),
    }
}

fn invalid_operands(mnemonic: &str) -> AsmError {
    AsmError::new(
        AsmErrorKind::Instruction,
        "Invalid operand combination",
        Some(mnemonic),
    )
}

fn two_operands<'a>(mnemonic: &str, operands: &'a str) -> Result<(&'a str, &'a str), AsmError> {
    let parts = crate::operands::split_operands(operands);
    if parts.len() == 2 {
        Ok((parts[0], parts[1]))
    } else {
        Err(AsmError::new(
            AsmErrorKind::Instruction,
            "Expected two operands",
            Some(mnemonic),
        ))
    }
}

fn one_operand<'a>(mnemonic: &str, operands: &'a str) -> Result<&'a str, AsmError> {
    let parts = crate::operands::split_operands(operands);
    if parts.len() == 1 && !parts[0].is_empty() {
        Ok(parts[0])
    } else {
        Err(AsmError::new(
            AsmErrorKind::Instruction,
            "Expected one operand",
            Some(mnemonic),
        ))
    }
}

/// Strip a leading `byte`/`word`/`dword` size override (optionally
/// followed by `ptr`) from one operand's text.
fn strip_size_prefix(text: &str) -> (Option<Width>, &str) {
    let trimmed = text.trim();
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim_start()),
        None => return (None, trimmed),
    };
    let width = match head.to_ascii_lowercase().as_str() {
        "byte" => Width::W8,
        "word" => Width::W16,
        "dword" => Width::W32,
        _ => return (None, trimmed),
    };
    let rest = match rest.split_once(char::is_whitespace) {
        Some((head, tail)) if head.eq_ignore_ascii_case("ptr") => tail.trim_start(),
        _ => rest,
    };
    (Some(width), rest)
}

/// Destination width for a mem,imm form: explicit override, then the
/// memory operand's register width, then 16-bit.
fn mem_imm_width(explicit: Option<Width>, mem: &MemOperand) -> Width {
    explicit.or(mem.width).unwrap_or(Width::W16)
}

fn assemble_mov(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let (dst_text, src_text) = two_operands("mov", operands)?;
    let (dst_size, dst_text) = strip_size_prefix(dst_text);
    let (src_size, src_text) = strip_size_prefix(src_text);
    let explicit = dst_size.or(src_size);
    let dst = asm.parse_operand(dst_text)?;
    let src = asm.parse_operand(src_text)?;

    match (dst, src) {
        // Segment moves have fixed opcodes regardless of size.
        (Operand::Segment { code: seg }, Operand::Register { code, .. }) => {
            asm.emitter.emit_byte(0x8e)?;
            asm.emitter.emit_modrm(3, seg, code)
        }
        (Operand::Register { code, .. }, Operand::Segment { code: seg }) => {
            asm.emitter.emit_byte(0x8c)?;
            asm.emitter.emit_modrm(3, seg, code)
        }
        (Operand::Register { code, width }, Operand::Immediate(imm)) => match width {
            Width::W32 => {
                asm.emitter.emit_byte(0x66)?;
                asm.emitter.emit_byte(0xb8 + code)?;
                asm.emitter.emit_dword(imm)
            }
            Width::W16 => {
                asm.emitter.emit_byte(0xb8 + code)?;
                asm.emitter.emit_word(imm as u16)
            }
            Width::W8 => {
                asm.emitter.emit_byte(0xb0 + code)?;
                asm.emitter.emit_byte(imm as u8)
            }
        },
        (
            Operand::Register { code: dst_reg, width: dst_w },
            Operand::Register { code: src_reg, width: src_w },
        ) => {
            emit_width_opcode(asm, 0x88, 0x89, dst_w, src_w)?;
            asm.emitter.emit_modrm(3, src_reg, dst_reg)
        }
        (Operand::Register { code, width }, Operand::Memory(mem)) => {
            emit_width_opcode(asm, 0x8a, 0x8b, width, width)?;
            asm.emitter.emit_mem_operand(code, &mem)
        }
        (Operand::Memory(mem), Operand::Register { code, width }) => {
            emit_width_opcode(asm, 0x88, 0x89, width, width)?;
            asm.emitter.emit_mem_operand(code, &mem)
        }
        (Operand::Memory(mem), Operand::Immediate(imm)) => {
            match mem_imm_width(explicit, &mem) {
                Width::W32 => {
                    asm.emitter.emit_byte(0x66)?;
                    asm.emitter.emit_byte(0xc7)?;
                    asm.emitter.emit_mem_operand(0, &mem)?;
                    asm.emitter.emit_dword(imm)
                }
                Width::W16 => {
                    asm.emitter.emit_byte(0xc7)?;
                    asm.emitter.emit_mem_operand(0, &mem)?;
                    asm.emitter.emit_word(imm as u16)
                }
                Width::W8 => {
                    asm.emitter.emit_byte(0xc6)?;
                    asm.emitter.emit_mem_operand(0, &mem)?;
                    asm.emitter.emit_byte(imm as u8)
                }
            }
        }
        _ => Err(invalid_operands("mov")),
    }
}

/// Opcode pair selection shared by the two-register and reg,mem forms:
/// the 8-bit opcode when both widths are 8-bit, otherwise the wide
/// opcode with a 0x66 prefix when either side is 32-bit.
fn emit_width_opcode(
    asm: &mut Assembler,
    op8: u8,
    op_wide: u8,
    a: Width,
    b: Width,
) -> Result<(), AsmError> {
    if a == Width::W32 || b == Width::W32 {
        asm.emitter.emit_byte(0x66)?;
        asm.emitter.emit_byte(op_wide)
    } else if a == Width::W16 || b == Width::W16 {
        asm.emitter.emit_byte(op_wide)
    } else {
        asm.emitter.emit_byte(op8)
    }
}

fn assemble_alu(
    asm: &mut Assembler,
    mnemonic: &str,
    family: &AluFamily,
    operands: &str,
) -> Result<(), AsmError> {
    let (dst_text, src_text) = two_operands(mnemonic, operands)?;
    let (dst_size, dst_text) = strip_size_prefix(dst_text);
    let dst = asm.parse_operand(dst_text)?;
    let src = asm.parse_operand(src_text)?;

    match (dst, src) {
        (Operand::Register { code, width }, Operand::Immediate(imm)) => {
            if code == 0 {
                // Accumulator short form.
                match width {
                    Width::W32 => {
                        asm.emitter.emit_byte(0x66)?;
                        asm.emitter.emit_byte(family.acc_imm)?;
                        asm.emitter.emit_dword(imm)
                    }
                    Width::W16 => {
                        asm.emitter.emit_byte(family.acc_imm)?;
                        asm.emitter.emit_word(imm as u16)
                    }
                    Width::W8 => {
                        asm.emitter.emit_byte(family.acc_imm8)?;
                        asm.emitter.emit_byte(imm as u8)
                    }
                }
            } else {
                let (op8, op_wide) = if family.imm_group3 {
                    (0xf6, 0xf7)
                } else {
                    (0x80, 0x81)
                };
                match width {
                    Width::W32 => {
                        asm.emitter.emit_byte(0x66)?;
                        asm.emitter.emit_byte(op_wide)?;
                        asm.emitter.emit_modrm(3, family.ext, code)?;
                        asm.emitter.emit_dword(imm)
                    }
                    Width::W16 => {
                        asm.emitter.emit_byte(op_wide)?;
                        asm.emitter.emit_modrm(3, family.ext, code)?;
                        asm.emitter.emit_word(imm as u16)
                    }
                    Width::W8 => {
                        asm.emitter.emit_byte(op8)?;
                        asm.emitter.emit_modrm(3, family.ext, code)?;
                        asm.emitter.emit_byte(imm as u8)
                    }
                }
            }
        }
        (
            Operand::Register { code: dst_reg, width: dst_w },
            Operand::Register { code: src_reg, width: src_w },
        ) => {
            emit_width_opcode(asm, family.rm_reg8, family.rm_reg, dst_w, src_w)?;
            asm.emitter.emit_modrm(3, src_reg, dst_reg)
        }
        (Operand::Register { code, width }, Operand::Memory(mem)) => {
            let (op8, op_wide) = family.reg_rm.ok_or_else(|| invalid_operands(mnemonic))?;
            emit_width_opcode(asm, op8, op_wide, width, width)?;
            asm.emitter.emit_mem_operand(code, &mem)
        }
        (Operand::Memory(mem), Operand::Immediate(imm)) => {
            if !family.mem_imm {
                return Err(invalid_operands(mnemonic));
            }
            match mem_imm_width(dst_size, &mem) {
                Width::W32 => {
                    asm.emitter.emit_byte(0x66)?;
                    asm.emitter.emit_byte(0x81)?;
                    asm.emitter.emit_mem_operand(family.ext, &mem)?;
                    asm.emitter.emit_dword(imm)
                }
                Width::W16 => {
                    asm.emitter.emit_byte(0x81)?;
                    asm.emitter.emit_mem_operand(family.ext, &mem)?;
                    asm.emitter.emit_word(imm as u16)
                }
                Width::W8 => {
                    asm.emitter.emit_byte(0x80)?;
                    asm.emitter.emit_mem_operand(family.ext, &mem)?;
                    asm.emitter.emit_byte(imm as u8)
                }
            }
        }
        _ => Err(invalid_operands(mnemonic)),
    }
}

fn assemble_inc_dec(
    asm: &mut Assembler,
    mnemonic: &str,
    base: u8,
    ext: u8,
    operands: &str,
) -> Result<(), AsmError> {
    let text = one_operand(mnemonic, operands)?;
    match asm.parse_operand(text)? {
        Operand::Register { code, width: Width::W32 } => {
            asm.emitter.emit_byte(0x66)?;
            asm.emitter.emit_byte(base + code)
        }
        Operand::Register { code, width: Width::W16 } => asm.emitter.emit_byte(base + code),
        Operand::Register { code, width: Width::W8 } => {
            asm.emitter.emit_byte(0xfe)?;
            asm.emitter.emit_modrm(3, ext, code)
        }
        _ => Err(invalid_operands(mnemonic)),
    }
}

fn assemble_group3(
    asm: &mut Assembler,
    mnemonic: &str,
    ext: u8,
    operands: &str,
) -> Result<(), AsmError> {
    let text = one_operand(mnemonic, operands)?;
    match asm.parse_operand(text)? {
        Operand::Register { code, width } => {
            match width {
                Width::W32 => {
                    asm.emitter.emit_byte(0x66)?;
                    asm.emitter.emit_byte(0xf7)?;
                }
                Width::W16 => asm.emitter.emit_byte(0xf7)?,
                Width::W8 => asm.emitter.emit_byte(0xf6)?,
            }
            asm.emitter.emit_modrm(3, ext, code)
        }
        _ => Err(invalid_operands(mnemonic)),
    }
}

fn assemble_shift(
    asm: &mut Assembler,
    mnemonic: &str,
    ext: u8,
    operands: &str,
) -> Result<(), AsmError> {
    let (dst_text, src_text) = two_operands(mnemonic, operands)?;
    let dst = asm.parse_operand(dst_text)?;
    let src = asm.parse_operand(src_text)?;
    match (dst, src) {
        (Operand::Register { code, width }, Operand::Immediate(count)) => {
            match width {
                Width::W32 => {
                    asm.emitter.emit_byte(0x66)?;
                    asm.emitter.emit_byte(0xc1)?;
                }
                Width::W16 => asm.emitter.emit_byte(0xc1)?,
                Width::W8 => asm.emitter.emit_byte(0xc0)?,
            }
            asm.emitter.emit_modrm(3, ext, code)?;
            asm.emitter.emit_byte(count as u8)
        }
        _ => Err(invalid_operands(mnemonic)),
    }
}

/// Resolve a jump/call target: a defined label, a plain number, or (in
/// pass 1) an as-yet-undefined forward reference.
enum JumpTarget {
    Label(u32),
    Absolute(u32),
    Forward,
}

fn resolve_target(asm: &Assembler, token: &str) -> Result<JumpTarget, AsmError> {
    if let Some(address) = asm.labels.lookup(token) {
        return Ok(JumpTarget::Label(address));
    }
    if let Some(value) = asm.parse_number(token) {
        return Ok(JumpTarget::Absolute(value));
    }
    if asm.pass == Pass::One {
        return Ok(JumpTarget::Forward);
    }
    Err(AsmError::new(
        AsmErrorKind::Symbol,
        "Undefined symbol",
        Some(token),
    ))
}

fn assemble_jmp(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let text = operands.trim();

    // Far jump: seg:off with both halves numeric.
    if let Some((seg_text, off_text)) = text.split_once(':') {
        let seg = asm.parse_number(seg_text.trim());
        let off = asm.parse_number(off_text.trim());
        if let (Some(seg), Some(off)) = (seg, off) {
            asm.emitter.emit_byte(0xea)?;
            asm.emitter.emit_word(off as u16)?;
            return asm.emitter.emit_word(seg as u16);
        }
    }

    let token = one_operand("jmp", text)?;
    let here = asm.here();
    match resolve_target(asm, token)? {
        // Backward targets get distance-based sizing; forward targets
        // always take the near form so both passes agree on length.
        JumpTarget::Label(target) => {
            if target <= here {
                let disp = target as i64 - (here as i64 + 2);
                if (-128..=127).contains(&disp) {
                    asm.emitter.emit_byte(0xeb)?;
                    return asm.emitter.emit_byte(disp as u8);
                }
            }
            let disp = target as i64 - (here as i64 + 3);
            asm.emitter.emit_byte(0xe9)?;
            asm.emitter.emit_word(disp as u16)
        }
        JumpTarget::Absolute(target) => {
            let disp = target as i64 - (here as i64 + 3);
            asm.emitter.emit_byte(0xe9)?;
            asm.emitter.emit_word(disp as u16)
        }
        JumpTarget::Forward => {
            asm.emitter.emit_byte(0xe9)?;
            asm.emitter.emit_word(0)
        }
    }
}

fn assemble_jcc(
    asm: &mut Assembler,
    mnemonic: &str,
    opcode: u8,
    operands: &str,
) -> Result<(), AsmError> {
    let token = one_operand(mnemonic, operands)?;
    let here = asm.here();
    let target = match resolve_target(asm, token)? {
        JumpTarget::Label(target) | JumpTarget::Absolute(target) => target,
        JumpTarget::Forward => {
            // Placeholder with the long form's length.
            asm.emitter.emit_byte(0x0f)?;
            asm.emitter.emit_byte(opcode + 0x10)?;
            return asm.emitter.emit_dword(0);
        }
    };
    if target <= here {
        let disp = target as i64 - (here as i64 + 2);
        if (-128..=127).contains(&disp) {
            asm.emitter.emit_byte(opcode)?;
            return asm.emitter.emit_byte(disp as u8);
        }
    }
    let disp = target as i64 - (here as i64 + 6);
    asm.emitter.emit_byte(0x0f)?;
    asm.emitter.emit_byte(opcode + 0x10)?;
    asm.emitter.emit_dword(disp as u32)
}

fn assemble_call(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let token = one_operand("call", operands)?;
    let here = asm.here();
    let disp = match resolve_target(asm, token)? {
        JumpTarget::Label(target) | JumpTarget::Absolute(target) => {
            target as i64 - (here as i64 + 3)
        }
        JumpTarget::Forward => 0,
    };
    asm.emitter.emit_byte(0xe8)?;
    asm.emitter.emit_word(disp as u16)
}

fn assemble_loop(
    asm: &mut Assembler,
    mnemonic: &str,
    opcode: u8,
    operands: &str,
) -> Result<(), AsmError> {
    let token = one_operand(mnemonic, operands)?;
    let here = asm.here();
    match resolve_target(asm, token)? {
        JumpTarget::Label(target) | JumpTarget::Absolute(target) => {
            let disp = target as i64 - (here as i64 + 2);
            if !(-128..=127).contains(&disp) {
                return Err(AsmError::new(
                    AsmErrorKind::Instruction,
                    "Loop target out of range",
                    Some(token),
                ));
            }
            asm.emitter.emit_byte(opcode)?;
            asm.emitter.emit_byte(disp as u8)
        }
        JumpTarget::Forward => {
            asm.emitter.emit_byte(opcode)?;
            asm.emitter.emit_byte(0)
        }
    }
}

fn assemble_int(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let token = one_operand("int", operands)?;
    match asm.parse_operand(token)? {
        Operand::Immediate(vector) => {
            asm.emitter.emit_byte(0xcd)?;
            asm.emitter.emit_byte(vector as u8)
        }
        _ => Err(invalid_operands("int")),
    }
}

fn assemble_push(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let token = one_operand("push", operands)?;
    match asm.parse_operand(token)? {
        Operand::Register { code, width } => {
            if width == Width::W32 {
                asm.emitter.emit_byte(0x66)?;
            }
            asm.emitter.emit_byte(0x50 + code)
        }
        Operand::Immediate(imm) => {
            asm.emitter.emit_byte(0x68)?;
            asm.emitter.emit_word(imm as u16)
        }
        _ => Err(invalid_operands("push")),
    }
}

fn assemble_pop(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let token = one_operand("pop", operands)?;
    match asm.parse_operand(token)? {
        Operand::Register { code, width } => {
            if width == Width::W32 {
                asm.emitter.emit_byte(0x66)?;
            }
            asm.emitter.emit_byte(0x58 + code)
        }
        _ => Err(invalid_operands("pop")),
    }
}

fn assemble_lea(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let (dst_text, src_text) = two_operands("lea", operands)?;
    let dst = asm.parse_operand(dst_text)?;
    let src = asm.parse_operand(src_text)?;
    match (dst, src) {
        (Operand::Register { code, width }, Operand::Memory(mem)) => {
            if width == Width::W32 {
                asm.emitter.emit_byte(0x66)?;
            }
            asm.emitter.emit_byte(0x8d)?;
            asm.emitter.emit_mem_operand(code, &mem)
        }
        _ => Err(invalid_operands("lea")),
    }
}

fn assemble_xchg(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let (dst_text, src_text) = two_operands("xchg", operands)?;
    let dst = asm.parse_operand(dst_text)?;
    let src = asm.parse_operand(src_text)?;
    match (dst, src) {
        (
            Operand::Register { code: dst_reg, width: dst_w },
            Operand::Register { code: src_reg, width: src_w },
        ) => {
            // xchg with the 16-bit accumulator has a one-byte form.
            if dst_reg == 0 && dst_w == Width::W16 && src_w == Width::W16 {
                return asm.emitter.emit_byte(0x90 + src_reg);
            }
            if src_reg == 0 && src_w == Width::W16 && dst_w == Width::W16 {
                return asm.emitter.emit_byte(0x90 + dst_reg);
            }
            if dst_w == Width::W8 && src_w == Width::W8 {
                asm.emitter.emit_byte(0x86)?;
            } else {
                asm.emitter.emit_byte(0x87)?;
            }
            asm.emitter.emit_modrm(3, src_reg, dst_reg)
        }
        _ => Err(invalid_operands("xchg")),
    }
}

fn assemble_in(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let (dst_text, src_text) = two_operands("in", operands)?;
    let dst = asm.parse_operand(dst_text)?;
    let src = asm.parse_operand(src_text)?;
    // Accumulator destination only, port as immediate or dx.
    match (dst, src) {
        (Operand::Register { code: 0, width }, Operand::Immediate(port)) => {
            asm.emitter
                .emit_byte(if width == Width::W8 { 0xe4 } else { 0xe5 })?;
            asm.emitter.emit_byte(port as u8)
        }
        (Operand::Register { code: 0, width }, Operand::Register { code: 2, width: Width::W16 }) => {
            asm.emitter
                .emit_byte(if width == Width::W8 { 0xec } else { 0xed })
        }
        _ => Err(invalid_operands("in")),
    }
}

fn assemble_out(asm: &mut Assembler, operands: &str) -> Result<(), AsmError> {
    let (dst_text, src_text) = two_operands("out", operands)?;
    let dst = asm.parse_operand(dst_text)?;
    let src = asm.parse_operand(src_text)?;
    // Accumulator source only, port as immediate or dx.
    match (dst, src) {
        (Operand::Immediate(port), Operand::Register { code: 0, width }) => {
            asm.emitter
                .emit_byte(if width == Width::W8 { 0xe6 } else { 0xe7 })?;
            asm.emitter.emit_byte(port as u8)
        }
        (Operand::Register { code: 2, width: Width::W16 }, Operand::Register { code: 0, width }) => {
            asm.emitter
                .emit_byte(if width == Width::W8 { 0xee } else { 0xef })
        }
        _ => Err(invalid_operands("out")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use crate::emitter::Pass;

    fn encode(mnemonic: &str, operands: &str) -> Vec<u8> {
        let mut asm = Assembler::new();
        asm.begin_pass(Pass::Two);
        assemble_instruction(&mut asm, mnemonic, operands).unwrap();
        asm.emitter.code().to_vec()
    }

    fn encode_err(mnemonic: &str, operands: &str) -> AsmError {
        let mut asm = Assembler::new();
        asm.begin_pass(Pass::Two);
        assemble_instruction(&mut asm, mnemonic, operands).unwrap_err()
    }

    #[test]
    fn simple_opcodes() {
        assert_eq!(encode("nop", ""), vec![0x90]);
        assert_eq!(encode("ret", ""), vec![0xc3]);
        assert_eq!(encode("hlt", ""), vec![0xf4]);
        assert_eq!(encode("lodsb", ""), vec![0xac]);
        assert_eq!(encode("pushfw", ""), vec![0x9c]);
    }

    #[test]
    fn mov_register_immediate() {
        assert_eq!(encode("mov", "al, 0x41"), vec![0xb0, 0x41]);
        assert_eq!(encode("mov", "ax, 0x1234"), vec![0xb8, 0x34, 0x12]);
        assert_eq!(
            encode("mov", "eax, 0x12345678"),
            vec![0x66, 0xb8, 0x78, 0x56, 0x34, 0x12]
        );
        assert_eq!(encode("mov", "bh, 1"), vec![0xb7, 0x01]);
    }

    #[test]
    fn mov_register_register() {
        assert_eq!(encode("mov", "ax, bx"), vec![0x89, 0xd8]);
        assert_eq!(encode("mov", "al, bl"), vec![0x88, 0xd8]);
        assert_eq!(encode("mov", "eax, ebx"), vec![0x66, 0x89, 0xd8]);
    }

    #[test]
    fn mov_segment_register() {
        assert_eq!(encode("mov", "ds, ax"), vec![0x8e, 0xd8]);
        assert_eq!(encode("mov", "ax, es"), vec![0x8c, 0xc0]);
    }

    #[test]
    fn mov_register_memory() {
        assert_eq!(encode("mov", "al, [bx+si]"), vec![0x8a, 0x00]);
        assert_eq!(encode("mov", "ax, [bx]"), vec![0x8b, 0x07]);
        assert_eq!(encode("mov", "[bx], al"), vec![0x88, 0x07]);
        assert_eq!(
            encode("mov", "eax, [ebx+ecx*4+16]"),
            vec![0x66, 0x8b, 0x44, 0x8b, 0x10]
        );
    }

    #[test]
    fn mov_memory_immediate_width_priority() {
        // Explicit byte override beats the operand's own width.
        assert_eq!(encode("mov", "byte ptr [bx], 0x10"), vec![0xc6, 0x07, 0x10]);
        assert_eq!(encode("mov", "byte [bx], 0x10"), vec![0xc6, 0x07, 0x10]);
        // No override: 16-bit default.
        assert_eq!(encode("mov", "[bx], 0x10"), vec![0xc7, 0x07, 0x10, 0x00]);
        assert_eq!(
            encode("mov", "dword [bx], 1"),
            vec![0x66, 0xc7, 0x07, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn alu_accumulator_short_forms() {
        assert_eq!(encode("add", "al, 5"), vec![0x04, 0x05]);
        assert_eq!(encode("add", "ax, 5"), vec![0x05, 0x05, 0x00]);
        assert_eq!(
            encode("add", "eax, 5"),
            vec![0x66, 0x05, 0x05, 0x00, 0x00, 0x00]
        );
        assert_eq!(encode("cmp", "al, 0"), vec![0x3c, 0x00]);
        assert_eq!(encode("sub", "ax, 1"), vec![0x2d, 0x01, 0x00]);
        assert_eq!(encode("xor", "al, 1"), vec![0x34, 0x01]);
        assert_eq!(encode("test", "al, 1"), vec![0xa8, 0x01]);
    }

    #[test]
    fn alu_extension_forms() {
        assert_eq!(encode("add", "bx, 5"), vec![0x81, 0xc3, 0x05, 0x00]);
        assert_eq!(encode("sub", "cl, 2"), vec![0x80, 0xe9, 0x02]);
        assert_eq!(encode("or", "bl, 1"), vec![0x80, 0xcb, 0x01]);
        assert_eq!(encode("and", "dx, 0x0f"), vec![0x81, 0xe2, 0x0f, 0x00]);
        assert_eq!(encode("xor", "bh, 0xff"), vec![0x80, 0xf7, 0xff]);
        assert_eq!(encode("cmp", "si, 10"), vec![0x81, 0xfe, 0x0a, 0x00]);
        assert_eq!(encode("test", "bl, 4"), vec![0xf6, 0xc3, 0x04]);
    }

    #[test]
    fn alu_register_register() {
        assert_eq!(encode("xor", "ax, ax"), vec![0x31, 0xc0]);
        assert_eq!(encode("add", "al, bl"), vec![0x00, 0xd8]);
        assert_eq!(encode("sub", "eax, ebx"), vec![0x66, 0x29, 0xd8]);
        assert_eq!(encode("test", "ax, ax"), vec![0x85, 0xc0]);
    }

    #[test]
    fn alu_register_memory() {
        assert_eq!(encode("add", "ax, [bx]"), vec![0x03, 0x07]);
        assert_eq!(encode("cmp", "al, [si]"), vec![0x3a, 0x04]);
        // or/and/xor/test have no reg,mem form
        assert_eq!(
            encode_err("or", "ax, [bx]").kind(),
            AsmErrorKind::Instruction
        );
    }

    #[test]
    fn alu_memory_immediate() {
        assert_eq!(
            encode("cmp", "word [bx], 5"),
            vec![0x81, 0x3f, 0x05, 0x00]
        );
        assert_eq!(encode("add", "byte [si], 1"), vec![0x80, 0x04, 0x01]);
    }

    #[test]
    fn unary_forms() {
        assert_eq!(encode("inc", "ax"), vec![0x40]);
        assert_eq!(encode("inc", "si"), vec![0x46]);
        assert_eq!(encode("dec", "bx"), vec![0x4b]);
        assert_eq!(encode("inc", "eax"), vec![0x66, 0x40]);
        assert_eq!(encode("inc", "al"), vec![0xfe, 0xc0]);
        assert_eq!(encode("dec", "cl"), vec![0xfe, 0xc9]);
        assert_eq!(encode("mul", "bx"), vec![0xf7, 0xe3]);
        assert_eq!(encode("imul", "cl"), vec![0xf6, 0xe9]);
        assert_eq!(encode("div", "bx"), vec![0xf7, 0xf3]);
        assert_eq!(encode("idiv", "ecx"), vec![0x66, 0xf7, 0xf9]);
        assert_eq!(encode("neg", "ax"), vec![0xf7, 0xd8]);
        assert_eq!(encode("not", "bl"), vec![0xf6, 0xd3]);
    }

    #[test]
    fn shifts_take_byte_count() {
        assert_eq!(encode("shl", "ax, 4"), vec![0xc1, 0xe0, 0x04]);
        assert_eq!(encode("shr", "bl, 1"), vec![0xc0, 0xeb, 0x01]);
        assert_eq!(encode("shl", "eax, 8"), vec![0x66, 0xc1, 0xe0, 0x08]);
    }

    #[test]
    fn far_jump() {
        assert_eq!(
            encode("jmp", "0x07c0:0x0000"),
            vec![0xea, 0x00, 0x00, 0xc0, 0x07]
        );
    }

    #[test]
    fn jmp_backward_short_and_self() {
        let mut asm = Assembler::new();
        asm.begin_pass(Pass::One);
        asm.labels.define("top", 0).unwrap();
        asm.begin_pass(Pass::Two);
        assemble_instruction(&mut asm, "jmp", "top").unwrap();
        assert_eq!(asm.emitter.code(), &[0xeb, 0xfe]);
    }

    #[test]
    fn jmp_numeric_target_is_always_near() {
        assert_eq!(encode("jmp", "0x100"), vec![0xe9, 0xfd, 0x00]);
    }

    #[test]
    fn jcc_backward_short() {
        let mut asm = Assembler::new();
        asm.begin_pass(Pass::One);
        asm.labels.define("top", 0).unwrap();
        asm.begin_pass(Pass::Two);
        assemble_instruction(&mut asm, "jne", "top").unwrap();
        assert_eq!(asm.emitter.code(), &[0x75, 0xfe]);
    }

    #[test]
    fn jcc_long_form_when_out_of_short_range() {
        let mut asm = Assembler::new();
        asm.begin_pass(Pass::One);
        asm.labels.define("far_back", 0).unwrap();
        asm.begin_pass(Pass::Two);
        for _ in 0..200 {
            asm.emitter.emit_byte(0x90).unwrap();
        }
        assemble_instruction(&mut asm, "je", "far_back").unwrap();
        // disp = 0 - (200 + 6) = -206
        assert_eq!(
            &asm.emitter.code()[200..],
            &[0x0f, 0x84, 0x32, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn forward_jump_sizes_match_between_passes() {
        let mut asm = Assembler::new();
        asm.begin_pass(Pass::One);
        assemble_instruction(&mut asm, "jmp", "ahead").unwrap();
        let pass1_len = asm.emitter.pos();
        asm.labels.define("ahead", pass1_len).unwrap();
        asm.begin_pass(Pass::Two);
        assemble_instruction(&mut asm, "jmp", "ahead").unwrap();
        assert_eq!(asm.emitter.pos(), pass1_len);
        assert_eq!(asm.emitter.code(), &[0xe9, 0x00, 0x00]);
    }

    #[test]
    fn call_and_int() {
        assert_eq!(encode("call", "0x100"), vec![0xe8, 0xfd, 0x00]);
        assert_eq!(encode("int", "0x10"), vec![0xcd, 0x10]);
        assert_eq!(encode("int", "0x16"), vec![0xcd, 0x16]);
    }

    #[test]
    fn loop_backward_and_range_check() {
        let mut asm = Assembler::new();
        asm.begin_pass(Pass::One);
        asm.labels.define("top", 0).unwrap();
        asm.begin_pass(Pass::Two);
        assemble_instruction(&mut asm, "loop", "top").unwrap();
        assert_eq!(asm.emitter.code(), &[0xe2, 0xfe]);

        let mut asm = Assembler::new();
        asm.begin_pass(Pass::One);
        asm.labels.define("top", 0).unwrap();
        asm.begin_pass(Pass::Two);
        for _ in 0..200 {
            asm.emitter.emit_byte(0x90).unwrap();
        }
        let err = assemble_instruction(&mut asm, "loop", "top").unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Instruction);
    }

    #[test]
    fn push_pop() {
        assert_eq!(encode("push", "ax"), vec![0x50]);
        assert_eq!(encode("push", "ebx"), vec![0x66, 0x53]);
        assert_eq!(encode("push", "0x1234"), vec![0x68, 0x34, 0x12]);
        assert_eq!(encode("pop", "di"), vec![0x5f]);
        assert_eq!(encode("pop", "eax"), vec![0x66, 0x58]);
    }

    #[test]
    fn lea_forms() {
        assert_eq!(encode("lea", "ax, [bx+2]"), vec![0x8d, 0x47, 0x02]);
        assert_eq!(encode("lea", "eax, [ebx]"), vec![0x66, 0x8d, 0x03]);
    }

    #[test]
    fn xchg_forms() {
        assert_eq!(encode("xchg", "ax, bx"), vec![0x93]);
        assert_eq!(encode("xchg", "cx, ax"), vec![0x91]);
        assert_eq!(encode("xchg", "bx, cx"), vec![0x87, 0xcb]);
        assert_eq!(encode("xchg", "al, bl"), vec![0x86, 0xd8]);
    }

    #[test]
    fn in_out_forms() {
        assert_eq!(encode("in", "al, 0x60"), vec![0xe4, 0x60]);
        assert_eq!(encode("in", "ax, 0x40"), vec![0xe5, 0x40]);
        assert_eq!(encode("in", "al, dx"), vec![0xec]);
        assert_eq!(encode("out", "0x20, al"), vec![0xe6, 0x20]);
        assert_eq!(encode("out", "dx, al"), vec![0xee]);
        assert_eq!(encode("out", "dx, ax"), vec![0xef]);
    }

    #[test]
    fn in_out_reject_non_accumulator_registers() {
        assert_eq!(encode_err("in", "bx, 0x60").kind(), AsmErrorKind::Instruction);
        assert_eq!(encode_err("in", "cl, dx").kind(), AsmErrorKind::Instruction);
        assert_eq!(encode_err("out", "0x20, bx").kind(), AsmErrorKind::Instruction);
        assert_eq!(encode_err("out", "dx, cl").kind(), AsmErrorKind::Instruction);
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        let err = encode_err("foobar", "");
        assert_eq!(err.kind(), AsmErrorKind::Instruction);
    }

    #[test]
    fn wrong_operand_shapes_are_errors() {
        assert_eq!(encode_err("mov", "ax").kind(), AsmErrorKind::Instruction);
        assert_eq!(encode_err("pop", "5").kind(), AsmErrorKind::Instruction);
        assert_eq!(
            encode_err("lea", "ax, bx").kind(),
            AsmErrorKind::Instruction
        );
        assert_eq!(encode_err("int", "ax").kind(), AsmErrorKind::Instruction);
    }
}
