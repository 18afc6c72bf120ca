// Pass-gated code emission: byte sink plus ModR/M, SIB and memory-operand
// encoding for the 16-bit and 32-bit addressing conventions.

use crate::error::{AsmError, AsmErrorKind};
use crate::operands::{MemOperand, Width};

/// Flat output image capacity (one 16-bit address space).
pub const MAX_CODE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    One,
    Two,
}

/// Append-only byte sink with pass-gated write semantics.
///
/// Pass 1 only advances the position so final addresses can be computed;
/// pass 2 stores real bytes. Exceeding the image capacity is fatal.
#[derive(Debug)]
pub struct CodeEmitter {
    code: Vec<u8>,
    pos: u32,
    pass: Pass,
}

impl CodeEmitter {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            pos: 0,
            pass: Pass::One,
        }
    }

    pub fn begin_pass(&mut self, pass: Pass) {
        self.pass = pass;
        self.pos = 0;
        if pass == Pass::Two {
            self.code.clear();
        }
    }

    pub fn pos(&self) -> u32 {
        self.pos
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn emit_byte(&mut self, byte: u8) -> Result<(), AsmError> {
        if self.pos as usize >= MAX_CODE {
            return Err(AsmError::new(
                AsmErrorKind::Emit,
                "Code size exceeded (64 KiB image limit)",
                None,
            ));
        }
        if self.pass == Pass::Two {
            self.code.push(byte);
        }
        self.pos += 1;
        Ok(())
    }

    pub fn emit_word(&mut self, word: u16) -> Result<(), AsmError> {
        self.emit_byte((word & 0xff) as u8)?;
        self.emit_byte((word >> 8) as u8)
    }

    pub fn emit_dword(&mut self, dword: u32) -> Result<(), AsmError> {
        self.emit_byte((dword & 0xff) as u8)?;
        self.emit_byte(((dword >> 8) & 0xff) as u8)?;
        self.emit_byte(((dword >> 16) & 0xff) as u8)?;
        self.emit_byte(((dword >> 24) & 0xff) as u8)
    }

    pub fn emit_modrm(&mut self, mode: u8, reg: u8, rm: u8) -> Result<(), AsmError> {
        self.emit_byte((mode << 6) | ((reg & 7) << 3) | (rm & 7))
    }

    pub fn emit_sib(&mut self, scale: u8, index: u8, base: u8) -> Result<(), AsmError> {
        let scale_bits = match scale {
            2 => 1,
            4 => 2,
            8 => 3,
            _ => 0,
        };
        self.emit_byte((scale_bits << 6) | ((index & 7) << 3) | (base & 7))
    }

    /// Encode a memory operand as ModR/M [+SIB] [+displacement], with `reg`
    /// occupying the ModR/M reg field (a register code or an opcode
    /// extension value).
    pub fn emit_mem_operand(&mut self, reg: u8, mem: &MemOperand) -> Result<(), AsmError> {
        if mem.width != Some(Width::W32) {
            return self.emit_mem_operand_16(reg, mem);
        }

        // 32-bit addressing: rm is the base register code directly.
        let base = match mem.base {
            Some(base) => base,
            None => {
                return Err(AsmError::new(
                    AsmErrorKind::Operand,
                    "32-bit memory operand requires a base register",
                    None,
                ))
            }
        };

        // ebp as a bare base always carries a displacement (mod=0, rm=5
        // is reserved for direct addressing).
        let mode = if mem.disp == 0 && base != 5 {
            0
        } else if (-128..=127).contains(&mem.disp) {
            1
        } else {
            2
        };

        // esp as rm always signals a SIB byte.
        let need_sib = mem.index.is_some() || base == 4;
        if need_sib {
            self.emit_modrm(mode, reg, 4)?;
            self.emit_sib(mem.scale, mem.index.unwrap_or(4), base)?;
        } else {
            self.emit_modrm(mode, reg, base)?;
        }

        if mode == 1 {
            self.emit_byte(mem.disp as u8)?;
        } else if mode == 2 {
            self.emit_dword(mem.disp as u32)?;
        }
        Ok(())
    }

    fn emit_mem_operand_16(&mut self, reg: u8, mem: &MemOperand) -> Result<(), AsmError> {
        // Legacy base+index rm table; anything unlisted falls back to
        // rm=6, i.e. [bp+disp] semantics.
        let rm = match (mem.base, mem.index) {
            (Some(3), Some(6)) => 0, // bx+si
            (Some(3), Some(7)) => 1, // bx+di
            (Some(5), Some(6)) => 2, // bp+si
            (Some(5), Some(7)) => 3, // bp+di
            (Some(6), None) => 4,    // si
            (Some(7), None) => 5,    // di
            (Some(5), None) => 6,    // bp
            (Some(3), None) => 7,    // bx
            _ => 6,
        };

        // bp alone always needs a displacement byte: mod=0, rm=6 is the
        // direct-address encoding.
        let mode = if mem.disp == 0 && rm != 6 {
            0
        } else if (-128..=127).contains(&mem.disp) {
            1
        } else {
            2
        };

        self.emit_modrm(mode, reg, rm)?;
        if mode == 1 {
            self.emit_byte(mem.disp as u8)?;
        } else if mode == 2 {
            self.emit_word(mem.disp as u16)?;
        }
        Ok(())
    }
}

impl Default for CodeEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{CodeEmitter, Pass, MAX_CODE};
    use crate::error::AsmErrorKind;
    use crate::operands::{MemOperand, Width};

    fn emitter() -> CodeEmitter {
        let mut emitter = CodeEmitter::new();
        emitter.begin_pass(Pass::Two);
        emitter
    }

    fn mem16(base: Option<u8>, index: Option<u8>, disp: i32) -> MemOperand {
        MemOperand {
            base,
            index,
            scale: 1,
            disp,
            width: Some(Width::W16),
        }
    }

    fn mem32(base: Option<u8>, index: Option<u8>, scale: u8, disp: i32) -> MemOperand {
        MemOperand {
            base,
            index,
            scale,
            disp,
            width: Some(Width::W32),
        }
    }

    #[test]
    fn pass_one_advances_position_without_storing() {
        let mut emitter = CodeEmitter::new();
        emitter.begin_pass(Pass::One);
        emitter.emit_byte(0x90).unwrap();
        emitter.emit_word(0x1234).unwrap();
        assert_eq!(emitter.pos(), 3);
        assert!(emitter.code().is_empty());
    }

    #[test]
    fn pass_two_stores_bytes() {
        let mut emitter = emitter();
        emitter.emit_byte(0x90).unwrap();
        assert_eq!(emitter.code(), &[0x90]);
        assert_eq!(emitter.pos(), 1);
    }

    #[test]
    fn words_and_dwords_are_little_endian() {
        let mut emitter = emitter();
        emitter.emit_word(0x1234).unwrap();
        emitter.emit_dword(0x12345678).unwrap();
        assert_eq!(emitter.code(), &[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn modrm_packs_mode_reg_rm() {
        let mut emitter = emitter();
        emitter.emit_modrm(3, 1, 2).unwrap();
        assert_eq!(emitter.code(), &[0xca]);
    }

    #[test]
    fn sib_maps_scale_factors_to_two_bits() {
        let mut emitter = emitter();
        emitter.emit_sib(1, 1, 3).unwrap();
        emitter.emit_sib(2, 1, 3).unwrap();
        emitter.emit_sib(4, 1, 3).unwrap();
        emitter.emit_sib(8, 1, 3).unwrap();
        assert_eq!(emitter.code(), &[0x0b, 0x4b, 0x8b, 0xcb]);
    }

    #[test]
    fn capacity_overflow_is_fatal() {
        let mut emitter = CodeEmitter::new();
        emitter.begin_pass(Pass::One);
        for _ in 0..MAX_CODE {
            emitter.emit_byte(0).unwrap();
        }
        let err = emitter.emit_byte(0).unwrap_err();
        assert_eq!(err.kind(), AsmErrorKind::Emit);
    }

    #[test]
    fn mem16_base_index_pairs_use_legacy_rm_codes() {
        let mut emitter = emitter();
        // [bx+si]
        emitter.emit_mem_operand(0, &mem16(Some(3), Some(6), 0)).unwrap();
        // [bp+di]
        emitter.emit_mem_operand(0, &mem16(Some(5), Some(7), 0)).unwrap();
        // [bx]
        emitter.emit_mem_operand(0, &mem16(Some(3), None, 0)).unwrap();
        assert_eq!(emitter.code(), &[0x00, 0x03, 0x07]);
    }

    #[test]
    fn mem16_bp_alone_forces_displacement_byte() {
        let mut emitter = emitter();
        emitter.emit_mem_operand(0, &mem16(Some(5), None, 0)).unwrap();
        assert_eq!(emitter.code(), &[0x46, 0x00]);
    }

    #[test]
    fn mem16_wide_displacement_uses_mod2_word() {
        let mut emitter = emitter();
        emitter.emit_mem_operand(0, &mem16(Some(3), None, 0x200)).unwrap();
        assert_eq!(emitter.code(), &[0x87, 0x00, 0x02]);
    }

    #[test]
    fn mem32_plain_base_has_no_sib() {
        let mut emitter = emitter();
        // [ebx]
        emitter.emit_mem_operand(0, &mem32(Some(3), None, 1, 0)).unwrap();
        assert_eq!(emitter.code(), &[0x03]);
    }

    #[test]
    fn mem32_esp_base_always_takes_sib() {
        let mut emitter = emitter();
        emitter.emit_mem_operand(0, &mem32(Some(4), None, 1, 0)).unwrap();
        assert_eq!(emitter.code(), &[0x04, 0x24]);
    }

    #[test]
    fn mem32_ebp_base_forces_displacement() {
        let mut emitter = emitter();
        emitter.emit_mem_operand(0, &mem32(Some(5), None, 1, 0)).unwrap();
        assert_eq!(emitter.code(), &[0x45, 0x00]);
    }

    #[test]
    fn mem32_scaled_index_encodes_sib_and_disp() {
        let mut emitter = emitter();
        // [ebx+ecx*4+16]
        emitter
            .emit_mem_operand(0, &mem32(Some(3), Some(1), 4, 16))
            .unwrap();
        assert_eq!(emitter.code(), &[0x44, 0x8b, 0x10]);
    }

    #[test]
    fn mem32_large_displacement_is_a_dword() {
        let mut emitter = emitter();
        emitter
            .emit_mem_operand(2, &mem32(Some(0), None, 1, 0x1000))
            .unwrap();
        assert_eq!(emitter.code(), &[0x90, 0x00, 0x10, 0x00, 0x00]);
    }
}
