use bitflags::bitflags;

bitflags! {
    /// Flag bits as serialised by PUSH PSW / POP PSW.
    ///
    /// This layout is load-bearing: programs that push the PSW, massage the
    /// byte on the stack and pop it back get exactly these bit positions.
    #[derive(Clone, Copy)]
    struct Psw: u8 {
        const ZERO      = 1 << 0;
        const SIGN      = 1 << 1;
        const PARITY    = 1 << 2;
        const CARRY     = 1 << 3;
        const AUX_CARRY = 1 << 4;
    }
}

/// CPU condition codes.
///
/// Parity uses the even convention: the flag is set when the low byte of
/// the result has an even number of one bits.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConditionCodes {
    pub z: bool,
    pub s: bool,
    pub p: bool,
    pub cy: bool,
    /// Auxiliary carry. Never updated; nothing Space Invaders or the
    /// diagnostic ROM runs depends on it.
    pub ac: bool,
}

impl ConditionCodes {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Update zero, sign and parity from the low byte of an ALU result.
    pub fn update_byte_zsp(&mut self, value: u16) {
        self.z = (value & 0xff) == 0;
        self.s = (value & 0x80) == 0x80;
        self.p = parity(value & 0xff);
    }

    /// Byte-sized carry: the 16-bit intermediate overflowed (or, for
    /// subtraction done in wrapping 16-bit arithmetic, borrowed).
    pub fn update_byte_cy(&mut self, value: u16) {
        self.cy = value > 0xff;
    }

    /// Word-sized carry for the 16-bit add family.
    pub fn update_word_cy(&mut self, value: u32) {
        self.cy = value > 0xffff;
    }

    /// Pack the flags into the PSW byte.
    pub fn pack(&self) -> u8 {
        let mut psw = Psw::empty();
        psw.set(Psw::ZERO, self.z);
        psw.set(Psw::SIGN, self.s);
        psw.set(Psw::PARITY, self.p);
        psw.set(Psw::CARRY, self.cy);
        psw.set(Psw::AUX_CARRY, self.ac);
        psw.bits()
    }

    /// Restore the flags from a PSW byte.
    pub fn unpack(&mut self, byte: u8) {
        let psw = Psw::from_bits_truncate(byte);
        self.z = psw.contains(Psw::ZERO);
        self.s = psw.contains(Psw::SIGN);
        self.p = psw.contains(Psw::PARITY);
        self.cy = psw.contains(Psw::CARRY);
        self.ac = psw.contains(Psw::AUX_CARRY);
    }
}

fn parity(value: u16) -> bool {
    (value & 0xff).count_ones() % 2 == 0
}

/// The 8080 register file.
///
/// Constructed zeroed; mutated exclusively by the CPU engine. Hosts get a
/// read-only view through [`crate::Cpu::state`].
#[derive(Clone, Copy, Debug, Default)]
pub struct State {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
    pub cc: ConditionCodes,
    pub interrupts_enabled: bool,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn bc(&self) -> u16 {
        make_word(self.b, self.c)
    }

    pub fn set_bc(&mut self, value: u16) {
        self.b = (value >> 8) as u8;
        self.c = value as u8;
    }

    pub fn de(&self) -> u16 {
        make_word(self.d, self.e)
    }

    pub fn set_de(&mut self, value: u16) {
        self.d = (value >> 8) as u8;
        self.e = value as u8;
    }

    pub fn hl(&self) -> u16 {
        make_word(self.h, self.l)
    }

    pub fn set_hl(&mut self, value: u16) {
        self.h = (value >> 8) as u8;
        self.l = value as u8;
    }
}

/// Make a 16-bit word from two bytes.
pub fn make_word(hi: u8, lo: u8) -> u16 {
    (u16::from(hi) << 8) | u16::from(lo)
}
