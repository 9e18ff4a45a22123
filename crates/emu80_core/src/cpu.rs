use std::collections::BTreeSet;

use crate::breakpoint::{Breakpoint, BreakpointKind};
use crate::disasm;
use crate::memory::Memory;
use crate::state::{make_word, State};

/// Invoked for the IN opcode: returns the byte read from a port.
pub type CallbackIn = Box<dyn FnMut(u8) -> u8>;
/// Invoked for the OUT opcode with the port number and accumulator value.
pub type CallbackOut = Box<dyn FnMut(u8, u8)>;
/// Invoked when a breakpoint fires. Memory-write breakpoints fire before
/// the write lands, so the prior value is still readable through the
/// supplied memory reference; the third argument is the value being
/// written (zero for opcode breakpoints).
pub type CallbackBreakpoint = Box<dyn FnMut(&Memory, Breakpoint, u8)>;

/// Vector of the BDOS console-print system call emulated for the
/// diagnostic ROM.
const CONSOLE_PRINT_VECTOR: u16 = 0x0005;

#[derive(Default)]
struct Callbacks {
    input: Option<CallbackIn>,
    output: Option<CallbackOut>,
    breakpoint: Option<CallbackBreakpoint>,
}

#[derive(Default)]
struct Breakpoints {
    memory_write: BTreeSet<u16>,
    opcode: BTreeSet<u16>,
}

/// Intel 8080 instruction-execution engine.
///
/// The host binds a configured [`Memory`] with [`Cpu::init`], then calls
/// [`Cpu::step`] in a loop and [`Cpu::interrupt`] from its own timing
/// loop. Port IO and breakpoints are delegated to optional callbacks; the
/// engine itself has no idea what a port means.
pub struct Cpu {
    state: State,
    memory: Memory,
    num_steps: u64,
    console_trap: bool,
    halted: bool,
    console: String,
    callbacks: Callbacks,
    breakpoints: Breakpoints,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            state: State::new(),
            memory: Memory::new(),
            num_steps: 0,
            console_trap: false,
            halted: false,
            console: String::new(),
            callbacks: Callbacks::default(),
            breakpoints: Breakpoints::default(),
        }
    }

    /// Bind the engine to a configured memory map and set the entry point.
    pub fn init(&mut self, memory: Memory, pc_start: u16) {
        self.memory = memory;
        self.state.reset();
        self.state.pc = pc_start;
        self.num_steps = 0;
        self.halted = false;
        self.console.clear();
    }

    /// Restore the power-on register state. Memory contents are preserved.
    pub fn reset(&mut self) {
        self.state.reset();
        self.num_steps = 0;
        self.halted = false;
        self.console.clear();
    }

    /// Emulate the diagnostic ROM's console system calls: CALL $0005
    /// prints via register C, CALL $0000 halts the engine. Off by default;
    /// production cartridges must run without it.
    pub fn set_console_trap(&mut self, enabled: bool) {
        self.console_trap = enabled;
    }

    pub fn set_callback_in(&mut self, callback: CallbackIn) {
        self.callbacks.input = Some(callback);
    }

    pub fn set_callback_out(&mut self, callback: CallbackOut) {
        self.callbacks.output = Some(callback);
    }

    pub fn set_callback_breakpoint(&mut self, callback: CallbackBreakpoint) {
        self.callbacks.breakpoint = Some(callback);
    }

    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) {
        match breakpoint.kind {
            BreakpointKind::MemoryWrite => self.breakpoints.memory_write.insert(breakpoint.address),
            BreakpointKind::Opcode => self.breakpoints.opcode.insert(breakpoint.address),
        };
    }

    /// Read-only snapshot of registers and flags.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Number of instructions executed so far.
    pub fn num_steps(&self) -> u64 {
        self.num_steps
    }

    /// True once the console trap has seen a CALL to address zero.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Text accumulated by the console trap.
    pub fn console(&self) -> &str {
        &self.console
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Pass-through memory read for host display.
    pub fn read_memory(&self, address: u16) -> u8 {
        self.memory.read(address)
    }

    /// Execute exactly one instruction.
    pub fn step(&mut self) {
        if self.halted {
            return;
        }
        self.num_steps += 1;

        let pc = self.state.pc;
        let opcode = self.read_memory(pc);

        // Most instructions advance the program counter by their encoded
        // length below the match. Taken jumps, calls and returns assign
        // the counter themselves and leave the length at zero.
        let mut opcode_size: u16 = 1;

        match opcode {
            0x00 => {} // NOP

            // LXI rp, D16
            0x01 => {
                let value = self.read_opcode_word(pc);
                self.state.set_bc(value);
                opcode_size = 3;
            }
            0x11 => {
                let value = self.read_opcode_word(pc);
                self.state.set_de(value);
                opcode_size = 3;
            }
            0x21 => {
                let value = self.read_opcode_word(pc);
                self.state.set_hl(value);
                opcode_size = 3;
            }
            0x31 => {
                self.state.sp = self.read_opcode_word(pc);
                opcode_size = 3;
            }

            // STAX / LDAX
            0x02 => {
                let address = self.state.bc();
                self.write_memory(address, self.state.a);
            }
            0x12 => {
                let address = self.state.de();
                self.write_memory(address, self.state.a);
            }
            0x0a => {
                self.state.a = self.read_memory(self.state.bc());
            }
            0x1a => {
                self.state.a = self.read_memory(self.state.de());
            }

            // STA / LDA
            0x32 => {
                let address = self.read_opcode_word(pc);
                self.write_memory(address, self.state.a);
                opcode_size = 3;
            }
            0x3a => {
                let address = self.read_opcode_word(pc);
                self.state.a = self.read_memory(address);
                opcode_size = 3;
            }

            // SHLD / LHLD
            0x22 => {
                let address = self.read_opcode_word(pc);
                self.write_memory(address, self.state.l);
                self.write_memory(address.wrapping_add(1), self.state.h);
                opcode_size = 3;
            }
            0x2a => {
                let address = self.read_opcode_word(pc);
                self.state.l = self.read_memory(address);
                self.state.h = self.read_memory(address.wrapping_add(1));
                opcode_size = 3;
            }

            // INX rp
            0x03 => {
                let value = self.state.bc().wrapping_add(1);
                self.state.set_bc(value);
            }
            0x13 => {
                let value = self.state.de().wrapping_add(1);
                self.state.set_de(value);
            }
            0x23 => {
                let value = self.state.hl().wrapping_add(1);
                self.state.set_hl(value);
            }
            0x33 => {
                self.state.sp = self.state.sp.wrapping_add(1);
            }

            // DCX rp
            0x0b => {
                let value = self.state.bc().wrapping_sub(1);
                self.state.set_bc(value);
            }
            0x1b => {
                let value = self.state.de().wrapping_sub(1);
                self.state.set_de(value);
            }
            0x2b => {
                let value = self.state.hl().wrapping_sub(1);
                self.state.set_hl(value);
            }
            0x3b => {
                self.state.sp = self.state.sp.wrapping_sub(1);
            }

            // DAD rp
            0x09 => {
                let value = self.state.bc();
                self.dad(value);
            }
            0x19 => {
                let value = self.state.de();
                self.dad(value);
            }
            0x29 => {
                let value = self.state.hl();
                self.dad(value);
            }
            0x39 => {
                let value = self.state.sp;
                self.dad(value);
            }

            // INR r/M
            0x04 | 0x0c | 0x14 | 0x1c | 0x24 | 0x2c | 0x34 | 0x3c => {
                let dst = (opcode >> 3) & 0x07;
                if dst == 6 {
                    let address = self.state.hl();
                    let value = self.read_memory(address);
                    let result = self.inr(value);
                    self.write_memory(address, result);
                } else {
                    let value = *self.reg_by_index(dst);
                    let result = self.inr(value);
                    *self.reg_by_index(dst) = result;
                }
            }

            // DCR r/M
            0x05 | 0x0d | 0x15 | 0x1d | 0x25 | 0x2d | 0x35 | 0x3d => {
                let dst = (opcode >> 3) & 0x07;
                if dst == 6 {
                    let address = self.state.hl();
                    let value = self.read_memory(address);
                    let result = self.dcr(value);
                    self.write_memory(address, result);
                } else {
                    let value = *self.reg_by_index(dst);
                    let result = self.dcr(value);
                    *self.reg_by_index(dst) = result;
                }
            }

            // MVI r/M, D8
            0x06 | 0x0e | 0x16 | 0x1e | 0x26 | 0x2e | 0x36 | 0x3e => {
                let value = self.read_memory(pc.wrapping_add(1));
                let dst = (opcode >> 3) & 0x07;
                if dst == 6 {
                    let address = self.state.hl();
                    self.write_memory(address, value);
                } else {
                    *self.reg_by_index(dst) = value;
                }
                opcode_size = 2;
            }

            // Rotates
            0x07 => {
                // RLC
                let bit7 = (self.state.a & 0x80) != 0;
                self.state.a = (self.state.a << 1) | u8::from(bit7);
                self.state.cc.cy = bit7;
            }
            0x0f => {
                // RRC
                let bit0 = (self.state.a & 0x01) != 0;
                self.state.a = (self.state.a >> 1) | (u8::from(bit0) << 7);
                self.state.cc.cy = bit0;
            }
            0x17 => {
                // RAL
                let bit7 = (self.state.a & 0x80) != 0;
                self.state.a = (self.state.a << 1) | u8::from(self.state.cc.cy);
                self.state.cc.cy = bit7;
            }
            0x1f => {
                // RAR
                let bit0 = (self.state.a & 0x01) != 0;
                self.state.a = (self.state.a >> 1) | (u8::from(self.state.cc.cy) << 7);
                self.state.cc.cy = bit0;
            }

            0x27 => {
                // DAA. Approximate: the low-nibble adjust cannot consult the
                // auxiliary carry because this core never computes it.
                if (self.state.a & 0x0f) > 9 {
                    self.state.a = self.state.a.wrapping_add(6);
                }
                if self.state.cc.cy || (self.state.a & 0xf0) > 0x90 {
                    self.state.a = self.state.a.wrapping_add(0x60);
                    self.state.cc.cy = true;
                    let value = u16::from(self.state.a);
                    self.state.cc.update_byte_zsp(value);
                }
            }

            0x2f => {
                // CMA
                self.state.a = !self.state.a;
            }
            0x37 => {
                // STC
                self.state.cc.cy = true;
            }
            0x3f => {
                // CMC
                self.state.cc.cy = !self.state.cc.cy;
            }

            // MOV r1, r2 (0x76 in the middle of the block encodes HLT)
            0x40..=0x7f if opcode != 0x76 => {
                let dst = (opcode >> 3) & 0x07;
                let src = opcode & 0x07;

                let value = if src == 6 {
                    self.read_memory(self.state.hl())
                } else {
                    *self.reg_by_index(src)
                };

                if dst == 6 {
                    let address = self.state.hl();
                    self.write_memory(address, value);
                } else {
                    *self.reg_by_index(dst) = value;
                }
            }

            // Register-operand ALU block
            0x80..=0xbf => {
                let src = opcode & 0x07;
                let value = if src == 6 {
                    self.read_memory(self.state.hl())
                } else {
                    *self.reg_by_index(src)
                };
                self.alu((opcode >> 3) & 0x07, value);
            }

            // Immediate-operand ALU instructions
            0xc6 | 0xce | 0xd6 | 0xde | 0xe6 | 0xee | 0xf6 | 0xfe => {
                let value = self.read_memory(pc.wrapping_add(1));
                self.alu((opcode >> 3) & 0x07, value);
                opcode_size = 2;
            }

            // POP rp / POP PSW
            0xc1 => {
                let value = self.pop_word();
                self.state.set_bc(value);
            }
            0xd1 => {
                let value = self.pop_word();
                self.state.set_de(value);
            }
            0xe1 => {
                let value = self.pop_word();
                self.state.set_hl(value);
            }
            0xf1 => {
                let value = self.pop_word();
                self.state.a = (value >> 8) as u8;
                self.state.cc.unpack(value as u8);
            }

            // PUSH rp / PUSH PSW
            0xc5 => {
                let value = self.state.bc();
                self.push_word(value);
            }
            0xd5 => {
                let value = self.state.de();
                self.push_word(value);
            }
            0xe5 => {
                let value = self.state.hl();
                self.push_word(value);
            }
            0xf5 => {
                let value = make_word(self.state.a, self.state.cc.pack());
                self.push_word(value);
            }

            // JMP adr
            0xc3 => {
                self.state.pc = self.read_opcode_word(pc);
                opcode_size = 0;
            }

            // Conditional jumps: not taken still consumes all three bytes.
            0xc2 | 0xca | 0xd2 | 0xda | 0xe2 | 0xea | 0xf2 | 0xfa => {
                if self.condition((opcode >> 3) & 0x07) {
                    self.state.pc = self.read_opcode_word(pc);
                    opcode_size = 0;
                } else {
                    opcode_size = 3;
                }
            }

            // CALL adr
            0xcd => {
                let address = self.read_opcode_word(pc);
                if self.console_trap && address == CONSOLE_PRINT_VECTOR {
                    // Print, then behave as if the callee returned at once.
                    self.console_print();
                    opcode_size = 3;
                } else if self.console_trap && address == 0x0000 {
                    self.halted = true;
                    opcode_size = 0;
                } else {
                    self.call(address, pc.wrapping_add(3));
                    opcode_size = 0;
                }
            }

            // Conditional calls
            0xc4 | 0xcc | 0xd4 | 0xdc | 0xe4 | 0xec | 0xf4 | 0xfc => {
                if self.condition((opcode >> 3) & 0x07) {
                    let address = self.read_opcode_word(pc);
                    self.call(address, pc.wrapping_add(3));
                    opcode_size = 0;
                } else {
                    opcode_size = 3;
                }
            }

            // RET
            0xc9 => {
                self.ret();
                opcode_size = 0;
            }

            // Conditional returns: not taken falls through to the
            // one-byte advance.
            0xc0 | 0xc8 | 0xd0 | 0xd8 | 0xe0 | 0xe8 | 0xf0 | 0xf8 => {
                if self.condition((opcode >> 3) & 0x07) {
                    self.ret();
                    opcode_size = 0;
                }
            }

            // PCHL
            0xe9 => {
                self.state.pc = self.state.hl();
                opcode_size = 0;
            }

            // XTHL
            0xe3 => {
                let l = self.state.l;
                let h = self.state.h;
                self.state.l = self.read_memory(self.state.sp);
                self.state.h = self.read_memory(self.state.sp.wrapping_add(1));
                let sp = self.state.sp;
                self.write_memory(sp, l);
                self.write_memory(sp.wrapping_add(1), h);
            }

            // XCHG
            0xeb => {
                std::mem::swap(&mut self.state.h, &mut self.state.d);
                std::mem::swap(&mut self.state.l, &mut self.state.e);
            }

            // SPHL
            0xf9 => {
                self.state.sp = self.state.hl();
            }

            // OUT port
            0xd3 => {
                let port = self.read_memory(pc.wrapping_add(1));
                if let Some(output) = self.callbacks.output.as_mut() {
                    output(port, self.state.a);
                }
                opcode_size = 2;
            }

            // IN port
            0xdb => {
                let port = self.read_memory(pc.wrapping_add(1));
                self.state.a = match self.callbacks.input.as_mut() {
                    Some(input) => input(port),
                    None => 0,
                };
                opcode_size = 2;
            }

            // EI
            0xfb => {
                self.state.interrupts_enabled = true;
            }

            // Everything else is decodable but deliberately not executable:
            // the target ROMs never reach these at runtime.
            _ => {
                opcode_size = self.unimplemented_opcode(pc);
            }
        }

        self.state.pc = self.state.pc.wrapping_add(opcode_size);

        if self.breakpoints.opcode.contains(&self.state.pc) {
            let breakpoint = Breakpoint::new(BreakpointKind::Opcode, self.state.pc);
            self.fire_breakpoint(breakpoint, 0);
        }
    }

    /// Trigger a maskable interrupt: push the current program counter and
    /// jump to vector `8 * interrupt_num`. A no-op while interrupts are
    /// disabled.
    pub fn interrupt(&mut self, interrupt_num: u8) {
        if !self.state.interrupts_enabled {
            return;
        }

        let pc = self.state.pc;
        self.push_word(pc);
        self.state.pc = u16::from(interrupt_num) * 8;
    }

    fn read_opcode_word(&self, pc: u16) -> u16 {
        // Word operands are little-endian in the instruction stream.
        make_word(
            self.read_memory(pc.wrapping_add(2)),
            self.read_memory(pc.wrapping_add(1)),
        )
    }

    fn write_memory(&mut self, address: u16, value: u8) {
        let address = self.memory.translate(address);

        if self.breakpoints.memory_write.contains(&address) {
            let breakpoint = Breakpoint::new(BreakpointKind::MemoryWrite, address);
            self.fire_breakpoint(breakpoint, value);
        }

        self.memory.write(address, value);
    }

    fn fire_breakpoint(&mut self, breakpoint: Breakpoint, value: u8) {
        if let Some(callback) = self.callbacks.breakpoint.as_mut() {
            callback(&self.memory, breakpoint, value);
        }
    }

    fn reg_by_index(&mut self, index: u8) -> &mut u8 {
        match index {
            0 => &mut self.state.b,
            1 => &mut self.state.c,
            2 => &mut self.state.d,
            3 => &mut self.state.e,
            4 => &mut self.state.h,
            5 => &mut self.state.l,
            7 => &mut self.state.a,
            _ => unreachable!("invalid register index {}", index),
        }
    }

    /// Predicate for the conditional jump/call/return families, decoded
    /// from bits 3-5 of the opcode.
    fn condition(&self, code: u8) -> bool {
        let cc = &self.state.cc;
        match code {
            0 => !cc.z,  // NZ
            1 => cc.z,   // Z
            2 => !cc.cy, // NC
            3 => cc.cy,  // C
            4 => !cc.p,  // PO
            5 => cc.p,   // PE
            6 => !cc.s,  // P
            _ => cc.s,   // M
        }
    }

    fn alu(&mut self, operation: u8, value: u8) {
        match operation {
            0 => self.add(value),
            1 => self.adc(value),
            2 => self.sub(value),
            3 => self.sbb(value),
            4 => self.ana(value),
            5 => self.xra(value),
            6 => self.ora(value),
            _ => self.cmp(value),
        }
    }

    fn add(&mut self, value: u8) {
        let answer = u16::from(self.state.a) + u16::from(value);
        self.state.cc.update_byte_zsp(answer);
        self.state.cc.update_byte_cy(answer);
        self.state.a = (answer & 0xff) as u8;
    }

    fn adc(&mut self, value: u8) {
        let answer = u16::from(self.state.a) + u16::from(value) + u16::from(self.state.cc.cy);
        self.state.cc.update_byte_zsp(answer);
        self.state.cc.update_byte_cy(answer);
        self.state.a = (answer & 0xff) as u8;
    }

    fn sub(&mut self, value: u8) {
        let answer = u16::from(self.state.a).wrapping_sub(u16::from(value));
        self.state.cc.update_byte_zsp(answer);
        self.state.cc.update_byte_cy(answer);
        self.state.a = (answer & 0xff) as u8;
    }

    fn sbb(&mut self, value: u8) {
        let answer = u16::from(self.state.a)
            .wrapping_sub(u16::from(value))
            .wrapping_sub(u16::from(self.state.cc.cy));
        self.state.cc.update_byte_zsp(answer);
        self.state.cc.update_byte_cy(answer);
        self.state.a = (answer & 0xff) as u8;
    }

    fn ana(&mut self, value: u8) {
        self.state.a &= value;
        let answer = u16::from(self.state.a);
        self.state.cc.update_byte_zsp(answer);
        self.state.cc.update_byte_cy(answer);
    }

    fn xra(&mut self, value: u8) {
        self.state.a ^= value;
        let answer = u16::from(self.state.a);
        self.state.cc.update_byte_zsp(answer);
        self.state.cc.update_byte_cy(answer);
    }

    fn ora(&mut self, value: u8) {
        self.state.a |= value;
        let answer = u16::from(self.state.a);
        self.state.cc.update_byte_zsp(answer);
        self.state.cc.update_byte_cy(answer);
    }

    fn cmp(&mut self, value: u8) {
        let answer = u16::from(self.state.a).wrapping_sub(u16::from(value));
        self.state.cc.update_byte_zsp(answer);
        self.state.cc.update_byte_cy(answer);
    }

    /// INR and DCR update zero/sign/parity but leave the carry alone.
    fn inr(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.state.cc.update_byte_zsp(u16::from(result));
        result
    }

    fn dcr(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.state.cc.update_byte_zsp(u16::from(result));
        result
    }

    fn dad(&mut self, value: u16) {
        let answer = u32::from(self.state.hl()) + u32::from(value);
        self.state.cc.update_word_cy(answer);
        self.state.set_hl((answer & 0xffff) as u16);
    }

    /// Push a word: high byte at SP-1, low byte at SP-2.
    fn push_word(&mut self, value: u16) {
        let sp = self.state.sp;
        self.write_memory(sp.wrapping_sub(1), (value >> 8) as u8);
        self.write_memory(sp.wrapping_sub(2), value as u8);
        self.state.sp = sp.wrapping_sub(2);
    }

    fn pop_word(&mut self) -> u16 {
        let lo = self.read_memory(self.state.sp);
        let hi = self.read_memory(self.state.sp.wrapping_add(1));
        self.state.sp = self.state.sp.wrapping_add(2);
        make_word(hi, lo)
    }

    fn call(&mut self, address: u16, return_address: u16) {
        self.push_word(return_address);
        self.state.pc = address;
    }

    fn ret(&mut self) {
        self.state.pc = self.pop_word();
    }

    /// Determine the instruction length through the disassembler, report
    /// the skip, and carry on. Non-fatal: the target binaries are known
    /// never to execute these opcodes.
    fn unimplemented_opcode(&self, pc: u16) -> u16 {
        let (text, length) = disasm::disassemble(&self.memory, pc);
        log::warn!(
            "unimplemented instruction at {:#06x}: {:#04x} {}",
            pc,
            self.read_memory(pc),
            text
        );
        length
    }

    fn console_print(&mut self) {
        match self.state.c {
            9 => {
                // '$'-terminated message; the first three bytes are the
                // routine's own prefix and get skipped.
                let mut address = self.state.de().wrapping_add(3);
                let mut line = String::new();
                loop {
                    let byte = self.read_memory(address);
                    if byte == b'$' {
                        break;
                    }
                    line.push(char::from(byte));
                    address = address.wrapping_add(1);
                }
                line.push('\n');
                log::info!("console: {}", line.trim_end());
                self.console.push_str(&line);
            }
            2 => {
                log::info!("console: print char routine called");
                self.console.push_str("print char routine called\n");
            }
            _ => {}
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// 4 KiB of ROM holding the program, 4 KiB of RAM above it.
    fn cpu_with_program(program: &[u8]) -> Cpu {
        let mut memory = Memory::new();
        memory.configure(MemoryConfig {
            rom_size: 0x1000,
            ram_size: 0x1000,
            rom_writeable: false,
            ram_mirrored: false,
        });
        memory.load(program, 0);

        let mut cpu = Cpu::new();
        cpu.init(memory, 0);
        cpu.state.sp = 0x2000;
        cpu
    }

    #[test]
    fn mvi_loads_immediate() {
        let mut cpu = cpu_with_program(&[0x3e, 0x05]);
        cpu.step();
        assert_eq!(cpu.state.a, 0x05);
        assert_eq!(cpu.state.pc, 0x0002);
        assert_eq!(cpu.num_steps(), 1);
    }

    #[test]
    fn inr_updates_zsp_but_not_carry() {
        let mut cpu = cpu_with_program(&[0x06, 0x01, 0x04]);
        cpu.state.cc.cy = true;
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.b, 0x02);
        assert!(!cpu.state.cc.z);
        assert!(cpu.state.cc.cy, "INR must leave the carry alone");
    }

    #[test]
    fn dcr_to_zero_sets_zero_flag() {
        let mut cpu = cpu_with_program(&[0x06, 0x01, 0x05]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.b, 0x00);
        assert!(cpu.state.cc.z);
    }

    #[test]
    fn jmp_assigns_pc_without_length_increment() {
        let mut cpu = cpu_with_program(&[0xc3, 0x00, 0x10]);
        cpu.step();
        assert_eq!(cpu.state.pc, 0x1000);
    }

    #[test]
    fn call_pushes_return_address_high_byte_on_top() {
        let mut cpu = cpu_with_program(&[0xcd, 0x00, 0x10]);
        cpu.step();
        assert_eq!(cpu.state.pc, 0x1000);
        assert_eq!(cpu.state.sp, 0x1ffe);
        assert_eq!(cpu.read_memory(0x1ffe), 0x03, "low byte of the return address");
        assert_eq!(cpu.read_memory(0x1fff), 0x00, "high byte of the return address");
    }

    #[test]
    fn call_then_ret_round_trips() {
        // 0x0000: CALL $0010 / 0x0010: RET
        let mut program = vec![0xcd, 0x10, 0x00];
        program.resize(0x10, 0x00);
        program.push(0xc9);

        let mut cpu = cpu_with_program(&program);
        cpu.step();
        assert_eq!(cpu.state.pc, 0x0010);
        cpu.step();
        assert_eq!(cpu.state.pc, 0x0003);
        assert_eq!(cpu.state.sp, 0x2000);
    }

    #[test]
    fn adi_flags_for_small_sum() {
        let mut cpu = cpu_with_program(&[0x3e, 0x0f, 0xc6, 0x01]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.a, 0x10);
        assert!(!cpu.state.cc.cy);
        assert!(!cpu.state.cc.z);
        assert!(!cpu.state.cc.s);
        assert!(!cpu.state.cc.p, "0x10 has one set bit, an odd count");
    }

    #[test]
    fn adi_overflow_sets_carry() {
        let mut cpu = cpu_with_program(&[0x3e, 0xff, 0xc6, 0x02]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.a, 0x01);
        assert!(cpu.state.cc.cy);
    }

    #[test]
    fn sui_borrow_sets_carry_and_sign() {
        let mut cpu = cpu_with_program(&[0x3e, 0x00, 0xd6, 0x01]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.a, 0xff);
        assert!(cpu.state.cc.cy, "borrow reads as carry");
        assert!(cpu.state.cc.s);
        assert!(cpu.state.cc.p, "0xff has eight set bits");
    }

    #[test]
    fn logical_ops_clear_carry() {
        let mut cpu = cpu_with_program(&[0x3e, 0xf0, 0xe6, 0x0f]);
        cpu.state.cc.cy = true;
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.a, 0x00);
        assert!(cpu.state.cc.z);
        assert!(!cpu.state.cc.cy);
    }

    #[test]
    fn cmp_leaves_accumulator() {
        let mut cpu = cpu_with_program(&[0x3e, 0x05, 0xfe, 0x06]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.a, 0x05);
        assert!(cpu.state.cc.cy, "5 - 6 borrows");
        assert!(!cpu.state.cc.z);
    }

    #[test]
    fn dad_uses_word_carry() {
        let mut cpu = cpu_with_program(&[0x21, 0x00, 0x80, 0x29]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.hl(), 0x0000);
        assert!(cpu.state.cc.cy);
    }

    #[test]
    fn push_pop_round_trips_and_restores_sp() {
        let mut cpu = cpu_with_program(&[0x01, 0x34, 0x12, 0xc5, 0xd1]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.sp, 0x1ffe);
        cpu.step();
        assert_eq!(cpu.state.de(), 0x1234);
        assert_eq!(cpu.state.sp, 0x2000);
    }

    #[test]
    fn push_pop_psw_round_trips_flags() {
        let mut cpu = cpu_with_program(&[0xf5, 0x3e, 0xaa, 0x37, 0xf1]);
        cpu.state.a = 0x42;
        cpu.state.cc.z = true;
        cpu.state.cc.cy = true;

        cpu.step(); // PUSH PSW
        assert_eq!(cpu.read_memory(0x1ffe), 0x09, "flags byte is the low half");
        assert_eq!(cpu.read_memory(0x1fff), 0x42, "accumulator is the high half");

        cpu.step(); // MVI A, $aa
        cpu.state.cc.z = false;
        cpu.state.cc.cy = false;
        cpu.step(); // STC
        cpu.step(); // POP PSW

        assert_eq!(cpu.state.a, 0x42);
        assert!(cpu.state.cc.z);
        assert!(cpu.state.cc.cy);
        assert_eq!(cpu.state.sp, 0x2000);
    }

    #[test]
    fn conditional_jump_not_taken_advances_three_bytes() {
        let mut cpu = cpu_with_program(&[0xc2, 0x00, 0x10]);
        cpu.state.cc.z = true; // JNZ not taken
        cpu.step();
        assert_eq!(cpu.state.pc, 0x0003);
    }

    #[test]
    fn conditional_call_not_taken_advances_three_bytes() {
        let mut cpu = cpu_with_program(&[0xdc, 0x00, 0x10]);
        cpu.state.cc.cy = false; // CC not taken
        cpu.step();
        assert_eq!(cpu.state.pc, 0x0003);
        assert_eq!(cpu.state.sp, 0x2000);
    }

    #[test]
    fn conditional_ret_not_taken_advances_one_byte() {
        let mut cpu = cpu_with_program(&[0xc0]);
        cpu.state.cc.z = true; // RNZ not taken
        cpu.step();
        assert_eq!(cpu.state.pc, 0x0001);
    }

    #[test]
    fn conditional_branches_on_parity_and_sign() {
        let mut cpu = cpu_with_program(&[0xea, 0x00, 0x10]);
        cpu.state.cc.p = true; // JPE taken
        cpu.step();
        assert_eq!(cpu.state.pc, 0x1000);

        let mut cpu = cpu_with_program(&[0xfa, 0x00, 0x10]);
        cpu.state.cc.s = false; // JM not taken
        cpu.step();
        assert_eq!(cpu.state.pc, 0x0003);
    }

    #[test]
    fn mov_block_moves_registers_and_memory() {
        let mut cpu = cpu_with_program(&[0x41, 0x77, 0x7e]);
        cpu.state.c = 0x99;
        cpu.state.a = 0x55;
        cpu.state.set_hl(0x1800);

        cpu.step(); // MOV B, C
        assert_eq!(cpu.state.b, 0x99);

        cpu.step(); // MOV M, A
        assert_eq!(cpu.read_memory(0x1800), 0x55);

        cpu.state.a = 0x00;
        cpu.step(); // MOV A, M
        assert_eq!(cpu.state.a, 0x55);
    }

    #[test]
    fn stax_ldax_sta_lda() {
        let mut cpu = cpu_with_program(&[0x02, 0x0a, 0x32, 0x00, 0x19, 0x3a, 0x00, 0x19]);
        cpu.state.set_bc(0x1810);
        cpu.state.a = 0x77;

        cpu.step(); // STAX B
        assert_eq!(cpu.read_memory(0x1810), 0x77);

        cpu.state.a = 0x00;
        cpu.step(); // LDAX B
        assert_eq!(cpu.state.a, 0x77);

        cpu.step(); // STA $1900
        assert_eq!(cpu.read_memory(0x1900), 0x77);

        cpu.state.a = 0x00;
        cpu.step(); // LDA $1900
        assert_eq!(cpu.state.a, 0x77);
    }

    #[test]
    fn shld_lhld_store_low_byte_first() {
        let mut cpu = cpu_with_program(&[0x22, 0x00, 0x18, 0x21, 0x00, 0x00, 0x2a, 0x00, 0x18]);
        cpu.state.set_hl(0xbeef);

        cpu.step(); // SHLD $1800
        assert_eq!(cpu.read_memory(0x1800), 0xef);
        assert_eq!(cpu.read_memory(0x1801), 0xbe);

        cpu.step(); // LXI H, $0000
        cpu.step(); // LHLD $1800
        assert_eq!(cpu.state.hl(), 0xbeef);
    }

    #[test]
    fn exchange_and_stack_pointer_transfers() {
        let mut cpu = cpu_with_program(&[0xeb, 0xf9, 0xe9]);
        cpu.state.set_hl(0x1111);
        cpu.state.set_de(0x2222);

        cpu.step(); // XCHG
        assert_eq!(cpu.state.hl(), 0x2222);
        assert_eq!(cpu.state.de(), 0x1111);

        cpu.step(); // SPHL
        assert_eq!(cpu.state.sp, 0x2222);

        cpu.step(); // PCHL
        assert_eq!(cpu.state.pc, 0x2222);
    }

    #[test]
    fn xthl_swaps_hl_with_stack_top() {
        let mut cpu = cpu_with_program(&[0x01, 0x34, 0x12, 0xc5, 0xe3]);
        cpu.state.set_hl(0xbeef);
        cpu.step(); // LXI B, $1234
        cpu.step(); // PUSH B
        cpu.step(); // XTHL
        assert_eq!(cpu.state.hl(), 0x1234);
        assert_eq!(cpu.read_memory(0x1ffe), 0xef);
        assert_eq!(cpu.read_memory(0x1fff), 0xbe);
    }

    #[test]
    fn rotates() {
        let mut cpu = cpu_with_program(&[0x07, 0x0f, 0x17, 0x1f]);
        cpu.state.a = 0x81;

        cpu.step(); // RLC: 0x81 -> 0x03, cy = 1
        assert_eq!(cpu.state.a, 0x03);
        assert!(cpu.state.cc.cy);

        cpu.step(); // RRC: 0x03 -> 0x81, cy = 1
        assert_eq!(cpu.state.a, 0x81);
        assert!(cpu.state.cc.cy);

        cpu.step(); // RAL: 0x81 -> 0x03 (carry in), cy = 1
        assert_eq!(cpu.state.a, 0x03);
        assert!(cpu.state.cc.cy);

        cpu.step(); // RAR: 0x03 -> 0x81 (carry in), cy = 1
        assert_eq!(cpu.state.a, 0x81);
        assert!(cpu.state.cc.cy);
    }

    #[test]
    fn interrupt_disabled_is_idempotent_noop() {
        let mut cpu = cpu_with_program(&[0x00]);
        let pc = cpu.state.pc;
        let sp = cpu.state.sp;
        let top = cpu.read_memory(sp.wrapping_sub(1));

        cpu.interrupt(2);
        cpu.interrupt(2);

        assert_eq!(cpu.state.pc, pc);
        assert_eq!(cpu.state.sp, sp);
        assert_eq!(cpu.read_memory(sp.wrapping_sub(1)), top);
    }

    #[test]
    fn interrupt_pushes_pc_and_jumps_to_vector() {
        let mut cpu = cpu_with_program(&[0xfb, 0x00]);
        cpu.step(); // EI
        cpu.step(); // NOP, pc = 2

        cpu.interrupt(2);
        assert_eq!(cpu.state.pc, 0x0010);
        assert_eq!(cpu.state.sp, 0x1ffe);
        assert_eq!(cpu.read_memory(0x1ffe), 0x02);
        assert_eq!(cpu.read_memory(0x1fff), 0x00);
    }

    #[test]
    fn in_out_delegate_to_callbacks() {
        let mut cpu = cpu_with_program(&[0xdb, 0x07, 0xd3, 0x03]);

        let written = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&written);
        cpu.set_callback_in(Box::new(|port| port + 1));
        cpu.set_callback_out(Box::new(move |port, value| {
            sink.borrow_mut().push((port, value));
        }));

        cpu.step(); // IN 7
        assert_eq!(cpu.state.a, 0x08);

        cpu.step(); // OUT 3
        assert_eq!(*written.borrow(), vec![(0x03, 0x08)]);
    }

    #[test]
    fn in_without_callback_reads_zero() {
        let mut cpu = cpu_with_program(&[0x3e, 0x55, 0xdb, 0x07]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.state.a, 0x00);
        assert_eq!(cpu.state.pc, 0x0004);
    }

    #[test]
    fn opcode_breakpoint_fires_on_finalized_pc() {
        let mut cpu = cpu_with_program(&[0x00, 0x00, 0x00]);
        cpu.add_breakpoint(Breakpoint::new(BreakpointKind::Opcode, 0x0002));

        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&hits);
        cpu.set_callback_breakpoint(Box::new(move |_, breakpoint, value| {
            sink.borrow_mut().push((breakpoint.kind, breakpoint.address, value));
        }));

        cpu.step();
        assert!(hits.borrow().is_empty());
        cpu.step();
        assert_eq!(*hits.borrow(), vec![(BreakpointKind::Opcode, 0x0002, 0)]);
    }

    #[test]
    fn memory_write_breakpoint_fires_before_the_write() {
        let mut cpu = cpu_with_program(&[0x3e, 0x42, 0x32, 0x00, 0x18]);
        cpu.add_breakpoint(Breakpoint::new(BreakpointKind::MemoryWrite, 0x1800));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        cpu.set_callback_breakpoint(Box::new(move |memory, breakpoint, value| {
            // The write has not landed yet: the prior value is readable.
            sink.borrow_mut()
                .push((breakpoint.address, memory.read(breakpoint.address), value));
        }));

        cpu.step(); // MVI A, $42
        cpu.step(); // STA $1800
        assert_eq!(*seen.borrow(), vec![(0x1800, 0xfe, 0x42)]);
        assert_eq!(cpu.read_memory(0x1800), 0x42);
    }

    #[test]
    fn unimplemented_opcode_is_skipped() {
        // 0x08 is an undocumented no-op, DI is not wired, RST 0 is never
        // fetched from ROM by the targets.
        let mut cpu = cpu_with_program(&[0x08, 0xf3, 0xc7]);
        let state_before = *cpu.state();

        cpu.step();
        assert_eq!(cpu.state.pc, 0x0001);

        cpu.step();
        assert_eq!(cpu.state.pc, 0x0002);
        assert!(!cpu.state.interrupts_enabled);

        cpu.step();
        assert_eq!(cpu.state.pc, 0x0003);
        assert_eq!(cpu.state.sp, state_before.sp, "RST must not touch the stack here");
    }

    #[test]
    fn console_trap_prints_dollar_terminated_string() {
        // LXI D, $0020 / MVI C, $09 / CALL $0005, message at $0020.
        let mut program = vec![0x11, 0x20, 0x00, 0x0e, 0x09, 0xcd, 0x05, 0x00];
        program.resize(0x20, 0x00);
        program.extend_from_slice(b"\x0c\x0d\x0aHELLO$");

        let mut cpu = cpu_with_program(&program);
        cpu.set_console_trap(true);
        cpu.step();
        cpu.step();
        cpu.step();

        assert_eq!(cpu.console(), "HELLO\n");
        assert_eq!(cpu.state.pc, 0x0008, "the call resumes at the next instruction");
        assert_eq!(cpu.state.sp, 0x2000, "no stack traffic for the trap");
        assert!(!cpu.is_halted());
    }

    #[test]
    fn console_trap_call_zero_halts() {
        let mut cpu = cpu_with_program(&[0xcd, 0x00, 0x00]);
        cpu.set_console_trap(true);
        cpu.step();
        assert!(cpu.is_halted());

        let steps = cpu.num_steps();
        cpu.step();
        assert_eq!(cpu.num_steps(), steps, "a halted engine no longer steps");
    }

    #[test]
    fn console_trap_disabled_calls_normally() {
        let mut cpu = cpu_with_program(&[0xcd, 0x05, 0x00]);
        cpu.step();
        assert_eq!(cpu.state.pc, 0x0005);
        assert_eq!(cpu.state.sp, 0x1ffe);
        assert!(!cpu.is_halted());
    }

    #[test]
    fn mirrored_memory_folds_for_cpu_writes() {
        let mut memory = Memory::new();
        memory.configure(MemoryConfig {
            rom_size: 0x1000,
            ram_size: 0x1000,
            rom_writeable: false,
            ram_mirrored: true,
        });
        // STA $2800: one RAM period above $1800.
        memory.load(&[0x3e, 0x42, 0x32, 0x00, 0x28], 0);

        let mut cpu = Cpu::new();
        cpu.init(memory, 0);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.read_memory(0x1800), 0x42);
    }

    #[test]
    fn step_counter_is_monotonic() {
        let mut cpu = cpu_with_program(&[0x00, 0x00, 0x00]);
        assert_eq!(cpu.num_steps(), 0);
        cpu.step();
        cpu.step();
        cpu.step();
        assert_eq!(cpu.num_steps(), 3);
    }
}
