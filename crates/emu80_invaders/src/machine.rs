use std::cell::RefCell;
use std::rc::Rc;

use emu80_common::key::Key;
use emu80_core::breakpoint::{Breakpoint, BreakpointKind};
use emu80_core::cpu::Cpu;
use emu80_core::memory::{Memory, MemoryConfig};

/// The game ROM occupies the bottom 8 KiB of the map.
const ROM_SIZE: u16 = 0x2000;
/// 8 KiB of RAM above the ROM: 1 KiB of work RAM, then the frame buffer.
const RAM_SIZE: u16 = 0x2000;

/// Start of the video RAM window used by Space Invaders.
pub const VRAM_START: u16 = 0x2400;
/// Size of video RAM in bytes (0x1c00 = 7168 bytes = 224x256 bits).
pub const VRAM_SIZE: usize = 0x1c00;

/// Instructions per half frame.
///
/// The core counts instructions, not T-states, so the 2 MHz / 60 Hz frame
/// budget is approximated by a flat instruction count per half frame. The
/// hardware raises one interrupt mid-screen and one at vblank.
const STEPS_PER_HALF_FRAME: u32 = 5_000;

/// Bit positions for input port 1 (IN 1). The coin switch reads inverted:
/// 0 means a coin is being inserted.
const IN1_BIT_COIN: u8 = 0;
const IN1_BIT_P2_START: u8 = 1;
const IN1_BIT_P1_START: u8 = 2;
const IN1_BIT_ALWAYS_ONE: u8 = 3;
const IN1_BIT_P1_SHOOT: u8 = 4;
const IN1_BIT_P1_LEFT: u8 = 5;
const IN1_BIT_P1_RIGHT: u8 = 6;

/// Bit positions for input port 2 (IN 2): player 2 controls, tilt and the
/// DIP switches.
const IN2_BIT_TILT: u8 = 2;
const IN2_BIT_P2_SHOOT: u8 = 4;
const IN2_BIT_P2_LEFT: u8 = 5;
const IN2_BIT_P2_RIGHT: u8 = 6;
const IN2_BIT_COIN_INFO: u8 = 7;

const IN2_MASK_SHIPS_PER_CREDIT: u8 = 0x03;

/// DIP switch subset surfaced on input port 2.
///
/// - `ships_per_credit`: number of ships per game (3-6), encoded in bits
///   0-1 as `value - 3`.
/// - `show_coin_info`: whether attract mode shows the coin/credit line.
///   The ROM treats bit 7 = 1 as "hide coin info".
#[derive(Clone, Copy, Debug)]
pub struct DipConfig {
    pub ships_per_credit: u8,
    pub show_coin_info: bool,
}

impl Default for DipConfig {
    fn default() -> Self {
        Self {
            ships_per_credit: 3,
            show_coin_info: true,
        }
    }
}

impl DipConfig {
    fn apply_to_port2(&self, in_port2: &mut u8) {
        *in_port2 &= !IN2_MASK_SHIPS_PER_CREDIT;
        *in_port2 &= !(1 << IN2_BIT_COIN_INFO);

        let ships = self.ships_per_credit.clamp(3, 6);
        *in_port2 |= (ships - 3) & IN2_MASK_SHIPS_PER_CREDIT;

        if !self.show_coin_info {
            *in_port2 |= 1 << IN2_BIT_COIN_INFO;
        }
    }
}

/// IO-port state shared with the CPU's IN/OUT callbacks: input ports, the
/// 16-bit shift register, and the breakpoint latch.
struct IoState {
    in_port1: u8,
    in_port2: u8,
    shift_register: u16,
    shift_offset: u8,
    break_hit: bool,
}

impl Default for IoState {
    fn default() -> Self {
        let mut in_port1 = 0u8;
        in_port1 |= 1 << IN1_BIT_ALWAYS_ONE;
        // Coin is active low: idle reads 1.
        in_port1 |= 1 << IN1_BIT_COIN;
        Self {
            in_port1,
            in_port2: 0,
            shift_register: 0,
            shift_offset: 0,
            break_hit: false,
        }
    }
}

impl IoState {
    fn port_read(&mut self, port: u8) -> u8 {
        match port {
            1 => self.in_port1,
            2 => self.in_port2,
            3 => {
                let shift = 8 - (self.shift_offset & 0x7);
                (self.shift_register >> shift) as u8
            }
            _ => 0,
        }
    }

    fn port_write(&mut self, port: u8, value: u8) {
        match port {
            2 => {
                self.shift_offset = value & 0x7;
            }
            4 => {
                // New byte enters the high half, the old high half drops
                // to the low half.
                self.shift_register = (self.shift_register >> 8) | (u16::from(value) << 8);
            }
            _ => {}
        }
    }
}

/// The Space Invaders arcade machine: the 8080 core plus the cabinet's
/// memory map and IO wiring.
pub struct InvadersMachine {
    cpu: Cpu,
    io: Rc<RefCell<IoState>>,
    dip_config: DipConfig,
}

impl InvadersMachine {
    pub fn new() -> Self {
        Self::with_dip_config(DipConfig::default())
    }

    pub fn with_dip_config(dip_config: DipConfig) -> Self {
        let mut memory = Memory::new();
        memory.configure(MemoryConfig {
            rom_size: ROM_SIZE,
            ram_size: RAM_SIZE,
            rom_writeable: false,
            // The cabinet's address decoding repeats the RAM above 0x4000.
            ram_mirrored: true,
        });

        let mut cpu = Cpu::new();
        cpu.init(memory, 0x0000);

        let io = Rc::new(RefCell::new(IoState::default()));
        wire_io(&mut cpu, &io);

        let mut machine = Self {
            cpu,
            io,
            dip_config,
        };
        machine.apply_dip_config();
        machine
    }

    /// Load the combined ROM image at address zero. Execution starts at
    /// 0x0000 on this hardware.
    pub fn load_rom(&mut self, rom: &[u8]) {
        let len = rom.len().min(ROM_SIZE as usize);
        self.cpu.memory_mut().load(&rom[..len], 0);
    }

    /// Reset the CPU and IO state, preserving memory contents.
    pub fn reset(&mut self) {
        self.cpu.reset();
        *self.io.borrow_mut() = IoState::default();
        self.apply_dip_config();
    }

    /// Run one video frame: half a frame of instructions, the mid-screen
    /// interrupt, the second half, then the vblank interrupt.
    pub fn step_frame(&mut self) {
        self.half_frame();
        self.cpu.interrupt(1);
        self.half_frame();
        self.cpu.interrupt(2);
    }

    fn half_frame(&mut self) {
        for _ in 0..STEPS_PER_HALF_FRAME {
            self.cpu.step();
            if self.io.borrow().break_hit {
                break;
            }
        }
    }

    /// Execute a single instruction; used by the paused/debugger flow.
    pub fn step_instruction(&mut self) {
        self.cpu.step();
    }

    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.cpu.add_breakpoint(breakpoint);
    }

    /// Consume the breakpoint latch. Returns true once per hit.
    pub fn take_break_hit(&mut self) -> bool {
        std::mem::take(&mut self.io.borrow_mut().break_hit)
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    fn apply_dip_config(&mut self) {
        self.dip_config
            .apply_to_port2(&mut self.io.borrow_mut().in_port2);
    }

    /// Map a logical key event onto the cabinet's input ports:
    ///
    /// - `C`           → insert coin (port 1 bit 0, active low)
    /// - `Num1`/`Num2` → start one/two players
    /// - `A`/`Left`    → player 1 left, `D`/`Right` → player 1 right
    /// - `S`/`Space`   → player 1 shoot
    /// - `J`/`L`/`K`   → player 2 left/right/shoot (port 2)
    /// - `T`           → tilt (latched on press until reset by the game)
    pub fn handle_key(&mut self, key: Key, pressed: bool) {
        let mut io = self.io.borrow_mut();
        match key {
            Key::C => set_input_bit(&mut io.in_port1, IN1_BIT_COIN, !pressed),
            Key::Num1 => set_input_bit(&mut io.in_port1, IN1_BIT_P1_START, pressed),
            Key::Num2 => set_input_bit(&mut io.in_port1, IN1_BIT_P2_START, pressed),
            Key::A | Key::Left => set_input_bit(&mut io.in_port1, IN1_BIT_P1_LEFT, pressed),
            Key::D | Key::Right => set_input_bit(&mut io.in_port1, IN1_BIT_P1_RIGHT, pressed),
            Key::S | Key::Space => set_input_bit(&mut io.in_port1, IN1_BIT_P1_SHOOT, pressed),
            Key::J => set_input_bit(&mut io.in_port2, IN2_BIT_P2_LEFT, pressed),
            Key::L => set_input_bit(&mut io.in_port2, IN2_BIT_P2_RIGHT, pressed),
            Key::K => set_input_bit(&mut io.in_port2, IN2_BIT_P2_SHOOT, pressed),
            Key::T if pressed => set_input_bit(&mut io.in_port2, IN2_BIT_TILT, true),
            _ => {}
        }
    }
}

impl Default for InvadersMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn wire_io(cpu: &mut Cpu, io: &Rc<RefCell<IoState>>) {
    let input = Rc::clone(io);
    cpu.set_callback_in(Box::new(move |port| input.borrow_mut().port_read(port)));

    let output = Rc::clone(io);
    cpu.set_callback_out(Box::new(move |port, value| {
        output.borrow_mut().port_write(port, value);
    }));

    let breaks = Rc::clone(io);
    cpu.set_callback_breakpoint(Box::new(move |memory, breakpoint, value| {
        match breakpoint.kind {
            BreakpointKind::MemoryWrite => log::info!(
                "memory write breakpoint at {:#06x}: {:#04x} -> {:#04x}",
                breakpoint.address,
                memory.read(breakpoint.address),
                value
            ),
            BreakpointKind::Opcode => {
                log::info!("opcode breakpoint at {:#06x}", breakpoint.address)
            }
        }
        breaks.borrow_mut().break_hit = true;
    }));
}

fn set_input_bit(port: &mut u8, bit: u8, set: bool) {
    let mask = 1 << bit;
    if set {
        *port |= mask;
    } else {
        *port &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with_rom(rom: &[u8]) -> InvadersMachine {
        let mut machine = InvadersMachine::new();
        machine.load_rom(rom);
        machine
    }

    #[test]
    fn shift_register_window() {
        // MVI A / OUT 4 twice to fill the register, then read it back at
        // offset zero and at offset two.
        let mut machine = machine_with_rom(&[
            0x3e, 0xaa, 0xd3, 0x04, // MVI A, $aa / OUT 4
            0x3e, 0xff, 0xd3, 0x04, // MVI A, $ff / OUT 4
            0xdb, 0x03, // IN 3
            0x3e, 0x02, 0xd3, 0x02, // MVI A, $02 / OUT 2
            0xdb, 0x03, // IN 3
        ]);

        for _ in 0..5 {
            machine.step_instruction();
        }
        assert_eq!(machine.cpu().state().a, 0xff, "offset 0 reads the high byte");

        for _ in 0..3 {
            machine.step_instruction();
        }
        assert_eq!(machine.cpu().state().a, 0xfe, "0xffaa >> 6, low byte");
    }

    #[test]
    fn coin_switch_is_active_low() {
        let mut machine = machine_with_rom(&[0xdb, 0x01, 0xdb, 0x01]);

        machine.handle_key(Key::C, true);
        machine.step_instruction();
        assert_eq!(machine.cpu().state().a & 0x01, 0x00);

        machine.handle_key(Key::C, false);
        machine.step_instruction();
        assert_eq!(machine.cpu().state().a & 0x01, 0x01);
    }

    #[test]
    fn port1_idle_state_has_the_fixed_bit() {
        let mut machine = machine_with_rom(&[0xdb, 0x01]);
        machine.step_instruction();
        assert_eq!(machine.cpu().state().a, (1 << 3) | (1 << 0));
    }

    #[test]
    fn dip_switches_show_up_on_port2() {
        let mut machine = machine_with_rom(&[0xdb, 0x02]);
        machine.step_instruction();
        assert_eq!(machine.cpu().state().a, 0x00, "3 ships, coin info shown");

        let mut machine = InvadersMachine::with_dip_config(DipConfig {
            ships_per_credit: 5,
            show_coin_info: false,
        });
        machine.load_rom(&[0xdb, 0x02]);
        machine.step_instruction();
        assert_eq!(machine.cpu().state().a, 0x02 | 0x80);
    }

    #[test]
    fn tilt_latches_on_press() {
        let mut machine = machine_with_rom(&[0xdb, 0x02]);
        machine.handle_key(Key::T, true);
        machine.handle_key(Key::T, false);
        machine.step_instruction();
        assert_ne!(machine.cpu().state().a & (1 << 2), 0);
    }

    #[test]
    fn step_frame_raises_both_interrupts() {
        // EI, then spin: the frame ends with the vblank interrupt, so the
        // program counter lands on vector 2 (address 16).
        let mut machine = machine_with_rom(&[0xfb, 0xc3, 0x01, 0x00]);
        machine.step_frame();
        assert_eq!(machine.cpu().state().pc, 0x0010);
    }

    #[test]
    fn breakpoint_hit_sets_the_latch() {
        let mut machine = machine_with_rom(&[0xc3, 0x00, 0x00]);
        machine.add_breakpoint(Breakpoint::new(BreakpointKind::Opcode, 0x0000));

        assert!(!machine.take_break_hit());
        machine.step_frame();
        assert!(machine.take_break_hit());
        assert!(!machine.take_break_hit(), "the latch reads once per hit");
    }
}
