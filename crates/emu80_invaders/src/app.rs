use crate::machine::{InvadersMachine, VRAM_SIZE, VRAM_START};
use crate::{SCREEN_HEIGHT, SCREEN_SCALE, SCREEN_WIDTH};
use emu80_common::app::App;
use emu80_common::color::Color;
use emu80_common::key::Key;
use emu80_core::cpu::Cpu;
use emu80_core::disasm;

/// Front-end wrapper for the Space Invaders machine.
///
/// Runs the machine a frame at a time and rasterises video RAM into the
/// shared RGB24 screen buffer. `P` pauses; while paused, `N` single-steps
/// one instruction and logs the disassembly and register state. Hitting a
/// breakpoint drops into the paused mode automatically.
#[derive(Default)]
pub struct InvadersApp {
    should_exit: bool,
    paused: bool,
    pub machine: InvadersMachine,
}

impl App for InvadersApp {
    fn init(&mut self) {
        log::info!("Space Invaders init");
    }

    fn update(&mut self, screen_state: &mut [u8]) {
        if !self.paused {
            self.machine.step_frame();

            if self.machine.take_break_hit() {
                self.paused = true;
                log_cpu_state(self.machine.cpu());
            }
        }

        render_video(&self.machine, screen_state);

        if self.paused {
            overlay_pause_banner(screen_state);
        }
    }

    fn handle_key_event(&mut self, key: Key, is_pressed: bool) {
        if is_pressed {
            match key {
                Key::P => {
                    self.paused = !self.paused;
                    return;
                }
                Key::N if self.paused => {
                    let cpu = self.machine.cpu();
                    let (text, _) = disasm::disassemble(cpu.memory(), cpu.state().pc);
                    log::info!("step {:#06x} {}", cpu.state().pc, text);
                    self.machine.step_instruction();
                    log_cpu_state(self.machine.cpu());
                    return;
                }
                _ => {}
            }
        }

        self.machine.handle_key(key, is_pressed);
    }

    fn should_exit(&self) -> bool {
        self.should_exit
    }

    fn exit(&mut self) {
        log::info!("Space Invaders exit");
    }

    fn width(&self) -> u32 {
        SCREEN_WIDTH as u32
    }

    fn height(&self) -> u32 {
        SCREEN_HEIGHT as u32
    }

    fn scale(&self) -> u32 {
        SCREEN_SCALE
    }

    fn title(&self) -> String {
        "emu80 Space Invaders".to_string()
    }
}

fn log_cpu_state(cpu: &Cpu) {
    let state = cpu.state();
    log::info!(
        "step {} a {:#04x} bc {:#06x} de {:#06x} hl {:#06x} pc {:#06x} sp {:#06x} z {} s {} p {} cy {}",
        cpu.num_steps(),
        state.a,
        state.bc(),
        state.de(),
        state.hl(),
        state.pc,
        state.sp,
        u8::from(state.cc.z),
        u8::from(state.cc.s),
        u8::from(state.cc.p),
        u8::from(state.cc.cy),
    );
}

fn render_video(machine: &InvadersMachine, screen_state: &mut [u8]) {
    let width = SCREEN_WIDTH;
    let height = SCREEN_HEIGHT;

    // Video RAM is column-major: each byte covers 8 vertical pixels with
    // bit 0 at the bottom of the screen; 224 columns of 32 bytes.
    debug_assert_eq!(screen_state.len(), width * height * 3);

    let cpu = machine.cpu();
    let mut i = 0u16;
    for x in 0..width {
        for iy in (0..height).step_by(8) {
            debug_assert!((i as usize) < VRAM_SIZE);
            let mut byte = cpu.read_memory(VRAM_START + i);
            i += 1;
            for b in 0..8 {
                let pixel_on = (byte & 1) != 0;
                byte >>= 1;

                let screen_y = height - (iy + b) - 1;
                let idx = (screen_y * width + x) * 3;
                let color = if !pixel_on {
                    Color::BLACK
                } else if iy > 200 && iy < 220 {
                    Color::RED
                } else if iy < 80 {
                    Color::GREEN
                } else {
                    Color::WHITE
                };

                screen_state[idx] = color.r;
                screen_state[idx + 1] = color.g;
                screen_state[idx + 2] = color.b;
            }
        }
    }
}

/// Striped banner at the top of the screen so a paused emulator is
/// visually obvious.
fn overlay_pause_banner(screen_state: &mut [u8]) {
    let width = SCREEN_WIDTH;
    let banner_height = 12usize;

    for y in 0..banner_height {
        for x in 0..width {
            let idx = (y * width + x) * 3;
            let color = if y % 2 == 0 { Color::WHITE } else { Color::BLACK };
            screen_state[idx] = color.r;
            screen_state[idx + 1] = color.g;
            screen_state[idx + 2] = color.b;
        }
    }
}
