use anyhow::Result;
use emu80_common::App;
use emu80_core::cpu::Cpu;
use emu80_core::memory::{Memory, MemoryConfig};
use emu80_sdl2::{SdlContext, SdlInitInfo};

pub enum MachineType {
    Invaders,
    CpuDiag,
}

pub fn run(machine: MachineType, rom_data: &[u8]) -> Result<()> {
    match machine {
        MachineType::Invaders => run_invaders(rom_data),
        MachineType::CpuDiag => {
            let console = run_cpudiag(rom_data)?;
            print!("{}", console);
            Ok(())
        }
    }
}

/// Run Space Invaders under the SDL2 frontend.
pub fn run_invaders(rom_data: &[u8]) -> Result<()> {
    let mut app = emu80_invaders::InvadersApp::default();
    app.machine.load_rom(rom_data);

    let init_info = SdlInitInfo::builder()
        .width(app.width())
        .height(app.height())
        .scale(app.scale())
        .title(app.title())
        .build();
    SdlContext::run(init_info, app)?;
    Ok(())
}

/// Address the CP/M-style diagnostic binary is assembled for.
const DIAG_LOAD_ADDRESS: u16 = 0x0100;
/// The diagnostic finishes in a few hundred instructions; this cap only
/// guards against a broken ROM that never reaches the exit call.
const DIAG_MAX_STEPS: u64 = 1_000_000;

/// Run a CP/M-style diagnostic binary headless and return its console
/// output. A passing run prints "CPU IS OPERATIONAL".
pub fn run_cpudiag(rom_data: &[u8]) -> Result<String> {
    let mut config = MemoryConfig {
        rom_size: DIAG_LOAD_ADDRESS + rom_data.len() as u16,
        ram_size: 4 * 1024,
        // Writeable during set-up so the image can be patched in place.
        rom_writeable: true,
        ram_mirrored: false,
    };

    let mut memory = Memory::new();
    memory.configure(config);
    memory.load(rom_data, DIAG_LOAD_ADDRESS);

    // The image declares its stack inside the ROM region; repoint the
    // stack-pointer byte at RAM before write-protecting the image.
    memory.write(368, 0x07);

    config.rom_writeable = false;
    memory.configure(config);

    let mut cpu = Cpu::new();
    cpu.init(memory, DIAG_LOAD_ADDRESS);
    cpu.set_console_trap(true);

    while !cpu.is_halted() && cpu.num_steps() < DIAG_MAX_STEPS {
        cpu.step();
    }

    if !cpu.is_halted() {
        log::warn!("diagnostic did not reach the exit call after {} steps", cpu.num_steps());
    }

    Ok(cpu.console().to_string())
}
