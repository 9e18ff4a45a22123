use emu80::MachineType;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let system = args.next().unwrap_or_else(|| "invaders".to_string());
    let rom_path = args.next().unwrap_or_default();

    let machine = match system.as_str() {
        "invaders" | "space_invaders" | "space-invaders" => MachineType::Invaders,
        "cpudiag" | "diag" => MachineType::CpuDiag,
        other => {
            eprintln!("Unknown system '{}'. Supported: invaders, cpudiag", other);
            std::process::exit(1);
        }
    };

    if rom_path.is_empty() {
        match machine {
            MachineType::Invaders => {
                eprintln!(
                    "No ROM path provided for Space Invaders.\n\
                     Please specify a path, for example:\n\
                     emu80 invaders roms/invaders.concatenated"
                );
            }
            MachineType::CpuDiag => {
                eprintln!(
                    "No ROM path provided for the diagnostic.\n\
                     Please specify a path, for example:\n\
                     emu80 cpudiag roms/cpudiag.bin"
                );
            }
        }
        std::process::exit(1);
    }

    log::info!("Playing ROM path: '{}'", rom_path);
    let rom = std::fs::read(&rom_path).expect("Failed to read ROM file");

    emu80::run(machine, &rom).unwrap();
}
