//! 8080 disassembler.
//!
//! Pure formatting utility: hosts use it for debug display, and the CPU
//! engine leans on the reported instruction length to skip over opcodes it
//! does not execute. Undocumented opcodes render as `"-"`.

use lazy_static::lazy_static;

use crate::memory::Memory;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Operand {
    None,
    D8,
    D16,
}

impl Operand {
    fn length(self) -> u16 {
        match self {
            Operand::None => 1,
            Operand::D8 => 2,
            Operand::D16 => 3,
        }
    }
}

struct Entry {
    /// Instruction text up to (but not including) any immediate, with the
    /// mnemonic padded to a seven character column.
    prefix: String,
    operand: Operand,
}

const REG_NAMES: [&str; 8] = ["B", "C", "D", "E", "H", "L", "M", "A"];

lazy_static! {
    static ref OPCODES: [Option<Entry>; 256] = build_table();
}

fn plain(table: &mut [Option<Entry>; 256], op: u8, mnemonic: &str) {
    table[op as usize] = Some(Entry {
        prefix: mnemonic.to_string(),
        operand: Operand::None,
    });
}

fn with_args(table: &mut [Option<Entry>; 256], op: u8, mnemonic: &str, args: &str, operand: Operand) {
    table[op as usize] = Some(Entry {
        prefix: format!("{:<7}{}", mnemonic, args),
        operand,
    });
}

fn build_table() -> [Option<Entry>; 256] {
    const EMPTY: Option<Entry> = None;
    let mut t = [EMPTY; 256];

    plain(&mut t, 0x00, "NOP");
    with_args(&mut t, 0x01, "LXI", "B, #", Operand::D16);
    with_args(&mut t, 0x02, "STAX", "B", Operand::None);
    with_args(&mut t, 0x03, "INX", "B", Operand::None);
    with_args(&mut t, 0x09, "DAD", "B", Operand::None);
    with_args(&mut t, 0x0a, "LDAX", "B", Operand::None);
    with_args(&mut t, 0x0b, "DCX", "B", Operand::None);
    plain(&mut t, 0x07, "RLC");
    plain(&mut t, 0x0f, "RRC");

    with_args(&mut t, 0x11, "LXI", "D, #", Operand::D16);
    with_args(&mut t, 0x12, "STAX", "D", Operand::None);
    with_args(&mut t, 0x13, "INX", "D", Operand::None);
    with_args(&mut t, 0x19, "DAD", "D", Operand::None);
    with_args(&mut t, 0x1a, "LDAX", "D", Operand::None);
    with_args(&mut t, 0x1b, "DCX", "D", Operand::None);
    plain(&mut t, 0x17, "RAL");
    plain(&mut t, 0x1f, "RAR");

    with_args(&mut t, 0x21, "LXI", "H, #", Operand::D16);
    with_args(&mut t, 0x22, "SHLD", "", Operand::D16);
    with_args(&mut t, 0x23, "INX", "H", Operand::None);
    with_args(&mut t, 0x29, "DAD", "H", Operand::None);
    with_args(&mut t, 0x2a, "LHLD", "", Operand::D16);
    with_args(&mut t, 0x2b, "DCX", "H", Operand::None);
    plain(&mut t, 0x27, "DAA");
    plain(&mut t, 0x2f, "CMA");

    with_args(&mut t, 0x31, "LXI", "SP, #", Operand::D16);
    with_args(&mut t, 0x32, "STA", "", Operand::D16);
    with_args(&mut t, 0x33, "INX", "SP", Operand::None);
    with_args(&mut t, 0x39, "DAD", "SP", Operand::None);
    with_args(&mut t, 0x3a, "LDA", "", Operand::D16);
    with_args(&mut t, 0x3b, "DCX", "SP", Operand::None);
    plain(&mut t, 0x37, "STC");
    plain(&mut t, 0x3f, "CMC");

    // INR / DCR / MVI across every destination, M included.
    for dst in 0..8u8 {
        with_args(&mut t, (dst << 3) | 0x04, "INR", REG_NAMES[dst as usize], Operand::None);
        with_args(&mut t, (dst << 3) | 0x05, "DCR", REG_NAMES[dst as usize], Operand::None);
        with_args(
            &mut t,
            (dst << 3) | 0x06,
            "MVI",
            &format!("{}, #", REG_NAMES[dst as usize]),
            Operand::D8,
        );
    }

    // The MOV block, minus 0x76 which encodes HLT.
    for dst in 0..8u8 {
        for src in 0..8u8 {
            let op = 0x40 | (dst << 3) | src;
            if op == 0x76 {
                continue;
            }
            with_args(
                &mut t,
                op,
                "MOV",
                &format!("{}, {}", REG_NAMES[dst as usize], REG_NAMES[src as usize]),
                Operand::None,
            );
        }
    }
    plain(&mut t, 0x76, "HLT");

    // Register-operand ALU block.
    let families: [(u8, &str); 8] = [
        (0x80, "ADD"),
        (0x88, "ADC"),
        (0x90, "SUB"),
        (0x98, "SBB"),
        (0xa0, "ANA"),
        (0xa8, "XRA"),
        (0xb0, "ORA"),
        (0xb8, "CMP"),
    ];
    for (base, mnemonic) in families {
        for src in 0..8u8 {
            with_args(&mut t, base | src, mnemonic, REG_NAMES[src as usize], Operand::None);
        }
    }

    plain(&mut t, 0xc0, "RNZ");
    with_args(&mut t, 0xc1, "POP", "B", Operand::None);
    with_args(&mut t, 0xc2, "JNZ", "", Operand::D16);
    with_args(&mut t, 0xc3, "JMP", "", Operand::D16);
    with_args(&mut t, 0xc4, "CNZ", "", Operand::D16);
    with_args(&mut t, 0xc5, "PUSH", "B", Operand::None);
    with_args(&mut t, 0xc6, "ADI", "#", Operand::D8);
    plain(&mut t, 0xc8, "RZ");
    plain(&mut t, 0xc9, "RET");
    with_args(&mut t, 0xca, "JZ", "", Operand::D16);
    with_args(&mut t, 0xcc, "CZ", "", Operand::D16);
    with_args(&mut t, 0xcd, "CALL", "", Operand::D16);
    with_args(&mut t, 0xce, "ACI", "#", Operand::D8);

    plain(&mut t, 0xd0, "RNC");
    with_args(&mut t, 0xd1, "POP", "D", Operand::None);
    with_args(&mut t, 0xd2, "JNC", "", Operand::D16);
    with_args(&mut t, 0xd3, "OUT", "#", Operand::D8);
    with_args(&mut t, 0xd4, "CNC", "", Operand::D16);
    with_args(&mut t, 0xd5, "PUSH", "D", Operand::None);
    with_args(&mut t, 0xd6, "SUI", "#", Operand::D8);
    plain(&mut t, 0xd8, "RC");
    with_args(&mut t, 0xda, "JC", "", Operand::D16);
    with_args(&mut t, 0xdb, "IN", "#", Operand::D8);
    with_args(&mut t, 0xdc, "CC", "", Operand::D16);
    with_args(&mut t, 0xde, "SBI", "#", Operand::D8);

    plain(&mut t, 0xe0, "RPO");
    with_args(&mut t, 0xe1, "POP", "H", Operand::None);
    with_args(&mut t, 0xe2, "JPO", "", Operand::D16);
    plain(&mut t, 0xe3, "XTHL");
    with_args(&mut t, 0xe4, "CPO", "", Operand::D16);
    with_args(&mut t, 0xe5, "PUSH", "H", Operand::None);
    with_args(&mut t, 0xe6, "ANI", "#", Operand::D8);
    plain(&mut t, 0xe8, "RPE");
    plain(&mut t, 0xe9, "PCHL");
    with_args(&mut t, 0xea, "JPE", "", Operand::D16);
    plain(&mut t, 0xeb, "XCHG");
    with_args(&mut t, 0xec, "CPE", "", Operand::D16);
    with_args(&mut t, 0xee, "XRI", "#", Operand::D8);

    plain(&mut t, 0xf0, "RP");
    with_args(&mut t, 0xf1, "POP", "PSW", Operand::None);
    with_args(&mut t, 0xf2, "JP", "", Operand::D16);
    plain(&mut t, 0xf3, "DI");
    with_args(&mut t, 0xf4, "CP", "", Operand::D16);
    with_args(&mut t, 0xf5, "PUSH", "PSW", Operand::None);
    with_args(&mut t, 0xf6, "ORI", "#", Operand::D8);
    plain(&mut t, 0xf8, "RM");
    plain(&mut t, 0xf9, "SPHL");
    with_args(&mut t, 0xfa, "JM", "", Operand::D16);
    plain(&mut t, 0xfb, "EI");
    with_args(&mut t, 0xfc, "CM", "", Operand::D16);
    with_args(&mut t, 0xfe, "CPI", "#", Operand::D8);

    // RST vectors.
    for n in 0..8u8 {
        with_args(&mut t, 0xc7 | (n << 3), "RST", &n.to_string(), Operand::None);
    }

    t
}

/// Render the instruction at `pc` and report its encoded length in bytes.
///
/// Opcodes with no table entry (the undocumented ones) come back as `"-"`
/// with a length of one.
pub fn disassemble(memory: &Memory, pc: u16) -> (String, u16) {
    let opcode = memory.read(pc);

    match &OPCODES[opcode as usize] {
        None => ("-".to_string(), 1),
        Some(entry) => {
            let length = entry.operand.length();
            let text = match entry.operand {
                Operand::None => entry.prefix.clone(),
                Operand::D8 => {
                    let data = memory.read(pc.wrapping_add(1));
                    format!("{}${:02x}", entry.prefix, data)
                }
                Operand::D16 => {
                    let lo = memory.read(pc.wrapping_add(1));
                    let hi = memory.read(pc.wrapping_add(2));
                    format!("{}${:02x}{:02x}", entry.prefix, hi, lo)
                }
            };
            (text, length)
        }
    }
}
