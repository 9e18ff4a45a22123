/// Fill byte for freshly configured storage. Deliberately not zero so that
/// reads of memory nothing ever wrote stand out in a debugger.
const FILL_BYTE: u8 = 0xfe;

/// Describes a contiguous memory map: a ROM region starting at address
/// zero, followed by a RAM region.
///
/// `rom_writeable` exists for self-modifying test fix-ups during set-up and
/// should be switched off again before execution starts. `ram_mirrored`
/// makes the RAM appear repeated above the end of the map, the way small
/// physical RAMs show up on arcade address buses.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryConfig {
    pub rom_size: u16,
    pub ram_size: u16,
    pub rom_writeable: bool,
    pub ram_mirrored: bool,
}

/// Byte-addressable memory map backing the CPU.
///
/// Configured once before execution begins, then mutated only through
/// `read`/`write`. Invalid accesses are modelling bugs and panic rather
/// than degrade.
pub struct Memory {
    config: MemoryConfig,
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            config: MemoryConfig::default(),
            bytes: Vec::new(),
        }
    }

    /// Apply a configuration, resizing the backing storage to
    /// `rom_size + ram_size`. New storage is filled with `FILL_BYTE`;
    /// reconfiguring to the same total size preserves existing contents,
    /// which allows flipping `rom_writeable` off after set-up fix-ups.
    pub fn configure(&mut self, config: MemoryConfig) {
        assert!(
            !config.ram_mirrored || config.ram_size > 0,
            "mirroring requires a non-empty RAM region"
        );

        self.config = config;

        if self.bytes.len() != self.size() {
            self.bytes.resize(self.size(), FILL_BYTE);
        }
    }

    /// Copy `bytes` into the map starting at `at_address`. The caller is
    /// responsible for the content fitting the configured map.
    pub fn load(&mut self, bytes: &[u8], at_address: u16) {
        let start = at_address as usize;
        assert!(
            start + bytes.len() <= self.bytes.len(),
            "load of {} bytes at {:#06x} does not fit a {} byte map",
            bytes.len(),
            at_address,
            self.bytes.len()
        );

        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        log::info!("loaded {} bytes at {:#06x}", bytes.len(), at_address);
    }

    /// Total size of the address space.
    pub fn size(&self) -> usize {
        self.config.rom_size as usize + self.config.ram_size as usize
    }

    /// Fold a mirrored address back into the map.
    ///
    /// The fold subtracts the RAM size, not the total size: the mirror
    /// period is the physical RAM, which repeats above the end of the map.
    pub fn translate(&self, address: u16) -> u16 {
        let mut address = address as usize;

        if self.config.ram_mirrored {
            while address >= self.size() {
                address -= self.config.ram_size as usize;
            }
        }

        assert!(
            address < self.size(),
            "address {:#06x} outside the memory map",
            address
        );

        address as u16
    }

    pub fn read(&self, address: u16) -> u8 {
        let address = self.translate(address);
        self.bytes[address as usize]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        let address = self.translate(address);

        if (address as usize) < self.config.rom_size as usize && !self.config.rom_writeable {
            panic!("write of {:#04x} to ROM address {:#06x}", value, address);
        }

        self.bytes[address as usize] = value;
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
