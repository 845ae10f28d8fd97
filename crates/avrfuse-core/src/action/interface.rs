//! Programming interfaces and what they can do

use core::fmt;
use core::str::FromStr;

use bitflags::bitflags;

use crate::descriptor::FuseType;

bitflags! {
    /// Operations a programming interface supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Can read fuse bytes
        const READ_FUSES     = 1 << 0;
        /// Can write fuse bytes
        const WRITE_FUSES    = 1 << 1;
        /// Can read lock bits
        const READ_LOCKBITS  = 1 << 2;
        /// Can write lock bits
        const WRITE_LOCKBITS = 1 << 3;
        /// Can erase the chip (clears lock bits)
        const CHIP_ERASE     = 1 << 4;
        /// Can be used for on-chip debugging
        const DEBUG          = 1 << 5;

        /// Full configuration access
        const CONFIG = Self::READ_FUSES.bits()
            | Self::WRITE_FUSES.bits()
            | Self::READ_LOCKBITS.bits()
            | Self::WRITE_LOCKBITS.bits();
    }
}

impl Capabilities {
    /// Capability needed to write bytes of a type
    pub fn write(fuse_type: FuseType) -> Self {
        match fuse_type {
            FuseType::Fuse => Capabilities::WRITE_FUSES,
            FuseType::Lockbits => Capabilities::WRITE_LOCKBITS,
        }
    }

    /// Capability needed to read (and so verify) bytes of a type
    pub fn read(fuse_type: FuseType) -> Self {
        match fuse_type {
            FuseType::Fuse => Capabilities::READ_FUSES,
            FuseType::Lockbits => Capabilities::READ_LOCKBITS,
        }
    }
}

/// Physical programming interface of an MCU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgrammerInterface {
    /// In-system programming over SPI
    Isp,
    /// JTAG
    Jtag,
    /// Program and Debug Interface (ATxmega)
    Pdi,
    /// Tiny Programming Interface
    Tpi,
    /// Unified Program and Debug Interface
    Updi,
    /// debugWIRE
    DebugWire,
    /// High-voltage serial programming
    Hvsp,
    /// High-voltage parallel programming
    Hvpp,
}

/// Static description of one interface
pub struct InterfaceInfo {
    /// Interface
    pub interface: ProgrammerInterface,
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
    /// Supported operations
    pub capabilities: Capabilities,
}

/// All interfaces
pub static INTERFACES: &[InterfaceInfo] = &[
    InterfaceInfo {
        interface: ProgrammerInterface::Isp,
        name: "isp",
        aliases: &["spi"],
        description: "In-system programming (SPI)",
        capabilities: Capabilities::CONFIG.union(Capabilities::CHIP_ERASE),
    },
    InterfaceInfo {
        interface: ProgrammerInterface::Jtag,
        name: "jtag",
        aliases: &[],
        description: "JTAG programming and debugging",
        capabilities: Capabilities::CONFIG
            .union(Capabilities::CHIP_ERASE)
            .union(Capabilities::DEBUG),
    },
    InterfaceInfo {
        interface: ProgrammerInterface::Pdi,
        name: "pdi",
        aliases: &[],
        description: "Program and Debug Interface (ATxmega)",
        capabilities: Capabilities::CONFIG
            .union(Capabilities::CHIP_ERASE)
            .union(Capabilities::DEBUG),
    },
    InterfaceInfo {
        interface: ProgrammerInterface::Tpi,
        name: "tpi",
        aliases: &[],
        description: "Tiny Programming Interface",
        capabilities: Capabilities::CONFIG.union(Capabilities::CHIP_ERASE),
    },
    InterfaceInfo {
        interface: ProgrammerInterface::Updi,
        name: "updi",
        aliases: &[],
        description: "Unified Program and Debug Interface",
        capabilities: Capabilities::CONFIG
            .union(Capabilities::CHIP_ERASE)
            .union(Capabilities::DEBUG),
    },
    InterfaceInfo {
        interface: ProgrammerInterface::DebugWire,
        name: "debugwire",
        aliases: &["dw"],
        description: "debugWIRE (fuses can be read but not written)",
        capabilities: Capabilities::READ_FUSES
            .union(Capabilities::READ_LOCKBITS)
            .union(Capabilities::DEBUG),
    },
    InterfaceInfo {
        interface: ProgrammerInterface::Hvsp,
        name: "hvsp",
        aliases: &[],
        description: "High-voltage serial programming",
        capabilities: Capabilities::CONFIG.union(Capabilities::CHIP_ERASE),
    },
    InterfaceInfo {
        interface: ProgrammerInterface::Hvpp,
        name: "hvpp",
        aliases: &["pp"],
        description: "High-voltage parallel programming",
        capabilities: Capabilities::CONFIG.union(Capabilities::CHIP_ERASE),
    },
];

impl ProgrammerInterface {
    /// Table entry of this interface
    pub fn info(self) -> &'static InterfaceInfo {
        INTERFACES
            .iter()
            .find(|info| info.interface == self)
            .unwrap_or(&INTERFACES[0])
    }

    /// Supported operations
    pub fn capabilities(self) -> Capabilities {
        self.info().capabilities
    }

    /// Check whether all of `required` is supported
    pub fn supports(self, required: Capabilities) -> bool {
        self.capabilities().contains(required)
    }

    /// Look up an interface by name or alias (case-insensitive)
    pub fn find(name: &str) -> Option<Self> {
        INTERFACES
            .iter()
            .find(|info| {
                info.name.eq_ignore_ascii_case(name)
                    || info.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
            })
            .map(|info| info.interface)
    }
}

impl fmt::Display for ProgrammerInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}

impl FromStr for ProgrammerInterface {
    type Err = super::ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::find(s).ok_or_else(|| super::ActionError::UnknownInterface(s.to_string()))
    }
}
