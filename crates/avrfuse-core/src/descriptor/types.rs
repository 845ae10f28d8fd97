//! Fuse and lock-bit descriptor types
//!
//! These types describe the layout of the configuration bytes of one MCU:
//! which bytes exist, which named bitfields live in each byte and which
//! enumerated values a bitfield may take.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Which group of configuration bytes a descriptor list or value set covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuseType {
    /// Fuse bytes (LOW, HIGH, EXTENDED, FUSEBYTEn...)
    Fuse,
    /// Lock-bit bytes
    Lockbits,
}

impl FuseType {
    /// All fuse types, in document order
    pub const ALL: [FuseType; 2] = [FuseType::Fuse, FuseType::Lockbits];

    /// Classify a register group by its name
    ///
    /// Register groups whose name contains `LOCKBIT` hold lock bits, groups
    /// containing `FUSE` hold fuses. Anything else is not a configuration
    /// byte group.
    pub fn from_register_group(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        if upper.contains("LOCKBIT") {
            Some(FuseType::Lockbits)
        } else if upper.contains("FUSE") {
            Some(FuseType::Fuse)
        } else {
            None
        }
    }
}

impl fmt::Display for FuseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuseType::Fuse => write!(f, "fuses"),
            FuseType::Lockbits => write!(f, "lockbits"),
        }
    }
}

/// Number of bit positions a value has to be shifted left to line up with
/// `mask`. A zero mask yields 8 (nothing fits).
pub const fn mask_shift(mask: u8) -> u32 {
    mask.trailing_zeros()
}

/// Largest value a bitfield with `mask` can hold
///
/// This is the mask shifted down until its lowest set bit is at position 0,
/// e.g. `max_value(0x06) == 3`.
pub const fn max_value(mask: u8) -> u8 {
    if mask == 0 {
        0
    } else {
        mask >> mask_shift(mask)
    }
}

/// Extract the value of the bitfield `mask` from `byte`
pub const fn extract(byte: u8, mask: u8) -> u8 {
    if mask == 0 {
        0
    } else {
        (byte & mask) >> mask_shift(mask)
    }
}

/// Insert `value` into the bitfield `mask` of `byte`
///
/// Bits outside `mask` are left unchanged. Bits of `value` that do not fit
/// into the mask are dropped.
pub const fn insert(byte: u8, mask: u8, value: u8) -> u8 {
    if mask == 0 {
        return byte;
    }
    let shifted = ((value as u16) << mask_shift(mask)) as u8;
    (byte & !mask) | (shifted & mask)
}

/// One enumerated value of a bitfield
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitFieldValueDescriptor {
    /// Numeric value (already shifted down, i.e. in `0..=max_value`)
    pub value: u8,
    /// Short name of the value
    pub name: String,
    /// Human readable description
    pub caption: String,
}

/// A named group of bits within one configuration byte
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitFieldDescriptor {
    /// Bitfield name (e.g. `CKSEL`)
    pub name: String,
    /// Human readable description, defaults to the name
    pub caption: String,
    /// Bit mask within the owning byte
    pub mask: u8,
    /// Enumerated values, if the part description defines any
    #[serde(default)]
    pub values: Option<Vec<BitFieldValueDescriptor>>,
}

impl BitFieldDescriptor {
    /// Create a bitfield without enumerated values
    pub fn new(name: impl Into<String>, caption: impl Into<String>, mask: u8) -> Self {
        Self {
            name: name.into(),
            caption: caption.into(),
            mask,
            values: None,
        }
    }

    /// Largest value this bitfield can hold
    pub fn max_value(&self) -> u8 {
        max_value(self.mask)
    }

    /// Shift between bit 0 and the lowest bit of the mask
    pub fn shift(&self) -> u32 {
        mask_shift(self.mask)
    }

    /// Number of bits covered by the mask
    pub fn width(&self) -> u32 {
        self.mask.count_ones()
    }

    /// Extract this bitfield's value from a byte
    pub fn extract(&self, byte: u8) -> u8 {
        extract(byte, self.mask)
    }

    /// Insert a value for this bitfield into a byte
    pub fn insert(&self, byte: u8, value: u8) -> u8 {
        insert(byte, self.mask, value)
    }

    /// Look up the enumerated value description for `value`
    pub fn describe(&self, value: u8) -> Option<&BitFieldValueDescriptor> {
        self.values
            .as_deref()
            .and_then(|values| values.iter().find(|v| v.value == value))
    }
}

/// One fuse or lock-bit byte
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteDescriptor {
    /// Whether this is a fuse or a lock-bit byte
    pub fuse_type: FuseType,
    /// Register name (e.g. `LOW`, `HIGH`, `LOCKBIT`)
    pub name: String,
    /// Human readable description
    pub caption: String,
    /// Byte offset within the fuse or lock-bit address space
    pub offset: u32,
    /// Register size as declared by the part description
    pub size: u32,
    /// Factory default value (`initval`), if declared
    #[serde(default)]
    pub default_value: Option<u8>,
    /// Bitfields of this byte, in declaration order
    pub bitfields: Vec<BitFieldDescriptor>,
}

impl ByteDescriptor {
    /// Find a bitfield of this byte by name
    pub fn bitfield(&self, name: &str) -> Option<&BitFieldDescriptor> {
        self.bitfields.iter().find(|bf| bf.name == name)
    }

    /// Union of all bitfield masks of this byte
    pub fn used_mask(&self) -> u8 {
        self.bitfields.iter().fold(0, |acc, bf| acc | bf.mask)
    }
}

/// Complete fuse and lock-bit layout of one MCU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McuDescriptor {
    /// MCU id (lower-case device name, e.g. `atmega16`)
    pub mcu_id: String,
    /// Device name as spelled by the vendor (e.g. `ATmega16`)
    pub name: String,
    /// Source version stamp (modification date as YYYYMMDD)
    pub version: u32,
    /// Fuse bytes, ordered by offset
    pub fuses: Vec<ByteDescriptor>,
    /// Lock-bit bytes, ordered by offset
    pub lockbits: Vec<ByteDescriptor>,
}

impl McuDescriptor {
    /// Create a descriptor for an MCU without any fuse or lock-bit bytes
    ///
    /// Used for MCUs that are not known to the repository, so that a value
    /// set with zero bytes can still be built for them.
    pub fn unknown(mcu_id: &str) -> Self {
        Self {
            mcu_id: mcu_id.to_string(),
            name: mcu_id.to_string(),
            version: 0,
            fuses: Vec::new(),
            lockbits: Vec::new(),
        }
    }

    /// Byte descriptors of the given type
    pub fn bytes(&self, fuse_type: FuseType) -> &[ByteDescriptor] {
        match fuse_type {
            FuseType::Fuse => &self.fuses,
            FuseType::Lockbits => &self.lockbits,
        }
    }

    /// Number of bytes of the given type (may legitimately be 0)
    pub fn byte_count(&self, fuse_type: FuseType) -> usize {
        self.bytes(fuse_type).len()
    }

    /// Find a bitfield by name, returning the index of its owning byte
    pub fn find_bitfield(
        &self,
        fuse_type: FuseType,
        name: &str,
    ) -> Option<(usize, &BitFieldDescriptor)> {
        self.bytes(fuse_type)
            .iter()
            .enumerate()
            .find_map(|(idx, byte)| byte.bitfield(name).map(|bf| (idx, bf)))
    }

    /// Iterate over all bitfields of a type with the index of their byte
    pub fn bitfields(
        &self,
        fuse_type: FuseType,
    ) -> impl Iterator<Item = (usize, &BitFieldDescriptor)> {
        self.bytes(fuse_type)
            .iter()
            .enumerate()
            .flat_map(|(idx, byte)| byte.bitfields.iter().map(move |bf| (idx, bf)))
    }

    /// Check whether two MCUs share the same byte and bitfield layout
    pub fn has_same_layout(&self, other: &McuDescriptor, fuse_type: FuseType) -> bool {
        let ours = self.bytes(fuse_type);
        let theirs = other.bytes(fuse_type);
        ours.len() == theirs.len()
            && ours.iter().zip(theirs).all(|(a, b)| {
                a.name == b.name
                    && a.bitfields.len() == b.bitfields.len()
                    && a.bitfields
                        .iter()
                        .zip(&b.bitfields)
                        .all(|(x, y)| x.name == y.name && x.mask == y.mask)
            })
    }
}
