//! avrdude memory operations for a set of byte values
//!
//! Turns a finished [`ByteValues`] model into `-U <memtype>:<op>:<value>:m`
//! arguments. Unset bytes are skipped.

mod interface;

pub use interface::{Capabilities, InterfaceInfo, ProgrammerInterface, INTERFACES};

use core::fmt;

use thiserror::Error;

use crate::descriptor::{ByteDescriptor, FuseType};
use crate::values::ByteValues;

/// Error type for action encoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The interface cannot perform the operation
    #[error("the {interface} interface cannot {operation} {fuse_type}")]
    Unsupported {
        /// Interface
        interface: ProgrammerInterface,
        /// Operation
        operation: Operation,
        /// Byte type
        fuse_type: FuseType,
    },

    /// The values belong to another MCU
    #[error("{fuse_type} of {actual} cannot be written to {expected}")]
    Incompatible {
        /// MCU being programmed
        expected: String,
        /// MCU of the values
        actual: String,
        /// Byte type
        fuse_type: FuseType,
    },

    /// Unknown interface name
    #[error("unknown programming interface '{0}'")]
    UnknownInterface(String),
}

/// Memory operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Write the value
    Write,
    /// Compare the memory against the value
    Verify,
}

impl Operation {
    fn code(self) -> char {
        match self {
            Operation::Write => 'w',
            Operation::Verify => 'v',
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write => write!(f, "write"),
            Operation::Verify => write!(f, "verify"),
        }
    }
}

/// One `-U` memory operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvrdudeAction {
    /// avrdude memory type (`lfuse`, `hfuse`, `efuse`, `fuseN`, `lock`)
    pub memtype: String,
    /// Operation
    pub op: Operation,
    /// Byte value
    pub value: u8,
}

impl fmt::Display for AvrdudeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:0x{:02X}:m", self.memtype, self.op.code(), self.value)
    }
}

/// avrdude memory type of a byte
///
/// `single` is true if the byte is the only one of its type.
pub fn memtype(byte: &ByteDescriptor, single: bool) -> String {
    if byte.fuse_type == FuseType::Lockbits {
        return "lock".to_string();
    }

    let name = byte.name.to_ascii_uppercase();
    match name.as_str() {
        "LOW" => return "lfuse".to_string(),
        "HIGH" => return "hfuse".to_string(),
        "EXTENDED" => return "efuse".to_string(),
        _ => {}
    }

    let index = ["FUSEBYTE", "FUSE", "BYTE"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()));
    match index {
        Some(index) => format!("fuse{}", index),
        None if single => "fuse".to_string(),
        None => format!("fuse{}", byte.offset),
    }
}

/// Encode the set bytes of a model as avrdude actions
///
/// A model without bytes yields no actions. With `verify`, every write is
/// followed by a verify of the same value.
pub fn encode(
    model: &ByteValues,
    target_mcu: &str,
    interface: ProgrammerInterface,
    verify: bool,
) -> Result<Vec<AvrdudeAction>, ActionError> {
    if model.byte_count() == 0 {
        return Ok(Vec::new());
    }

    let fuse_type = model.fuse_type();
    if !model.is_compatible_with(target_mcu) {
        return Err(ActionError::Incompatible {
            expected: target_mcu.to_string(),
            actual: model.mcu_id().to_string(),
            fuse_type,
        });
    }
    if !interface.supports(Capabilities::write(fuse_type)) {
        return Err(ActionError::Unsupported {
            interface,
            operation: Operation::Write,
            fuse_type,
        });
    }
    if verify && !interface.supports(Capabilities::read(fuse_type)) {
        return Err(ActionError::Unsupported {
            interface,
            operation: Operation::Verify,
            fuse_type,
        });
    }

    let single = model.byte_count() == 1;
    let mut actions = Vec::new();
    for (index, &value) in model.values().iter().enumerate() {
        let (Ok(value), Some(byte)) = (u8::try_from(value), model.byte_descriptor(index)) else {
            continue;
        };
        let memtype = memtype(byte, single);
        actions.push(AvrdudeAction {
            memtype: memtype.clone(),
            op: Operation::Write,
            value,
        });
        if verify {
            actions.push(AvrdudeAction {
                memtype,
                op: Operation::Verify,
                value,
            });
        }
    }

    log::debug!(
        "Encoded {} action(s) for {} of {}",
        actions.len(),
        fuse_type,
        model.mcu_id()
    );
    Ok(actions)
}

/// Command-line arguments for a list of actions
pub fn to_args(actions: &[AvrdudeAction]) -> Vec<String> {
    actions
        .iter()
        .flat_map(|action| ["-U".to_string(), action.to_string()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BitFieldDescriptor, DescriptorRepository};
    use crate::values::UNSET;

    const ATMEGA16: &str = include_str!("../../testdata/ATmega16.atdf");
    const ATTINY13: &str = include_str!("../../testdata/ATtiny13.atdf");

    fn repo() -> DescriptorRepository {
        let mut repo = DescriptorRepository::new();
        repo.add_xml("atmega16", ATMEGA16, 1);
        repo.add_xml("attiny13", ATTINY13, 1);
        repo
    }

    fn byte(name: &str, offset: u32) -> ByteDescriptor {
        ByteDescriptor {
            fuse_type: FuseType::Fuse,
            name: name.to_string(),
            caption: String::new(),
            offset,
            size: 1,
            default_value: None,
            bitfields: vec![BitFieldDescriptor::new("X", "X", 0x01)],
        }
    }

    #[test]
    fn test_memtype() {
        assert_eq!(memtype(&byte("LOW", 0), false), "lfuse");
        assert_eq!(memtype(&byte("HIGH", 1), false), "hfuse");
        assert_eq!(memtype(&byte("EXTENDED", 2), false), "efuse");
        assert_eq!(memtype(&byte("FUSEBYTE5", 5), false), "fuse5");
        assert_eq!(memtype(&byte("FUSE2", 2), false), "fuse2");
        assert_eq!(memtype(&byte("BYTE0", 0), false), "fuse0");
        assert_eq!(memtype(&byte("FUSE", 0), true), "fuse");
        assert_eq!(memtype(&byte("SYSCFG0", 1), false), "fuse1");

        let mut lock = byte("LOCKBIT", 0);
        lock.fuse_type = FuseType::Lockbits;
        assert_eq!(memtype(&lock, true), "lock");
    }

    #[test]
    fn test_encode_skips_unset() {
        let repo = repo();
        let mut model = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        model.set_values(&[0xE1, UNSET]).unwrap();

        let actions = encode(&model, "atmega16", ProgrammerInterface::Isp, false).unwrap();
        assert_eq!(to_args(&actions), vec!["-U", "lfuse:w:0xE1:m"]);

        model.set_values(&[0xE1, 0x99]).unwrap();
        let actions = encode(&model, "atmega16", ProgrammerInterface::Isp, true).unwrap();
        let rendered: Vec<_> = actions.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "lfuse:w:0xE1:m",
                "lfuse:v:0xE1:m",
                "hfuse:w:0x99:m",
                "hfuse:v:0x99:m"
            ]
        );
    }

    #[test]
    fn test_encode_lockbits() {
        let repo = repo();
        let mut model = ByteValues::for_mcu(FuseType::Lockbits, "atmega16", &repo);
        model.set_named_value("LB", 0).unwrap();

        let actions = encode(&model, "atmega16", ProgrammerInterface::Jtag, false).unwrap();
        assert_eq!(actions[0].to_string(), "lock:w:0x00:m");
    }

    #[test]
    fn test_encode_empty_model() {
        let repo = repo();
        let model = ByteValues::for_mcu(FuseType::Lockbits, "attiny13", &repo);
        assert_eq!(model.byte_count(), 0);
        assert_eq!(
            encode(&model, "attiny13", ProgrammerInterface::Isp, false),
            Ok(Vec::new())
        );
    }

    #[test]
    fn test_encode_refusals() {
        let repo = repo();
        let mut model = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        model.set_defaults();

        assert_eq!(
            encode(&model, "attiny13", ProgrammerInterface::Isp, false),
            Err(ActionError::Incompatible {
                expected: "attiny13".into(),
                actual: "atmega16".into(),
                fuse_type: FuseType::Fuse,
            })
        );
        assert_eq!(
            encode(&model, "atmega16", ProgrammerInterface::DebugWire, false),
            Err(ActionError::Unsupported {
                interface: ProgrammerInterface::DebugWire,
                operation: Operation::Write,
                fuse_type: FuseType::Fuse,
            })
        );
    }
}
