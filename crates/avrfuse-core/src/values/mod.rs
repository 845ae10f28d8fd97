//! Runtime fuse and lock-bit values
//!
//! [`ByteValues`] holds the configuration bytes of one MCU together with the
//! descriptor that gives them meaning. Bytes are `-1` while unset, otherwise
//! in `0..=255`. Named bitfields are read and written through their masks,
//! and every mutation is announced to the registered listeners.

use core::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::descriptor::{
    BitFieldDescriptor, ByteDescriptor, DescriptorError, DescriptorRepository, FuseType,
    McuDescriptor,
};

/// Value of an unset byte or of a bitfield inside an unset byte
pub const UNSET: i16 = -1;

/// Error type for value accesses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The bitfield is not part of the current MCU's catalog
    #[error("unknown bitfield '{0}'")]
    UnknownBitfield(String),

    /// A bitfield value does not fit its mask
    #[error("value {value} out of range for {name} (0..={max})")]
    OutOfRange {
        /// Bitfield name
        name: String,
        /// Rejected value
        value: i64,
        /// Largest legal value
        max: u8,
    },

    /// A byte index past the end of the value array
    #[error("byte index {index} out of range ({count} byte(s))")]
    ByteIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of bytes
        count: usize,
    },

    /// A byte value outside `-1..=255`
    #[error("invalid byte value {0}")]
    InvalidByteValue(i32),

    /// A bulk update with the wrong number of bytes
    #[error("expected {expected} byte value(s), got {actual}")]
    LengthMismatch {
        /// Byte count of the model
        expected: usize,
        /// Number of values supplied
        actual: usize,
    },
}

/// Change notification sent to listeners after every mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueChange {
    /// One bitfield was written
    Bitfield {
        /// Bitfield name
        name: String,
        /// New value of the owning byte
        byte_value: i16,
        /// New value of the bitfield
        bitfield_value: i16,
    },
    /// The model now describes another MCU
    McuChanged,
    /// The free-text comment changed
    CommentChanged,
    /// Several bytes were replaced at once
    ValuesReplaced,
}

/// Handle returned by [`ByteValues::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&ValueChange, &ByteValues)>;

/// Fuse or lock-bit values of one MCU
pub struct ByteValues {
    fuse_type: FuseType,
    descriptor: Arc<McuDescriptor>,
    values: Vec<i16>,
    comment: String,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl ByteValues {
    /// Create a model with every byte unset
    pub fn new(fuse_type: FuseType, descriptor: Arc<McuDescriptor>) -> Self {
        let count = descriptor.byte_count(fuse_type);
        Self {
            fuse_type,
            descriptor,
            values: vec![UNSET; count],
            comment: String::new(),
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Create a model for an MCU looked up in a repository
    ///
    /// An unknown MCU yields a model with zero bytes.
    pub fn for_mcu(fuse_type: FuseType, mcu_id: &str, repo: &DescriptorRepository) -> Self {
        let descriptor = repo.get(mcu_id).unwrap_or_else(|e| {
            log::warn!("{}; using an empty {} layout", e, fuse_type);
            Arc::new(McuDescriptor::unknown(&mcu_id.to_ascii_lowercase()))
        });
        Self::new(fuse_type, descriptor)
    }

    /// Whether this model holds fuses or lock bits
    pub fn fuse_type(&self) -> FuseType {
        self.fuse_type
    }

    /// MCU id of the current catalog
    pub fn mcu_id(&self) -> &str {
        &self.descriptor.mcu_id
    }

    /// Current catalog
    pub fn descriptor(&self) -> &Arc<McuDescriptor> {
        &self.descriptor
    }

    /// Number of bytes; 0 means this type does not apply to the MCU
    pub fn byte_count(&self) -> usize {
        self.values.len()
    }

    /// Byte values, `-1` for unset bytes
    pub fn values(&self) -> &[i16] {
        &self.values
    }

    /// Copy of the byte values
    pub fn get_values(&self) -> Vec<i16> {
        self.values.clone()
    }

    /// Replace all byte values at once
    pub fn set_values(&mut self, values: &[i16]) -> Result<(), ValueError> {
        if values.len() != self.values.len() {
            return Err(ValueError::LengthMismatch {
                expected: self.values.len(),
                actual: values.len(),
            });
        }
        if let Some(&bad) = values.iter().find(|&&v| !(UNSET..=255).contains(&v)) {
            return Err(ValueError::InvalidByteValue(i32::from(bad)));
        }
        self.values.copy_from_slice(values);
        self.notify(ValueChange::ValuesReplaced);
        Ok(())
    }

    /// Value of one byte
    pub fn get_byte_value(&self, index: usize) -> Result<i16, ValueError> {
        self.values
            .get(index)
            .copied()
            .ok_or(ValueError::ByteIndexOutOfRange {
                index,
                count: self.values.len(),
            })
    }

    /// Set one byte, `-1` unsets it
    pub fn set_byte_value(&mut self, index: usize, value: i32) -> Result<(), ValueError> {
        let count = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ValueError::ByteIndexOutOfRange { index, count })?;
        *slot = i16::try_from(value)
            .ok()
            .filter(|v| (UNSET..=255).contains(v))
            .ok_or(ValueError::InvalidByteValue(value))?;
        self.notify(ValueChange::ValuesReplaced);
        Ok(())
    }

    /// Unset every byte
    pub fn clear(&mut self) {
        self.values.fill(UNSET);
        self.notify(ValueChange::ValuesReplaced);
    }

    /// Load the factory default of every byte that declares one
    pub fn set_defaults(&mut self) {
        for (slot, byte) in self
            .values
            .iter_mut()
            .zip(self.descriptor.bytes(self.fuse_type))
        {
            *slot = byte.default_value.map_or(UNSET, i16::from);
        }
        self.notify(ValueChange::ValuesReplaced);
    }

    /// Free-text comment
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Replace the free-text comment
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
        self.notify(ValueChange::CommentChanged);
    }

    /// Names of all bitfields of the current catalog, in byte order
    pub fn bitfield_names(&self) -> Vec<&str> {
        self.descriptor
            .bitfields(self.fuse_type)
            .map(|(_, bf)| bf.name.as_str())
            .collect()
    }

    /// Descriptor of a bitfield
    pub fn bitfield(&self, name: &str) -> Option<&BitFieldDescriptor> {
        self.descriptor
            .find_bitfield(self.fuse_type, name)
            .map(|(_, bf)| bf)
    }

    /// Descriptor of one byte
    pub fn byte_descriptor(&self, index: usize) -> Option<&ByteDescriptor> {
        self.descriptor.bytes(self.fuse_type).get(index)
    }

    /// Value of a named bitfield, `-1` if its byte is unset
    pub fn get_named_value(&self, name: &str) -> Result<i16, ValueError> {
        let (index, bf) = self
            .descriptor
            .find_bitfield(self.fuse_type, name)
            .ok_or_else(|| ValueError::UnknownBitfield(name.to_string()))?;
        Ok(match u8::try_from(self.values[index]) {
            Ok(byte) => i16::from(bf.extract(byte)),
            Err(_) => UNSET,
        })
    }

    /// Write a named bitfield
    ///
    /// Writing into an unset byte first sets that byte to 0, so the other
    /// bits of the byte read back as 0 afterwards.
    pub fn set_named_value(&mut self, name: &str, value: i64) -> Result<(), ValueError> {
        let descriptor = Arc::clone(&self.descriptor);
        let (index, bf) = descriptor
            .find_bitfield(self.fuse_type, name)
            .ok_or_else(|| ValueError::UnknownBitfield(name.to_string()))?;

        let max = bf.max_value();
        let field = u8::try_from(value)
            .ok()
            .filter(|v| *v <= max)
            .ok_or_else(|| ValueError::OutOfRange {
                name: name.to_string(),
                value,
                max,
            })?;

        let byte = u8::try_from(self.values[index]).unwrap_or(0);
        let updated = bf.insert(byte, field);
        self.values[index] = i16::from(updated);

        self.notify(ValueChange::Bitfield {
            name: bf.name.clone(),
            byte_value: i16::from(updated),
            bitfield_value: i16::from(field),
        });
        Ok(())
    }

    /// Switch to another MCU's catalog
    ///
    /// With `carry_forward`, every bitfield that exists under the same name
    /// in both catalogs keeps its value. All other bytes start out unset.
    pub fn set_mcu(&mut self, descriptor: Arc<McuDescriptor>, carry_forward: bool) {
        let mut values = vec![UNSET; descriptor.byte_count(self.fuse_type)];

        if carry_forward {
            for (index, bf) in descriptor.bitfields(self.fuse_type) {
                let Ok(old) = self.get_named_value(&bf.name) else {
                    continue;
                };
                let Ok(old) = u8::try_from(old) else {
                    continue;
                };
                if old > bf.max_value() {
                    log::debug!(
                        "Dropping {}={} while switching to {}: out of range",
                        bf.name,
                        old,
                        descriptor.mcu_id
                    );
                    continue;
                }
                let byte = u8::try_from(values[index]).unwrap_or(0);
                values[index] = i16::from(bf.insert(byte, old));
            }
        }

        log::info!(
            "Switching {} from {} to {}{}",
            self.fuse_type,
            self.descriptor.mcu_id,
            descriptor.mcu_id,
            if carry_forward { " (carrying values)" } else { "" }
        );

        self.descriptor = descriptor;
        self.values = values;
        self.notify(ValueChange::McuChanged);
    }

    /// Switch to another MCU looked up in a repository
    ///
    /// An unknown MCU still switches the model, to a catalog without any
    /// bytes, and reports the lookup error.
    pub fn set_mcu_id(
        &mut self,
        mcu_id: &str,
        carry_forward: bool,
        repo: &DescriptorRepository,
    ) -> Result<(), DescriptorError> {
        match repo.get(mcu_id) {
            Ok(descriptor) => {
                self.set_mcu(descriptor, carry_forward);
                Ok(())
            }
            Err(e) => {
                let unknown = McuDescriptor::unknown(&mcu_id.to_ascii_lowercase());
                self.set_mcu(Arc::new(unknown), carry_forward);
                Err(e)
            }
        }
    }

    /// True for a non-empty model of the given MCU
    pub fn is_compatible_with(&self, mcu_id: &str) -> bool {
        self.byte_count() > 0 && self.descriptor.mcu_id.eq_ignore_ascii_case(mcu_id)
    }

    /// Check whether another model uses the same byte and bitfield layout
    pub fn has_same_layout(&self, other: &ByteValues) -> bool {
        self.fuse_type == other.fuse_type
            && self
                .descriptor
                .has_same_layout(&other.descriptor, self.fuse_type)
    }

    /// Register a change listener
    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ValueChange, &ByteValues) + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Unregister a change listener; returns false if it was not registered
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn notify(&mut self, change: ValueChange) {
        let mut listeners = core::mem::take(&mut self.listeners);
        for (_, listener) in listeners.iter_mut() {
            listener(&change, self);
        }
        self.listeners = listeners;
    }
}

impl PartialEq for ByteValues {
    fn eq(&self, other: &Self) -> bool {
        self.fuse_type == other.fuse_type
            && self.descriptor.mcu_id == other.descriptor.mcu_id
            && self.values == other.values
            && self.comment == other.comment
    }
}

impl fmt::Debug for ByteValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteValues")
            .field("fuse_type", &self.fuse_type)
            .field("mcu_id", &self.descriptor.mcu_id)
            .field("values", &self.values)
            .field("comment", &self.comment)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const ATMEGA16: &str = include_str!("../../testdata/ATmega16.atdf");
    const ATMEGA32: &str = include_str!("../../testdata/ATmega32.atdf");
    const ATTINY13: &str = include_str!("../../testdata/ATtiny13.atdf");

    fn repo() -> DescriptorRepository {
        let mut repo = DescriptorRepository::new();
        repo.add_xml("atmega16", ATMEGA16, 1);
        repo.add_xml("atmega32", ATMEGA32, 1);
        repo.add_xml("attiny13", ATTINY13, 1);
        repo
    }

    fn recorder(values: &mut ByteValues) -> Rc<RefCell<Vec<ValueChange>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        values.add_listener(move |change, _| sink.borrow_mut().push(change.clone()));
        events
    }

    #[test]
    fn test_unset_propagates() {
        let repo = repo();
        let values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        assert_eq!(values.byte_count(), 2);
        assert_eq!(values.values(), &[UNSET, UNSET]);
        for name in values.bitfield_names() {
            assert_eq!(values.get_named_value(name), Ok(UNSET));
        }
        assert_eq!(
            values.get_named_value("NOPE"),
            Err(ValueError::UnknownBitfield("NOPE".into()))
        );
    }

    #[test]
    fn test_set_named_value_single_bit() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        values.set_values(&[0x00, 0x00]).unwrap();

        // BOOTRST is bit 0 of the high byte
        values.set_named_value("BOOTRST", 1).unwrap();
        assert_eq!(values.values(), &[0x00, 0x01]);
        assert_eq!(values.get_named_value("BOOTRST"), Ok(1));
    }

    #[test]
    fn test_set_named_value_materialises_unset_byte() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);

        values.set_named_value("SUT", 2).unwrap();
        // The rest of the low byte now reads as 0
        assert_eq!(values.values(), &[0x20, UNSET]);
        assert_eq!(values.get_named_value("CKSEL"), Ok(0));
        assert_eq!(values.get_named_value("BOOTSZ"), Ok(UNSET));
    }

    #[test]
    fn test_set_named_value_out_of_range() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        values.set_values(&[0xE1, 0x99]).unwrap();

        let err = values.set_named_value("BOOTSZ", 4).unwrap_err();
        assert_eq!(
            err,
            ValueError::OutOfRange {
                name: "BOOTSZ".into(),
                value: 4,
                max: 3
            }
        );
        assert!(values.set_named_value("BOOTSZ", -1).is_err());
        assert_eq!(values.values(), &[0xE1, 0x99]);
    }

    #[test]
    fn test_byte_access() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);

        values.set_byte_value(1, 0xD9).unwrap();
        assert_eq!(values.get_byte_value(1), Ok(0xD9));
        assert_eq!(
            values.set_byte_value(2, 0),
            Err(ValueError::ByteIndexOutOfRange { index: 2, count: 2 })
        );
        assert_eq!(
            values.set_byte_value(0, 256),
            Err(ValueError::InvalidByteValue(256))
        );
        assert_eq!(
            values.set_values(&[1]),
            Err(ValueError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            values.set_values(&[-2, 0]),
            Err(ValueError::InvalidByteValue(-2))
        );
    }

    #[test]
    fn test_defaults_and_clear() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        values.set_defaults();
        assert_eq!(values.values(), &[0xE1, 0x99]);
        assert_eq!(values.get_named_value("CKSEL"), Ok(1));
        values.clear();
        assert_eq!(values.values(), &[UNSET, UNSET]);
    }

    #[test]
    fn test_one_event_per_mutation() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        let events = recorder(&mut values);

        values.set_named_value("CKSEL", 0x0F).unwrap();
        values.set_comment("backup");
        values.set_values(&[0xFF, 0xFF]).unwrap();
        values.set_mcu_id("atmega32", true, &repo).unwrap();
        // Failed writes are silent
        let _ = values.set_named_value("CKSEL", 16);

        assert_eq!(
            *events.borrow(),
            vec![
                ValueChange::Bitfield {
                    name: "CKSEL".into(),
                    byte_value: 0x0F,
                    bitfield_value: 0x0F
                },
                ValueChange::CommentChanged,
                ValueChange::ValuesReplaced,
                ValueChange::McuChanged,
            ]
        );
    }

    #[test]
    fn test_remove_listener() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let id = values.add_listener(move |_, _| *sink.borrow_mut() += 1);

        values.clear();
        assert!(values.remove_listener(id));
        assert!(!values.remove_listener(id));
        values.clear();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_listener_sees_new_state() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        values.add_listener(move |_, model| *sink.borrow_mut() = Some(model.mcu_id().to_string()));

        values.set_mcu_id("attiny13", false, &repo).unwrap();
        assert_eq!(seen.borrow().as_deref(), Some("attiny13"));
    }

    #[test]
    fn test_carry_forward_same_layout() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        values.set_values(&[0xE1, 0x99]).unwrap();
        values.set_comment("keep me");

        values.set_mcu_id("atmega32", true, &repo).unwrap();
        assert_eq!(values.mcu_id(), "atmega32");
        assert_eq!(values.values(), &[0xE1, 0x99]);
        assert_eq!(values.comment(), "keep me");
        assert!(values.is_compatible_with("ATmega32"));
        assert!(!values.is_compatible_with("atmega16"));
    }

    #[test]
    fn test_carry_forward_partial_overlap() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        // SUT=2, CKSEL=4 in the low byte, high byte unset
        values.set_values(&[0x24, UNSET]).unwrap();

        values.set_mcu_id("attiny13", true, &repo).unwrap();
        // attiny13: SUT at 0x0C, CKSEL at 0x03; CKSEL=4 does not fit.
        // BODLEVEL moves from the low byte into the high byte.
        assert_eq!(values.get_named_value("SUT"), Ok(2));
        assert_eq!(values.get_named_value("CKSEL"), Ok(0));
        assert_eq!(values.get_named_value("BODLEVEL"), Ok(0));
        assert_eq!(values.get_named_value("SPIEN"), Ok(0));
        assert_eq!(values.values(), &[0x08, 0x00]);
    }

    #[test]
    fn test_switch_without_carry() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        values.set_defaults();
        values.set_mcu_id("atmega32", false, &repo).unwrap();
        assert_eq!(values.values(), &[UNSET, UNSET]);
    }

    #[test]
    fn test_unknown_mcu_has_no_bytes() {
        let repo = repo();
        let mut values = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        assert!(values.set_mcu_id("atmega999", true, &repo).is_err());
        assert_eq!(values.mcu_id(), "atmega999");
        assert_eq!(values.byte_count(), 0);
        assert!(!values.is_compatible_with("atmega999"));

        let lock = ByteValues::for_mcu(FuseType::Lockbits, "attiny13", &repo);
        assert_eq!(lock.byte_count(), 0);
    }

    #[test]
    fn test_layout_comparison() {
        let repo = repo();
        let m16 = ByteValues::for_mcu(FuseType::Fuse, "atmega16", &repo);
        let m32 = ByteValues::for_mcu(FuseType::Fuse, "atmega32", &repo);
        let t13 = ByteValues::for_mcu(FuseType::Fuse, "attiny13", &repo);
        assert!(m16.has_same_layout(&m32));
        assert!(!m16.has_same_layout(&t13));
    }
}
