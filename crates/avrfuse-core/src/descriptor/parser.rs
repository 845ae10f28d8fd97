//! Part description (ATDF) parser
//!
//! Reads the vendor XML description of one MCU and extracts its fuse and
//! lock-bit layout:
//!
//! ```xml
//! <module caption="Fuses" name="FUSE">
//!   <register-group caption="Fuses" name="FUSE">
//!     <register caption="" name="LOW" offset="0x00" size="1" initval="0xE1">
//!       <bitfield caption="Select Clock Source" mask="0x0F" name="CKSEL" values="ENUM_CKSEL"/>
//!     </register>
//!   </register-group>
//!   <value-group caption="" name="ENUM_CKSEL">
//!     <value caption="Ext. Clock" name="EXTCLK" value="0x00"/>
//!   </value-group>
//! </module>
//! ```
//!
//! The document is walked twice: the first pass collects every value group
//! (enumeration) by name, the second collects the register groups whose
//! name contains `FUSE` or `LOCKBIT`. A malformed document fails as a whole;
//! no partial descriptor is ever returned.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::fixups::Fixups;
use super::types::{
    BitFieldDescriptor, BitFieldValueDescriptor, ByteDescriptor, FuseType, McuDescriptor,
};
use super::DescriptorError;

/// Attributes of one element, in document order
#[derive(Debug, Default)]
struct Attrs {
    element: String,
    pairs: Vec<(String, String)>,
}

impl Attrs {
    fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, name: &str) -> Result<&str, DescriptorError> {
        self.get(name).ok_or_else(|| DescriptorError::MissingAttribute {
            element: self.element.clone(),
            attribute: name.to_string(),
        })
    }

    fn invalid(&self, name: &str, value: &str) -> DescriptorError {
        DescriptorError::InvalidAttribute {
            element: self.element.clone(),
            attribute: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Parse a required numeric attribute (hex or decimal)
    fn number(&self, name: &str) -> Result<u32, DescriptorError> {
        let raw = self.require(name)?;
        parse_number(raw).ok_or_else(|| self.invalid(name, raw))
    }

    /// Parse an optional numeric attribute (hex or decimal)
    fn optional_number(&self, name: &str) -> Result<Option<u32>, DescriptorError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse_number(raw)
                .map(Some)
                .ok_or_else(|| self.invalid(name, raw)),
        }
    }
}

/// A node visited while walking the document
enum Node {
    /// Element start; empty elements produce an `Open` followed by a `Close`
    Open(Attrs),
    /// Element end
    Close(String),
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn read_attrs(start: &BytesStart<'_>) -> Result<Attrs, DescriptorError> {
    let element = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut pairs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        pairs.push((key, value));
    }
    Ok(Attrs { element, pairs })
}

/// Walk every element of the document, calling `visit` for each open/close
fn walk<F>(xml: &str, mut visit: F) -> Result<(), DescriptorError>
where
    F: FnMut(&Node) -> Result<(), DescriptorError>,
{
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut open: Vec<String> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|source| DescriptorError::Xml {
                position: reader.buffer_position(),
                source,
            })?;

        match event {
            Event::Start(start) => {
                let attrs = read_attrs(&start)?;
                open.push(attrs.element.clone());
                visit(&Node::Open(attrs))?;
            }
            Event::Empty(start) => {
                let attrs = read_attrs(&start)?;
                let name = attrs.element.clone();
                visit(&Node::Open(attrs))?;
                visit(&Node::Close(name))?;
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                open.pop();
                visit(&Node::Close(name))?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match open.pop() {
        Some(element) => Err(DescriptorError::UnexpectedEof(element)),
        None => Ok(()),
    }
}

/// One enumeration entry as read in the first pass
///
/// Value groups of unrelated modules may hold values wider than a byte, so
/// the width is only checked once a bitfield refers to the group.
#[derive(Debug, Clone)]
struct RawValue {
    value: u32,
    raw: String,
    name: String,
    caption: String,
}

impl RawValue {
    fn to_descriptor(&self) -> Result<BitFieldValueDescriptor, DescriptorError> {
        let value = u8::try_from(self.value).map_err(|_| DescriptorError::InvalidAttribute {
            element: "value".to_string(),
            attribute: "value".to_string(),
            value: self.raw.clone(),
        })?;
        Ok(BitFieldValueDescriptor {
            value,
            name: self.name.clone(),
            caption: self.caption.clone(),
        })
    }
}

/// First pass: device name and all value groups
fn collect_value_groups(
    xml: &str,
) -> Result<(Option<String>, HashMap<String, Vec<RawValue>>), DescriptorError> {
    let mut device = None;
    let mut groups: HashMap<String, Vec<RawValue>> = HashMap::new();
    let mut current: Option<String> = None;

    walk(xml, |node| {
        match node {
            Node::Open(attrs) => match attrs.element.as_str() {
                "device" if device.is_none() => {
                    device = Some(attrs.require("name")?.to_string());
                }
                "value-group" => {
                    let name = attrs.require("name")?.to_string();
                    groups.entry(name.clone()).or_default();
                    current = Some(name);
                }
                "value" => {
                    if let Some(group) = &current {
                        let name = attrs.require("name")?.to_string();
                        let caption = attrs.get("caption").unwrap_or_default();
                        let value = RawValue {
                            value: attrs.number("value")?,
                            raw: attrs.require("value")?.to_string(),
                            caption: if caption.is_empty() {
                                name.clone()
                            } else {
                                caption.to_string()
                            },
                            name,
                        };
                        groups.entry(group.clone()).or_default().push(value);
                    }
                }
                _ => {}
            },
            Node::Close(name) if name == "value-group" => current = None,
            Node::Close(_) => {}
        }
        Ok(())
    })?;

    Ok((device, groups))
}

/// Parse a part description from a string
///
/// `version` is the version stamp recorded on the descriptor (normally the
/// source file's modification date as YYYYMMDD).
pub fn parse_str(xml: &str, version: u32, fixups: &Fixups) -> Result<McuDescriptor, DescriptorError> {
    let (device, groups) = collect_value_groups(xml)?;
    let name = device.ok_or(DescriptorError::NoDevice)?;
    let mcu_id = name.to_ascii_lowercase();

    let mut fuses = Vec::new();
    let mut lockbits = Vec::new();
    let mut group_type: Option<FuseType> = None;
    let mut pending: Option<ByteDescriptor> = None;

    walk(xml, |node| {
        match node {
            Node::Open(attrs) => match attrs.element.as_str() {
                "register-group" => {
                    group_type = attrs
                        .get("name")
                        .and_then(FuseType::from_register_group);
                }
                "register" => {
                    if let Some(fuse_type) = group_type {
                        let name = attrs.require("name")?.to_string();
                        let caption = attrs.get("caption").unwrap_or_default();
                        // Only the low byte of a wider initval belongs to this byte
                        let default_value = attrs
                            .optional_number("initval")?
                            .map(|v| (v & 0xFF) as u8);
                        pending = Some(ByteDescriptor {
                            fuse_type,
                            caption: if caption.is_empty() {
                                name.clone()
                            } else {
                                caption.to_string()
                            },
                            name,
                            offset: attrs.number("offset")?,
                            size: attrs.optional_number("size")?.unwrap_or(1),
                            default_value,
                            bitfields: Vec::new(),
                        });
                    }
                }
                "bitfield" => {
                    if let Some(byte) = pending.as_mut() {
                        let raw_name = attrs.require("name")?;
                        let caption = attrs.get("caption").unwrap_or_default();
                        let caption = if caption.is_empty() { raw_name } else { caption };
                        let name = fixups.bitfield_name(&mcu_id, raw_name, caption);
                        if name != raw_name {
                            log::debug!("{}: bitfield {} renamed to {}", mcu_id, raw_name, name);
                        }

                        let raw_mask = attrs.require("mask")?;
                        let mask = parse_number(raw_mask)
                            .and_then(|m| u8::try_from(m).ok())
                            .filter(|m| *m != 0)
                            .ok_or_else(|| attrs.invalid("mask", raw_mask))?;

                        let values = match attrs.get("values") {
                            Some(reference) => {
                                let group = fixups.value_group(&mcu_id, reference);
                                match groups.get(group) {
                                    Some(values) => Some(
                                        values
                                            .iter()
                                            .map(RawValue::to_descriptor)
                                            .collect::<Result<Vec<_>, _>>()?,
                                    ),
                                    None => {
                                        log::debug!(
                                            "{}: value group {} of bitfield {} not found",
                                            mcu_id,
                                            group,
                                            name
                                        );
                                        None
                                    }
                                }
                            }
                            None => None,
                        };

                        byte.bitfields.push(BitFieldDescriptor {
                            name: name.to_string(),
                            caption: caption.to_string(),
                            mask,
                            values,
                        });
                    }
                }
                _ => {}
            },
            Node::Close(name) => match name.as_str() {
                "register" => {
                    if let Some(byte) = pending.take() {
                        match byte.fuse_type {
                            FuseType::Fuse => fuses.push(byte),
                            FuseType::Lockbits => lockbits.push(byte),
                        }
                    }
                }
                "register-group" => group_type = None,
                _ => {}
            },
        }
        Ok(())
    })?;

    fuses.sort_by_key(|b: &ByteDescriptor| b.offset);
    lockbits.sort_by_key(|b: &ByteDescriptor| b.offset);

    log::debug!(
        "Parsed {}: {} fuse byte(s), {} lock-bit byte(s)",
        name,
        fuses.len(),
        lockbits.len()
    );

    Ok(McuDescriptor {
        mcu_id,
        name,
        version,
        fuses,
        lockbits,
    })
}

/// Parse a part description file
///
/// The version stamp is taken from the file's modification date.
pub fn parse_file(path: &Path, fixups: &Fixups) -> Result<McuDescriptor, DescriptorError> {
    let xml = fs::read_to_string(path)?;
    let version = version_stamp(path)?;
    parse_str(&xml, version, fixups)
}

/// Modification date of a file as a YYYYMMDD integer (UTC)
pub fn version_stamp(path: &Path) -> Result<u32, DescriptorError> {
    let modified = fs::metadata(path)?.modified()?;
    let timestamp = jiff::Timestamp::try_from(modified)
        .map_err(|e| DescriptorError::Timestamp(e.to_string()))?;
    let date = timestamp.to_zoned(jiff::tz::TimeZone::UTC).date();
    Ok(date_stamp(date.year(), date.month(), date.day()))
}

fn date_stamp(year: i16, month: i8, day: i8) -> u32 {
    let year = u32::try_from(year).unwrap_or(0);
    let month = u32::try_from(month).unwrap_or(0);
    let day = u32::try_from(day).unwrap_or(0);
    year * 10_000 + month * 100 + day
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATMEGA16: &str = include_str!("../../testdata/ATmega16.atdf");
    const ATTINY13: &str = include_str!("../../testdata/ATtiny13.atdf");

    #[test]
    fn test_parse_atmega16() {
        let desc = parse_str(ATMEGA16, 20240101, &Fixups::builtin()).unwrap();

        assert_eq!(desc.mcu_id, "atmega16");
        assert_eq!(desc.name, "ATmega16");
        assert_eq!(desc.version, 20240101);
        assert_eq!(desc.fuses.len(), 2);
        assert_eq!(desc.lockbits.len(), 1);

        let low = &desc.fuses[0];
        assert_eq!(low.name, "LOW");
        assert_eq!(low.offset, 0);
        assert_eq!(low.default_value, Some(0xE1));
        assert_eq!(low.fuse_type, FuseType::Fuse);

        let cksel = low.bitfield("CKSEL").unwrap();
        assert_eq!(cksel.mask, 0x0F);
        assert_eq!(cksel.max_value(), 15);
        assert_eq!(cksel.values.as_ref().unwrap().len(), 6);

        // Caption defaults to the name
        let high = &desc.fuses[1];
        assert_eq!(high.caption, "HIGH");

        let lock = &desc.lockbits[0];
        assert_eq!(lock.fuse_type, FuseType::Lockbits);
        assert_eq!(lock.bitfield("LB").unwrap().mask, 0x03);
    }

    #[test]
    fn test_value_group_fixup_applied() {
        let desc = parse_str(ATMEGA16, 0, &Fixups::builtin()).unwrap();
        let bootsz = desc.find_bitfield(FuseType::Fuse, "BOOTSZ").unwrap().1;
        let values = bootsz.values.as_ref().unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(bootsz.describe(3).unwrap().name, "128W_1F80");

        // Without the correction table the reference stays unresolved
        let desc = parse_str(ATMEGA16, 0, &Fixups::default()).unwrap();
        let bootsz = desc.find_bitfield(FuseType::Fuse, "BOOTSZ").unwrap().1;
        assert!(bootsz.values.is_none());
    }

    #[test]
    fn test_bitfield_name_fixup_applied() {
        let fixups = Fixups::from_ron_str(
            r#"(
                bitfield_names: [
                    (mcu: Some("attiny13"), name: "RSTDISBL", caption_contains: "Reset Disabled", rename_to: "RSTDISABLE"),
                ],
            )"#,
        )
        .unwrap();
        let desc = parse_str(ATTINY13, 0, &fixups).unwrap();
        assert!(desc.find_bitfield(FuseType::Fuse, "RSTDISABLE").is_some());
        assert!(desc.find_bitfield(FuseType::Fuse, "RSTDISBL").is_none());
    }

    #[test]
    fn test_no_lockbits_is_valid() {
        let desc = parse_str(ATTINY13, 0, &Fixups::builtin()).unwrap();
        assert_eq!(desc.byte_count(FuseType::Fuse), 2);
        assert_eq!(desc.byte_count(FuseType::Lockbits), 0);
    }

    #[test]
    fn test_no_register_groups() {
        let xml = r#"<avr-tools-device-file>
            <devices><device name="ATxmega999"/></devices>
        </avr-tools-device-file>"#;
        let desc = parse_str(xml, 0, &Fixups::default()).unwrap();
        assert_eq!(desc.mcu_id, "atxmega999");
        assert!(desc.fuses.is_empty());
        assert!(desc.lockbits.is_empty());
    }

    #[test]
    fn test_malformed_documents() {
        let fixups = Fixups::default();

        // Mismatched end tag
        let xml = r#"<avr-tools-device-file><devices><device name="X"></devices>"#;
        assert!(parse_str(xml, 0, &fixups).is_err());

        // Truncated document
        let xml = r#"<avr-tools-device-file><devices><device name="X"/>"#;
        assert!(matches!(
            parse_str(xml, 0, &fixups),
            Err(DescriptorError::UnexpectedEof(_) | DescriptorError::Xml { .. })
        ));

        // No device element
        let xml = r#"<avr-tools-device-file></avr-tools-device-file>"#;
        assert!(matches!(
            parse_str(xml, 0, &fixups),
            Err(DescriptorError::NoDevice)
        ));
    }

    #[test]
    fn test_bad_mask_rejects_whole_file() {
        let xml = r#"<avr-tools-device-file>
            <devices><device name="ATbad"/></devices>
            <modules><module name="FUSE">
              <register-group name="FUSE">
                <register name="LOW" offset="0x00" size="1">
                  <bitfield name="CKSEL" mask="0x1FF"/>
                </register>
              </register-group>
            </module></modules>
        </avr-tools-device-file>"#;
        assert!(matches!(
            parse_str(xml, 0, &Fixups::default()),
            Err(DescriptorError::InvalidAttribute { .. })
        ));
    }

    const WIDE_LOCK_KEY: &str = r#"<avr-tools-device-file>
        <devices><device name="ATtiny1614"/></devices>
        <modules>
          <module name="FUSE">
            <register-group name="FUSE">
              <register name="WDTCFG" offset="0x00" size="1" initval="0x00">
                <bitfield caption="Watchdog Timeout Period" mask="0x0F" name="PERIOD" values="FUSE_PERIOD"/>
              </register>
            </register-group>
            <value-group name="FUSE_PERIOD">
              <value caption="Off" name="OFF" value="0x00"/>
              <value caption="8 cycles" name="8CLK" value="0x01"/>
            </value-group>
          </module>
          <module name="LOCK">
            <value-group name="LOCK_KEY">
              <value caption="No locks" name="NOLOCK" value="0x5CC5C55C"/>
            </value-group>
          </module>
        </modules>
    </avr-tools-device-file>"#;

    #[test]
    fn test_wide_values_in_unrelated_groups() {
        let desc = parse_str(WIDE_LOCK_KEY, 0, &Fixups::default()).unwrap();
        let (index, period) = desc.find_bitfield(FuseType::Fuse, "PERIOD").unwrap();
        assert_eq!(index, 0);
        assert_eq!(period.values.as_ref().unwrap().len(), 2);
        assert_eq!(period.describe(1).unwrap().name, "8CLK");
    }

    #[test]
    fn test_wide_value_referenced_by_bitfield() {
        let xml = WIDE_LOCK_KEY.replace(r#"values="FUSE_PERIOD""#, r#"values="LOCK_KEY""#);
        assert!(matches!(
            parse_str(&xml, 0, &Fixups::default()),
            Err(DescriptorError::InvalidAttribute { value, .. }) if value == "0x5CC5C55C"
        ));
    }

    #[test]
    fn test_bytes_sorted_by_offset() {
        let xml = r#"<avr-tools-device-file>
            <devices><device name="ATsorted"/></devices>
            <modules><module name="FUSE">
              <register-group name="FUSE">
                <register name="HIGH" offset="0x01" size="1"><bitfield name="B" mask="0x01"/></register>
                <register name="LOW" offset="0x00" size="1"><bitfield name="A" mask="0x01"/></register>
              </register-group>
            </module></modules>
        </avr-tools-device-file>"#;
        let desc = parse_str(xml, 0, &Fixups::default()).unwrap();
        assert_eq!(desc.fuses[0].name, "LOW");
        assert_eq!(desc.fuses[1].name, "HIGH");
    }

    #[test]
    fn test_date_stamp() {
        assert_eq!(date_stamp(2024, 3, 7), 20240307);
    }

    #[test]
    fn test_version_stamp_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ATmega16.atdf");
        fs::write(&path, ATMEGA16).unwrap();
        let stamp = version_stamp(&path).unwrap();
        assert!(stamp > 20000101);
        let desc = parse_file(&path, &Fixups::builtin()).unwrap();
        assert_eq!(desc.version, stamp);
    }
}
