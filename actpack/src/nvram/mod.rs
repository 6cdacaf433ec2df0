//! NVRAM property region.
//!
//! A region starts with a 16-byte segment header followed by one item per
//! property. Every item is padded to 16 bytes with `0xff` and the region as a
//! whole is padded to the 512-byte flash write unit.
//!
//! ```text
//! segment: magic "NVRS" | state | crc8 | version | rsv | seq_id | head_size | seg_size | rsv[4]
//! item:    0x49 | state | crc8 | hash | rsv | name_size | data_size(u16) | key\0 | value\0 | pad
//! ```

use std::{fs, path::Path};

use byteorder::{ByteOrder, LittleEndian};

use crate::align::{SECTOR_SIZE, align_up, pad_to};
use crate::checksum::crc8_maxim;
use crate::error::{Error, Result};

mod props;

pub use props::Properties;

/// Segment header magic.
pub const NVRAM_SEGMENT_MAGIC: u32 = 0x5253_564e;
/// Item magic.
pub const NVRAM_ITEM_MAGIC: u8 = 0x49;
/// Declared size of one segment.
pub const NVRAM_SEGMENT_SIZE: usize = 4096;
/// Longest key kept in the region.
pub const NVRAM_MAX_KEY_LEN: usize = 127;
/// Longest value kept in the region.
pub const NVRAM_MAX_VALUE_LEN: usize = 1023;

const SEGMENT_VERSION: u8 = 1;
const SEGMENT_HEADER_SIZE: usize = 16;
const ITEM_HEADER_SIZE: usize = 8;
const ITEM_ALIGN: usize = 16;
const ERASED: u8 = 0xff;

/// Hash of a key as stored in the item header.
pub fn key_hash(key: &[u8]) -> u8 {
    let sum = key.iter().fold(0u32, |sum, &b| sum + b as u32);
    ((sum ^ 0xa5) & 0xff) as u8
}

/// Encodes the segment header.
pub fn segment_header() -> [u8; SEGMENT_HEADER_SIZE] {
    let mut header = [0u8; SEGMENT_HEADER_SIZE];
    LittleEndian::write_u32(&mut header, NVRAM_SEGMENT_MAGIC);
    header[4] = ERASED;
    header[6] = SEGMENT_VERSION;
    header[8] = 0;
    header[9] = SEGMENT_HEADER_SIZE as u8;
    LittleEndian::write_u16(&mut header[10..], NVRAM_SEGMENT_SIZE as u16);
    header[5] = crc8_maxim(&header[6..]);
    header
}

/// Encodes one item, or returns `None` when the key or value is too long.
pub fn encode_item(key: &str, value: &str) -> Option<Vec<u8>> {
    if key.len() > NVRAM_MAX_KEY_LEN || value.len() > NVRAM_MAX_VALUE_LEN {
        return None;
    }

    let name_size = key.len() + 1;
    let data_size = value.len() + 1;
    let capacity = align_up(ITEM_HEADER_SIZE + name_size + data_size, ITEM_ALIGN);
    let mut item = Vec::with_capacity(capacity);
    item.extend_from_slice(&[NVRAM_ITEM_MAGIC, ERASED, 0]);
    item.push(key_hash(key.as_bytes()));
    item.push(0);
    item.push(name_size as u8);
    item.extend_from_slice(&(data_size as u16).to_le_bytes());
    item.extend_from_slice(key.as_bytes());
    item.push(0);
    item.extend_from_slice(value.as_bytes());
    item.push(0);

    item[2] = crc8_maxim(&item[3..]);
    pad_to(&mut item, ITEM_ALIGN, ERASED);
    Some(item)
}

/// Builds an NVRAM region from a property mapping.
#[derive(Debug, Clone, Default)]
pub struct NvramRegionBuilder {
    props: Properties,
}

impl NvramRegionBuilder {
    pub fn new(props: Properties) -> Self {
        Self { props }
    }

    pub fn properties(&self) -> &Properties {
        &self.props
    }

    /// Serializes the region.
    ///
    /// Overlong properties are dropped with a warning. A region larger than
    /// the declared segment size is reported but still produced.
    pub fn build(&self) -> Vec<u8> {
        let mut region = segment_header().to_vec();
        for (key, value) in self.props.iter() {
            match encode_item(key, value) {
                Some(item) => {
                    info!("NVRAM: property {key}={value}");
                    region.extend_from_slice(&item);
                }
                None => warn!(
                    "NVRAM: property `{key}` dropped, key {} bytes (max {NVRAM_MAX_KEY_LEN}), value {} bytes (max {NVRAM_MAX_VALUE_LEN})",
                    key.len(),
                    value.len()
                ),
            }
        }

        if region.len() > NVRAM_SEGMENT_SIZE {
            warn!(
                "NVRAM: region is {} bytes, larger than the {NVRAM_SEGMENT_SIZE} byte segment",
                region.len()
            );
        }
        pad_to(&mut region, SECTOR_SIZE, ERASED);
        region
    }

    /// Builds the region and writes it to `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let region = self.build();
        fs::write(path, &region)?;
        info!("NVRAM: wrote {} ({} bytes)", path.display(), region.len());
        Ok(region.len())
    }
}

/// Decodes the items of a region, checking every CRC.
pub fn read_items(region: &[u8]) -> Result<Vec<(String, String)>> {
    if region.len() < SEGMENT_HEADER_SIZE
        || LittleEndian::read_u32(region) != NVRAM_SEGMENT_MAGIC
    {
        return Err(Error::BadMagic {
            expected: NVRAM_SEGMENT_MAGIC.to_le_bytes().to_vec(),
            found: region[..region.len().min(4)].to_vec(),
        });
    }
    let computed = crc8_maxim(&region[6..SEGMENT_HEADER_SIZE]);
    if region[5] != computed {
        return Err(Error::checksum_mismatch(
            "NVRAM segment",
            region[5] as u32,
            computed as u32,
        ));
    }

    let mut items = Vec::new();
    let mut pos = SEGMENT_HEADER_SIZE;
    while pos + ITEM_HEADER_SIZE <= region.len() && region[pos] == NVRAM_ITEM_MAGIC {
        let header = &region[pos..pos + ITEM_HEADER_SIZE];
        let name_size = header[5] as usize;
        let data_size = LittleEndian::read_u16(&header[6..]) as usize;
        let end = pos + ITEM_HEADER_SIZE + name_size + data_size;
        let body = region.get(pos + 3..end).ok_or(Error::Truncated {
            what: "NVRAM item",
            need: end,
            have: region.len(),
        })?;
        let computed = crc8_maxim(body);
        if header[2] != computed {
            return Err(Error::checksum_mismatch(
                "NVRAM item",
                header[2] as u32,
                computed as u32,
            ));
        }

        let key = &region[pos + ITEM_HEADER_SIZE..pos + ITEM_HEADER_SIZE + name_size];
        let value = &region[end - data_size..end];
        items.push((c_str(key), c_str(value)));
        pos = align_up(end, ITEM_ALIGN);
    }
    Ok(items)
}

fn c_str(field: &[u8]) -> String {
    let end = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
