//! Raw flash image: the whole disk erased to `0xff` with partition files
//! written at their partition addresses.

use std::{fs, path::Path};

use crate::error::{Error, Result};

/// Default flash size.
pub const DEFAULT_DISK_SIZE: usize = 0x40_0000;

const ERASED: u8 = 0xff;

/// Builds a raw flash image.
#[derive(Debug, Clone)]
pub struct RawImageBuilder {
    image: Vec<u8>,
}

impl Default for RawImageBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_DISK_SIZE)
    }
}

impl RawImageBuilder {
    pub fn new(disk_size: usize) -> Self {
        Self {
            image: vec![ERASED; disk_size],
        }
    }

    pub fn disk_size(&self) -> usize {
        self.image.len()
    }

    /// Writes `data` at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileTooLarge`] when the data overruns the disk.
    pub fn place(&mut self, name: &str, address: u32, data: &[u8]) -> Result<&mut Self> {
        let start = address as usize;
        let end = start.checked_add(data.len()).filter(|&end| end <= self.image.len());
        let Some(end) = end else {
            return Err(Error::FileTooLarge {
                name: name.to_string(),
                size: data.len() as u64,
                max: self.image.len().saturating_sub(start) as u64,
            });
        };

        debug!("RAW: {name} at {address:#x}, {} bytes", data.len());
        self.image[start..end].copy_from_slice(data);
        Ok(self)
    }

    /// Reads `path` and writes it at `address`.
    pub fn place_file(&mut self, path: impl AsRef<Path>, address: u32) -> Result<&mut Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::InputMissing(path.to_path_buf()));
        }
        let data = fs::read(path)?;
        self.place(&path.display().to_string(), address, &data)
    }

    pub fn build(self) -> Vec<u8> {
        self.image
    }

    pub fn write_to(self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        fs::write(path, &self.image)?;
        info!("RAW: wrote {} ({} bytes)", path.display(), self.image.len());
        Ok(self.image.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place() {
        let mut raw = RawImageBuilder::new(0x3000);
        raw.place("a", 0x1000, &[1, 2, 3])
            .unwrap()
            .place("b", 0x2ffe, &[4, 5])
            .unwrap();
        let image = raw.build();
        assert_eq!(image.len(), 0x3000);
        assert_eq!(&image[0x1000..0x1003], &[1, 2, 3]);
        assert_eq!(&image[0x2ffe..], &[4, 5]);
        assert!(image[..0x1000].iter().all(|&b| b == 0xff));
        assert!(image[0x1003..0x2ffe].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_overrun() {
        let mut raw = RawImageBuilder::new(0x1000);
        let err = raw.place("big", 0xfff, &[0, 0]).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { max: 1, .. }));
        assert!(raw.place("far", 0x2000, &[0]).is_err());
    }

    #[test]
    fn test_default_size() {
        assert_eq!(RawImageBuilder::default().disk_size(), 0x400000);
    }
}
