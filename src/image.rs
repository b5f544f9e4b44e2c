//! Disk image storage: two 32 MB in-memory images, loaded from `.po`/`.2mg`
//! files and saved back out on a dirty flag at shutdown.

use crate::consts::{BLOCK_LEN, NUM_BLOCKS};
use crate::error::ImageError;
use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

/// One 32 MB image: `NUM_BLOCKS` fixed 512-byte blocks, heap-allocated since
/// it's far too large for the stack.
pub struct Image {
    blocks: Box<[[u8; BLOCK_LEN]; NUM_BLOCKS]>,
    dirty: bool,
}

impl Image {
    /// A fresh, all-zero image of `NUM_BLOCKS` blocks.
    pub fn zeroed() -> Self {
        Image {
            blocks: vec![[0u8; BLOCK_LEN]; NUM_BLOCKS]
                .into_boxed_slice()
                .try_into()
                .unwrap_or_else(|_| unreachable!("NUM_BLOCKS-length vec converts to the array")),
            dirty: false,
        }
    }

    /// Load an image from any reader, skipping a 64-byte `.2mg` header first
    /// when `skip_header` is set. Remaining blocks past EOF stay zeroed.
    pub fn load<R: Read + Seek>(mut reader: R, skip_header: bool) -> Result<Self, ImageError> {
        let mut image = Image::zeroed();
        if skip_header {
            reader.seek_relative(64)?;
        }
        for block in image.blocks.iter_mut() {
            let mut filled = 0;
            while filled < BLOCK_LEN {
                let n = reader.read(&mut block[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
        }
        Ok(image)
    }

    /// Load an image from a file path, detecting `.2mg` by its extension.
    pub fn load_from_path(path: &Path) -> Result<Self, ImageError> {
        let skip_header = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("2mg"))
            .unwrap_or(false);
        let file = File::open(path)?;
        Image::load(file, skip_header)
    }

    pub fn block(&self, index: u32) -> Option<&[u8; BLOCK_LEN]> {
        self.blocks.get(index as usize)
    }

    pub fn write_block(&mut self, index: u32, data: &[u8; BLOCK_LEN]) -> bool {
        match self.blocks.get_mut(index as usize) {
            Some(slot) => {
                *slot = *data;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Save, always in raw `.po` format, to `dir/Saved/<basename>`. On a write
    /// failure the original source falls back to a fixed filename once before
    /// giving up; replicated here.
    pub fn save(&self, saved_dir: &Path, basename: &str) -> Result<(), ImageError> {
        fs::create_dir_all(saved_dir)?;
        let primary = saved_dir.join(basename);
        match self.write_to(&primary) {
            Ok(()) => Ok(()),
            Err(err) => {
                #[cfg(feature = "log")]
                log::warn!("failed to save {}: {err}; retrying as asdfghjkl.po", primary.display());
                let fallback = saved_dir.join("asdfghjkl.po");
                self.write_to(&fallback)
            }
        }
    }

    fn write_to(&self, path: &Path) -> Result<(), ImageError> {
        let mut file = File::create(path)?;
        for block in self.blocks.iter() {
            file.write_all(block)?;
        }
        Ok(())
    }
}

/// Derive the save basename the original source uses: everything after the
/// last `/` in the configured image path.
pub fn save_basename(image_path: &Path) -> String {
    image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asdfghjkl.po".to_string())
}

pub fn saved_dir_for(image_path: &Path) -> PathBuf {
    image_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("Saved")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn load_raw_image_zero_fills_tail() {
        let data = vec![0xABu8; BLOCK_LEN * 3];
        let image = Image::load(Cursor::new(data), false).unwrap();
        assert_eq!(image.block(0).unwrap()[0], 0xAB);
        assert_eq!(image.block(2).unwrap()[0], 0xAB);
        assert_eq!(image.block(3).unwrap(), &[0u8; BLOCK_LEN]);
        assert_eq!(image.block(NUM_BLOCKS as u32 - 1).unwrap(), &[0u8; BLOCK_LEN]);
    }

    #[test]
    fn load_2mg_image_skips_header() {
        let mut data = vec![0u8; 64];
        data.extend(vec![0x11u8; BLOCK_LEN]);
        let image = Image::load(Cursor::new(data), true).unwrap();
        assert_eq!(image.block(0).unwrap()[0], 0x11);
    }

    #[test]
    fn write_then_read_back_same_block() {
        let mut image = Image::zeroed();
        let payload = [0x42u8; BLOCK_LEN];
        assert!(image.write_block(42, &payload));
        assert_eq!(image.block(42).unwrap(), &payload);
        assert!(image.is_dirty());
    }

    #[test]
    fn write_out_of_range_block_fails() {
        let mut image = Image::zeroed();
        assert!(!image.write_block(NUM_BLOCKS as u32, &[0u8; BLOCK_LEN]));
    }
}
