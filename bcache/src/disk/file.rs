use super::Disk;
use crate::{BlockId, Error};
use std::{
    collections::HashMap,
    fs,
    io::{self, ErrorKind},
    path::Path,
    sync::RwLock,
};
use tracing::debug;

/// Devices backed by image files.
///
/// Block `n` of a device lives at byte offset `n * block_size` of its image. Reading past the end
/// of an image yields zeros; writing past it grows the image.
#[derive(Default)]
pub struct File {
    devices: RwLock<HashMap<u32, fs::File>>,
}

impl File {
    /// Open (creating if necessary) the image at `path` as `device`.
    pub fn open(device: u32, path: impl AsRef<Path>) -> Result<Self, Error> {
        let disk = Self::default();
        disk.attach(device, path)?;
        Ok(disk)
    }

    /// Open (creating if necessary) the image at `path` as `device`, replacing any image
    /// previously attached as `device`.
    pub fn attach(&self, device: u32, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        debug!(device, path = %path.display(), "attached image");
        self.devices.write().unwrap().insert(device, file);
        Ok(())
    }

    /// Flush all attached images to stable storage.
    pub fn sync(&self) -> Result<(), Error> {
        for file in self.devices.read().unwrap().values() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn offset(block: BlockId, len: usize) -> Result<u64, Error> {
        u64::from(block.number)
            .checked_mul(len as u64)
            .ok_or(Error::OffsetOverflow)
    }
}

impl Disk for File {
    fn read(&self, block: BlockId, buf: &mut [u8]) -> Result<(), Error> {
        let offset = Self::offset(block, buf.len())?;
        let devices = self.devices.read().unwrap();
        let file = devices
            .get(&block.device)
            .ok_or(Error::DeviceMissing(block.device))?;

        let mut filled = 0;
        while filled < buf.len() {
            match read_at(file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    fn write(&self, block: BlockId, buf: &[u8]) -> Result<(), Error> {
        let offset = Self::offset(block, buf.len())?;
        let devices = self.devices.read().unwrap();
        let file = devices
            .get(&block.device)
            .ok_or(Error::DeviceMissing(block.device))?;

        let mut written = 0;
        while written < buf.len() {
            match write_at(file, &buf[written..], offset + written as u64) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn read_at(file: &fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(unix)]
fn write_at(file: &fs::File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(windows)]
fn write_at(file: &fs::File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::{env, path::PathBuf};

    fn image_path() -> PathBuf {
        let name = format!("bcache_file_{}.img", rand::thread_rng().gen::<u64>());
        env::temp_dir().join(name)
    }

    #[test]
    fn test_file_read_write() {
        let path = image_path();
        let disk = File::open(1, &path).unwrap();

        // Write block 3 and read it back
        disk.write(BlockId::new(1, 3), &[9u8; 64]).unwrap();
        let mut buf = [0u8; 64];
        disk.read(BlockId::new(1, 3), &mut buf).unwrap();
        assert_eq!(buf, [9u8; 64]);

        // The hole before it and the space after it read as zeros
        buf.fill(1);
        disk.read(BlockId::new(1, 0), &mut buf).unwrap();
        assert_eq!(buf, [0u8; 64]);
        buf.fill(1);
        disk.read(BlockId::new(1, 100), &mut buf).unwrap();
        assert_eq!(buf, [0u8; 64]);
        assert_eq!(fs::metadata(&path).unwrap().len(), 4 * 64);

        // Reopen and confirm the data persisted
        disk.sync().unwrap();
        drop(disk);
        let disk = File::open(1, &path).unwrap();
        disk.read(BlockId::new(1, 3), &mut buf).unwrap();
        assert_eq!(buf, [9u8; 64]);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_file_devices_are_isolated() {
        let first = image_path();
        let second = image_path();
        let disk = File::open(0, &first).unwrap();
        disk.attach(1, &second).unwrap();

        disk.write(BlockId::new(0, 2), &[1u8; 32]).unwrap();
        disk.write(BlockId::new(1, 2), &[2u8; 32]).unwrap();

        let mut buf = [0u8; 32];
        disk.read(BlockId::new(0, 2), &mut buf).unwrap();
        assert_eq!(buf, [1u8; 32]);
        disk.read(BlockId::new(1, 2), &mut buf).unwrap();
        assert_eq!(buf, [2u8; 32]);

        // Unknown devices are rejected
        assert!(matches!(
            disk.read(BlockId::new(5, 0), &mut buf),
            Err(Error::DeviceMissing(5))
        ));
        assert!(matches!(
            disk.write(BlockId::new(5, 0), &buf),
            Err(Error::DeviceMissing(5))
        ));

        fs::remove_file(first).unwrap();
        fs::remove_file(second).unwrap();
    }
}
