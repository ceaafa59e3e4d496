use embedded_sdmmc::{Mode, SdCard, SdCardError, TimeSource, VolumeIdx, VolumeManager};

extern crate alloc;
use alloc::vec::Vec;

use super::LogBackend;

/// Size of the chunks the log is read back in; one SD block.
const READ_CHUNK: usize = 512;

pub type SdError = embedded_sdmmc::Error<SdCardError>;

/// Log file on the first FAT volume of an SD card.
///
/// These operations are blocking. Every call opens the volume, the root
/// directory and the file, and closes all three before returning, so the
/// directory entry (and with it the file length) is on the card once a call
/// succeeds.
pub struct SdCardBackend<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
    file_name: &'static str,
}

impl<S, D, T> SdCardBackend<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    /// Wrap an SD card; `file_name` must be a FAT 8.3 name.
    pub fn new(sd_card: SdCard<S, D>, ts: T, file_name: &'static str) -> Self {
        let volume_mgr = VolumeManager::new(sd_card, ts);

        Self {
            volume_mgr,
            file_name,
        }
    }

    fn with_file<R>(
        &self,
        mode: Mode,
        op: impl FnOnce(&embedded_sdmmc::File<'_, SdCard<S, D>, T, 4, 4, 1>) -> Result<R, SdError>,
    ) -> Result<R, SdError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(self.file_name, mode)?;

        let result = op(&file);

        // Close explicitly so errors while writing back the directory entry
        // are reported instead of lost in Drop.
        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        result
    }
}

impl<S, D, T> LogBackend for SdCardBackend<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    type Error = SdError;

    fn ensure_exists(&mut self) -> Result<(), Self::Error> {
        self.with_file(Mode::ReadWriteCreateOrAppend, |_| Ok(()))
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.with_file(Mode::ReadWriteCreateOrAppend, |file| file.write(bytes))
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> Result<(), Self::Error> {
        buf.clear();
        self.with_file(Mode::ReadOnly, |file| {
            let mut chunk = [0u8; READ_CHUNK];
            while !file.is_eof() {
                let bytes_read = file.read(&mut chunk)?;
                if bytes_read == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..bytes_read]);
            }
            Ok(())
        })
    }

    fn replace(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.with_file(Mode::ReadWriteCreateOrTruncate, |file| file.write(bytes))
    }
}
