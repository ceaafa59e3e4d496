extern crate alloc;
use alloc::vec::Vec;

use super::LogBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The log was read before it was created
    NotFound,
}

/// RAM-only log backend for the simulator and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    data: Option<Vec<u8>>,
}

impl MemoryBackend {
    /// A backend whose log does not exist yet.
    pub const fn new() -> Self {
        Self { data: None }
    }

    /// A backend pre-loaded with raw log contents.
    pub fn with_contents(bytes: &[u8]) -> Self {
        Self {
            data: Some(bytes.to_vec()),
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn contents(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }
}

impl LogBackend for MemoryBackend {
    type Error = MemoryError;

    fn ensure_exists(&mut self) -> Result<(), Self::Error> {
        self.data.get_or_insert_with(Vec::new);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.data
            .get_or_insert_with(Vec::new)
            .extend_from_slice(bytes);
        Ok(())
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> Result<(), Self::Error> {
        let data = self.data.as_ref().ok_or(MemoryError::NotFound)?;
        buf.clear();
        buf.extend_from_slice(data);
        Ok(())
    }

    fn replace(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.data = Some(bytes.to_vec());
        Ok(())
    }
}
