use crate::error::{Error, Result};

/// Trait for reading memory from a target process.
pub trait ReadMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    fn read_f32(&self, address: u64) -> Result<f32> {
        let bytes = self.read_exact::<4>(address)?;
        Ok(f32::from_le_bytes(bytes))
    }

    fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_exact::<4>(address)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_exact<const N: usize>(&self, address: u64) -> Result<[u8; N]> {
        let bytes = self.read_bytes(address, N)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::MemoryReadFailed {
                address,
                message: format!("short read: expected {} bytes, got {}", N, bytes.len()),
            })
    }
}

/// Trait for writing memory into a target process.
pub trait WriteMemory {
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()>;

    fn write_f32(&self, address: u64, value: f32) -> Result<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }
}

impl<T: ReadMemory + ?Sized> ReadMemory for &T {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(address, size)
    }
}

impl<T: WriteMemory + ?Sized> WriteMemory for &T {
    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(address, bytes)
    }
}
