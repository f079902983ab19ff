//! Block device abstraction (C12): a named registry of whole-block devices,
//! plus byte-range helpers over them. Only block-aligned offsets and
//! lengths are supported; a misaligned request is rejected rather than
//! serviced through a bounce buffer.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// A device that can only be read and written one whole block at a time.
pub trait BlockDevice: Send + Sync {
    fn block_size(&self) -> usize;
    fn block_count(&self) -> u64;
    fn read_block(&self, index: u64, buf: &mut [u8]) -> KernelResult<()>;
    fn write_block(&self, index: u64, data: &[u8]) -> KernelResult<()>;
}

struct Entry {
    name: String,
    device: Box<dyn BlockDevice>,
}

static REGISTRY: Mutex<Vec<Entry>> = Mutex::new(Vec::new());

pub fn register(name: &str, device: Box<dyn BlockDevice>) {
    REGISTRY.lock().push(Entry { name: String::from(name), device });
}

pub fn unregister(name: &str) {
    REGISTRY.lock().retain(|e| e.name != name);
}

pub fn with_device<R>(name: &str, f: impl FnOnce(&dyn BlockDevice) -> R) -> Option<R> {
    let registry = REGISTRY.lock();
    registry.iter().find(|e| e.name == name).map(|e| f(e.device.as_ref()))
}

/// Read `buf.len()` bytes starting at `byte_offset`. Both must be multiples
/// of the device's block size; anything else returns
/// `KernelError::InvalidArgument` rather than being serviced through a
/// partial-block bounce buffer.
pub fn read_bytes(name: &str, byte_offset: u64, buf: &mut [u8]) -> KernelResult<()> {
    with_device(name, |dev| read_bytes_from(dev, byte_offset, buf))
        .ok_or(KernelError::NotFound { what: "block device" })?
}

fn read_bytes_from(dev: &dyn BlockDevice, byte_offset: u64, buf: &mut [u8]) -> KernelResult<()> {
    let block_size = dev.block_size();
    check_aligned(block_size, byte_offset, buf.len())?;

    let mut block_index = byte_offset / block_size as u64;
    for chunk in buf.chunks_mut(block_size) {
        dev.read_block(block_index, chunk)?;
        block_index += 1;
    }
    Ok(())
}

/// Write `data` starting at `byte_offset`. Both must be multiples of the
/// device's block size.
pub fn write_bytes(name: &str, byte_offset: u64, data: &[u8]) -> KernelResult<()> {
    with_device(name, |dev| write_bytes_to(dev, byte_offset, data))
        .ok_or(KernelError::NotFound { what: "block device" })?
}

fn write_bytes_to(dev: &dyn BlockDevice, byte_offset: u64, data: &[u8]) -> KernelResult<()> {
    let block_size = dev.block_size();
    check_aligned(block_size, byte_offset, data.len())?;

    let mut block_index = byte_offset / block_size as u64;
    for chunk in data.chunks(block_size) {
        dev.write_block(block_index, chunk)?;
        block_index += 1;
    }
    Ok(())
}

fn check_aligned(block_size: usize, byte_offset: u64, len: usize) -> KernelResult<()> {
    if byte_offset % block_size as u64 != 0 || len % block_size != 0 {
        return Err(KernelError::InvalidArgument { what: "misaligned block device access" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex as StdMutex;

    struct RamDisk {
        block_size: usize,
        blocks: StdMutex<Vec<[u8; 512]>>,
    }

    impl BlockDevice for RamDisk {
        fn block_size(&self) -> usize {
            self.block_size
        }
        fn block_count(&self) -> u64 {
            self.blocks.lock().len() as u64
        }
        fn read_block(&self, index: u64, buf: &mut [u8]) -> KernelResult<()> {
            buf.copy_from_slice(&self.blocks.lock()[index as usize]);
            Ok(())
        }
        fn write_block(&self, index: u64, data: &[u8]) -> KernelResult<()> {
            self.blocks.lock()[index as usize].copy_from_slice(data);
            Ok(())
        }
    }

    fn fresh_disk(name: &str) {
        unregister(name);
        register(
            name,
            Box::new(RamDisk { block_size: 512, blocks: StdMutex::new(alloc::vec![[0u8; 512]; 4]) }),
        );
    }

    #[test]
    fn aligned_write_then_read_round_trips() {
        fresh_disk("test-aligned");
        let payload: Vec<u8> = (0u8..=255).collect();
        write_bytes("test-aligned", 512, &payload).unwrap();
        let mut back = alloc::vec![0u8; 256];
        read_bytes("test-aligned", 512, &mut back).unwrap();
        assert_eq!(back, payload);
        unregister("test-aligned");
    }

    #[test]
    fn write_spanning_multiple_blocks_preserves_neighbors() {
        fresh_disk("test-span");
        write_bytes("test-span", 0, &[0xAAu8; 512]).unwrap();
        write_bytes("test-span", 512, &[0xBBu8; 512]).unwrap();
        let mut second = [0u8; 512];
        read_bytes("test-span", 512, &mut second).unwrap();
        assert_eq!(&second[..], &[0xBBu8; 512][..]);
        unregister("test-span");
    }

    #[test]
    fn misaligned_offset_is_rejected() {
        fresh_disk("test-misaligned-offset");
        let mut buf = [0u8; 512];
        assert!(read_bytes("test-misaligned-offset", 10, &mut buf).is_err());
        unregister("test-misaligned-offset");
    }

    #[test]
    fn misaligned_length_is_rejected() {
        fresh_disk("test-misaligned-len");
        assert!(write_bytes("test-misaligned-len", 0, &[0xAAu8; 100]).is_err());
        unregister("test-misaligned-len");
    }
}
