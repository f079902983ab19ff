//! PIO ATA driver (C13): identifies and reads/writes LBA-28 hard disks on
//! the legacy primary/secondary IDE buses.
//!
//! One `AtaDevice` per detected drive, registered with the block layer
//! under the names `hda`/`hdb` (primary master/slave) and `hdc`/`hdd`
//! (secondary master/slave). Only the data actually needed to back a
//! flat block device is implemented: no DMA, no ATAPI, no 48-bit LBA.

extern crate alloc;

use alloc::boxed::Box;

use spin::Mutex;

use crate::arch::x86_64::port::{inb, inw, outb, outw};
use crate::error::{KernelError, KernelResult};
use crate::fs::blockdev::{self, BlockDevice};

const PRIMARY_IO: u16 = 0x1F0;
const PRIMARY_CONTROL: u16 = 0x3F6;
const SECONDARY_IO: u16 = 0x170;
const SECONDARY_CONTROL: u16 = 0x376;

const REG_DATA: u16 = 0;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DRIVE_HEAD: u16 = 6;
const REG_STATUS: u16 = 7;
const REG_COMMAND: u16 = 7;

const STATUS_ERR: u8 = 1 << 0;
const STATUS_DRQ: u8 = 1 << 3;
const STATUS_RDY: u8 = 1 << 6;
const STATUS_BSY: u8 = 1 << 7;

const CMD_READ_SECTORS: u8 = 0x20;
const CMD_WRITE_SECTORS: u8 = 0x30;
const CMD_FLUSH_CACHE: u8 = 0xE7;
const CMD_IDENTIFY: u8 = 0xEC;

const POLL_LIMIT: u32 = 100_000;
pub const SECTOR_SIZE: usize = 512;

struct AtaPort {
    io_base: u16,
    control_base: u16,
    is_master: bool,
}

impl AtaPort {
    fn reg(&self, offset: u16) -> u16 {
        self.io_base + offset
    }

    unsafe fn wait_while(&self, mask: u8) -> KernelResult<()> {
        for _ in 0..POLL_LIMIT {
            if inb(self.reg(REG_STATUS)) & mask == 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(KernelError::Hardware { device: "ata" })
    }

    unsafe fn wait_until(&self, mask: u8) -> KernelResult<()> {
        for _ in 0..POLL_LIMIT {
            let status = inb(self.reg(REG_STATUS));
            if status & STATUS_ERR != 0 {
                return Err(KernelError::Hardware { device: "ata" });
            }
            if status & mask == mask {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(KernelError::Hardware { device: "ata" })
    }

    unsafe fn select_lba(&self, lba: u32, sector_count: u8) -> KernelResult<()> {
        self.wait_while(STATUS_BSY)?;
        let drive_select = if self.is_master { 0xE0 } else { 0xF0 };
        outb(self.reg(REG_DRIVE_HEAD), drive_select | ((lba >> 24) & 0x0F) as u8);
        outb(self.reg(REG_SECTOR_COUNT), sector_count);
        outb(self.reg(REG_LBA_LOW), lba as u8);
        outb(self.reg(REG_LBA_MID), (lba >> 8) as u8);
        outb(self.reg(REG_LBA_HIGH), (lba >> 16) as u8);
        self.wait_while(STATUS_BSY)
    }

    unsafe fn identify(&self) -> Option<[u16; 256]> {
        outb(self.reg(REG_DRIVE_HEAD), if self.is_master { 0xA0 } else { 0xB0 });
        outb(self.reg(REG_SECTOR_COUNT), 0);
        outb(self.reg(REG_LBA_LOW), 0);
        outb(self.reg(REG_LBA_MID), 0);
        outb(self.reg(REG_LBA_HIGH), 0);
        outb(self.reg(REG_COMMAND), CMD_IDENTIFY);

        if inb(self.reg(REG_STATUS)) == 0 {
            return None; // no drive on this position
        }
        if self.wait_while(STATUS_BSY).is_err() {
            return None;
        }
        if inb(self.reg(REG_LBA_MID)) != 0 || inb(self.reg(REG_LBA_HIGH)) != 0 {
            return None; // not an ATA device (likely ATAPI)
        }
        if self.wait_until(STATUS_DRQ).is_err() {
            return None;
        }

        let mut data = [0u16; 256];
        for word in data.iter_mut() {
            *word = inw(self.reg(REG_DATA));
        }
        Some(data)
    }
}

pub struct AtaDevice {
    port: Mutex<AtaPort>,
    sector_count: u64,
}

impl AtaDevice {
    unsafe fn read_sector(&self, lba: u32, out: &mut [u8]) -> KernelResult<()> {
        let port = self.port.lock();
        port.select_lba(lba, 1)?;
        outb(port.reg(REG_COMMAND), CMD_READ_SECTORS);
        port.wait_until(STATUS_DRQ)?;
        for chunk in out.chunks_mut(2) {
            let word = inw(port.reg(REG_DATA));
            chunk[0] = word as u8;
            if chunk.len() > 1 {
                chunk[1] = (word >> 8) as u8;
            }
        }
        Ok(())
    }

    unsafe fn write_sector(&self, lba: u32, data: &[u8]) -> KernelResult<()> {
        let port = self.port.lock();
        port.select_lba(lba, 1)?;
        outb(port.reg(REG_COMMAND), CMD_WRITE_SECTORS);
        port.wait_until(STATUS_DRQ)?;
        for chunk in data.chunks(2) {
            let lo = chunk[0];
            let hi = if chunk.len() > 1 { chunk[1] } else { 0 };
            outw(port.reg(REG_DATA), (lo as u16) | ((hi as u16) << 8));
        }
        outb(port.reg(REG_COMMAND), CMD_FLUSH_CACHE);
        port.wait_while(STATUS_BSY)
    }
}

impl BlockDevice for AtaDevice {
    fn block_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn block_count(&self) -> u64 {
        self.sector_count
    }

    fn read_block(&self, index: u64, buf: &mut [u8]) -> KernelResult<()> {
        if buf.len() != SECTOR_SIZE || index >= self.sector_count {
            return Err(KernelError::InvalidArgument { what: "ata block index/length" });
        }
        // SAFETY: port I/O confined to this device's own registers, guarded
        // by the port mutex.
        unsafe { self.read_sector(index as u32, buf) }
    }

    fn write_block(&self, index: u64, data: &[u8]) -> KernelResult<()> {
        if data.len() != SECTOR_SIZE || index >= self.sector_count {
            return Err(KernelError::InvalidArgument { what: "ata block index/length" });
        }
        unsafe { self.write_sector(index as u32, data) }
    }
}

fn capacity_in_sectors(identify: &[u16; 256]) -> u64 {
    (identify[60] as u64) | ((identify[61] as u64) << 16)
}

fn probe(io_base: u16, control_base: u16, is_master: bool, name: &'static str) {
    let port = AtaPort { io_base, control_base, is_master };
    // SAFETY: bring-up-only probe of a fixed legacy I/O range.
    let identify = unsafe { port.identify() };
    let Some(identify) = identify else {
        return;
    };
    let sectors = capacity_in_sectors(&identify);
    if sectors == 0 {
        return;
    }
    log::info!("ata: {name} detected, {sectors} sectors ({} MiB)", sectors * SECTOR_SIZE as u64 / (1024 * 1024));
    let device = AtaDevice { port: Mutex::new(port), sector_count: sectors };
    blockdev::register(name, Box::new(device));
}

pub fn init() {
    probe(PRIMARY_IO, PRIMARY_CONTROL, true, "hda");
    probe(PRIMARY_IO, PRIMARY_CONTROL, false, "hdb");
    probe(SECONDARY_IO, SECONDARY_CONTROL, true, "hdc");
    probe(SECONDARY_IO, SECONDARY_CONTROL, false, "hdd");
}
