//! Filesystem integration tests: format a RAM-backed block device, mount
//! it as the VFS root, and exercise directory creation, lookup, and the
//! open/read/seek path against a running kernel.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;
use core::panic::PanicInfo;

use spin::Mutex;

use nova_kernel::error::KernelResult;
use nova_kernel::fs::blockdev::BlockDevice;
use nova_kernel::fs::{self, blockdev, blockfs, OpenFlags};
use nova_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[path = "common/mod.rs"]
mod common;

const DEVICE_NAME: &str = "test-disk";
const BLOCK_COUNT: u64 = 256;

struct RamDisk {
    blocks: Mutex<alloc::vec::Vec<u8>>,
    block_count: u64,
}

impl RamDisk {
    fn new(block_count: u64) -> Self {
        Self {
            blocks: Mutex::new(vec![0u8; (block_count as usize) * blockfs::BLOCK_SIZE]),
            block_count,
        }
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        blockfs::BLOCK_SIZE
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&self, index: u64, buf: &mut [u8]) -> KernelResult<()> {
        let blocks = self.blocks.lock();
        let start = index as usize * blockfs::BLOCK_SIZE;
        buf.copy_from_slice(&blocks[start..start + blockfs::BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, index: u64, data: &[u8]) -> KernelResult<()> {
        let mut blocks = self.blocks.lock();
        let start = index as usize * blockfs::BLOCK_SIZE;
        blocks[start..start + blockfs::BLOCK_SIZE].copy_from_slice(data);
        Ok(())
    }
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Filesystem");

    blockdev::register(DEVICE_NAME, Box::new(RamDisk::new(BLOCK_COUNT)));
    blockfs::format(DEVICE_NAME).expect("format");
    let root_fs = blockfs::create(DEVICE_NAME).expect("mount");
    fs::mount("/", root_fs).expect("vfs mount");

    test_root_is_a_directory();
    test_mkdir_then_resolve();
    test_readdir_lists_created_entry();
    test_write_is_unimplemented();

    serial_println!("All filesystem tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_root_is_a_directory() {
    let root = fs::resolve("/").expect("root resolves");
    assert_eq!(root.node_type, fs::NodeType::Directory);
    serial_println!("test_root_is_a_directory...[ok]");
}

fn test_mkdir_then_resolve() {
    fs::mkdir("/", "etc").expect("mkdir");
    let node = fs::resolve("/etc").expect("resolves after mkdir");
    assert_eq!(node.node_type, fs::NodeType::Directory);
    assert_eq!(node.name, "etc");
    serial_println!("test_mkdir_then_resolve...[ok]");
}

fn test_readdir_lists_created_entry() {
    let entries = fs::readdir("/").expect("readdir root");
    assert!(entries.iter().any(|e| e.name == "etc"));
    serial_println!("test_readdir_lists_created_entry...[ok]");
}

fn test_write_is_unimplemented() {
    let fd = fs::open("/etc", OpenFlags::read_only()).expect("open directory");
    let result = fs::write(fd, b"hello");
    assert!(result.is_err());
    fs::close(fd).expect("close");
    serial_println!("test_write_is_unimplemented...[ok]");
}
