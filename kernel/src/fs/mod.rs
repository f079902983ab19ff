//! Virtual filesystem (C11): a thin layer over the in-tree `blockfs`
//! filesystem, plus the block-device registry (C12) it reads and writes
//! through.
//!
//! One global file descriptor table, not one per task — per-task tables
//! are a natural extension this design doesn't need yet. `resolve` only
//! ever understands absolute paths walked component-by-component through
//! `blockfs::readdir`; there is no `.`/`..` handling, and any failed
//! lookup along the way fails the whole resolve.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

pub mod blockdev;
pub mod blockfs;

use blockfs::{BlockFs, Inode, InodeType};
use spin::Mutex;

use crate::error::{KernelError, KernelResult};

pub const PATH_MAX: usize = 4096;
pub const MAX_OPEN_FILES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
}

impl From<InodeType> for NodeType {
    fn from(kind: InodeType) -> Self {
        match kind {
            InodeType::Directory => NodeType::Directory,
            _ => NodeType::File,
        }
    }
}

/// VFS node: everything `stat` or a directory walk needs about one inode,
/// without exposing the on-disk layout to callers.
#[derive(Debug, Clone)]
pub struct VfsNode {
    pub name: String,
    pub inode_number: u32,
    pub node_type: NodeType,
    pub size: u32,
    pub mtime: u64,
}

impl VfsNode {
    fn from_inode(name: &str, inode: &Inode) -> Self {
        VfsNode {
            name: name.to_string(),
            inode_number: inode.number,
            node_type: inode.kind.into(),
            size: inode.size,
            mtime: inode.mtime,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    End(i32),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        OpenFlags { read: true, write: false }
    }
}

struct OpenFile {
    inode: Inode,
    offset: u32,
}

struct MountEntry {
    path: String,
    fs: BlockFs,
}

struct VfsState {
    root: Option<BlockFs>,
    mounts: Vec<MountEntry>,
    descriptors: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl VfsState {
    const fn new() -> Self {
        const NONE: Option<OpenFile> = None;
        VfsState { root: None, mounts: Vec::new(), descriptors: [NONE; MAX_OPEN_FILES] }
    }
}

static VFS: Mutex<VfsState> = Mutex::new(VfsState::new());

pub fn init() {
    log::info!("vfs initialized (no root mounted)");
}

/// Mount at `/` becomes the global root. Any other path is recorded in the
/// mount table but is not consulted by `resolve` — traversing across a
/// mount point is a follow-up, not implemented here.
pub fn mount(path: &str, fs: BlockFs) -> KernelResult<()> {
    let mut state = VFS.lock();
    if path == "/" {
        state.root = Some(fs);
        return Ok(());
    }
    state.mounts.push(MountEntry { path: path.to_string(), fs });
    Ok(())
}

pub fn unmount(path: &str) -> KernelResult<()> {
    let mut state = VFS.lock();
    if path == "/" {
        state.root = None;
        return Ok(());
    }
    let before = state.mounts.len();
    state.mounts.retain(|m| m.path != path);
    if state.mounts.len() == before {
        return Err(KernelError::NotFound { what: "mount point" });
    }
    Ok(())
}

fn finddir(fs: &BlockFs, dir: &Inode, name: &str) -> Option<Inode> {
    let mut index = 0u32;
    loop {
        let entry = fs.readdir(dir, index).ok()??;
        if entry.name == name {
            return fs.read_inode(entry.inode).ok();
        }
        index += 1;
    }
}

/// Resolve an absolute path to its inode. Any failure along the walk —
/// missing root, missing component, or a non-directory in the middle —
/// fails the whole resolve; there is no partial result.
pub fn resolve(path: &str) -> Option<VfsNode> {
    if !path.starts_with('/') {
        return None;
    }
    let state = VFS.lock();
    let fs = state.root.as_ref()?;
    let mut current = fs.read_inode(blockfs::ROOT_INODE).ok()?;
    let mut name = "/".to_string();

    for component in path.split('/').filter(|c| !c.is_empty()) {
        if current.kind != InodeType::Directory {
            return None;
        }
        current = finddir(fs, &current, component)?;
        name = component.to_string();
    }
    Some(VfsNode::from_inode(&name, &current))
}

fn resolve_inode(path: &str) -> Option<Inode> {
    if !path.starts_with('/') {
        return None;
    }
    let state = VFS.lock();
    let fs = state.root.as_ref()?;
    let mut current = fs.read_inode(blockfs::ROOT_INODE).ok()?;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if current.kind != InodeType::Directory {
            return None;
        }
        current = finddir(fs, &current, component)?;
    }
    Some(current)
}

pub fn stat(path: &str) -> Option<VfsNode> {
    resolve(path)
}

pub fn readdir(path: &str) -> KernelResult<Vec<VfsNode>> {
    let inode = resolve_inode(path).ok_or(KernelError::NotFound { what: "path" })?;
    let state = VFS.lock();
    let fs = state.root.as_ref().ok_or(KernelError::NotFound { what: "root filesystem" })?;
    let mut out = Vec::new();
    let mut index = 0u32;
    loop {
        match fs.readdir(&inode, index) {
            Ok(Some(entry)) => {
                if let Ok(child) = fs.read_inode(entry.inode) {
                    out.push(VfsNode::from_inode(&entry.name, &child));
                }
                index += 1;
            }
            Ok(None) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

pub fn mkdir(path: &str, name: &str) -> KernelResult<()> {
    let parent = resolve_inode(path).ok_or(KernelError::NotFound { what: "parent directory" })?;
    let state = VFS.lock();
    let fs = state.root.as_ref().ok_or(KernelError::NotFound { what: "root filesystem" })?;
    let child_number = fs.alloc_inode(InodeType::Directory)?;
    let data_block = fs.alloc_block()?;
    let mut child = fs.read_inode(child_number)?;
    child.direct[0] = data_block;
    child.blocks_used = 1;
    fs.write_inode(&child)?;
    fs.add_dir_entry(&parent, &blockfs::DirEntry { inode: child_number, name: name.to_string(), kind: InodeType::Directory })
}

/// Open `path`, allocating a descriptor from the fixed-size global table.
pub fn open(path: &str, flags: OpenFlags) -> KernelResult<usize> {
    let inode = resolve_inode(path).ok_or(KernelError::NotFound { what: "path" })?;
    let mut state = VFS.lock();
    let slot = state.descriptors.iter().position(|d| d.is_none()).ok_or(KernelError::OutOfResources { resource: "file descriptors" })?;
    state.descriptors[slot] = Some(OpenFile { inode, offset: 0 });
    let _ = flags;
    Ok(slot)
}

pub fn close(fd: usize) -> KernelResult<()> {
    let mut state = VFS.lock();
    let slot = state.descriptors.get_mut(fd).ok_or(KernelError::InvalidArgument { what: "fd" })?;
    if slot.is_none() {
        return Err(KernelError::InvalidArgument { what: "fd" });
    }
    *slot = None;
    Ok(())
}

pub fn read(fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
    let mut state = VFS.lock();
    let device = state.root.as_ref().ok_or(KernelError::NotFound { what: "root filesystem" })?.device().to_string();
    let file = state.descriptors.get_mut(fd).and_then(|d| d.as_mut()).ok_or(KernelError::InvalidArgument { what: "fd" })?;
    let fs = blockfs::create(&device).ok_or(KernelError::NotFound { what: "root filesystem" })?;
    let n = fs.read_file(&file.inode, file.offset, buf)?;
    file.offset += n as u32;
    Ok(n)
}

pub fn write(fd: usize, data: &[u8]) -> KernelResult<usize> {
    let mut state = VFS.lock();
    let device = state.root.as_ref().ok_or(KernelError::NotFound { what: "root filesystem" })?.device().to_string();
    let file = state.descriptors.get_mut(fd).and_then(|d| d.as_mut()).ok_or(KernelError::InvalidArgument { what: "fd" })?;
    let fs = blockfs::create(&device).ok_or(KernelError::NotFound { what: "root filesystem" })?;
    fs.write_file(&file.inode, file.offset, data)
}

pub fn seek(fd: usize, from: SeekFrom) -> KernelResult<u32> {
    let mut state = VFS.lock();
    let file = state.descriptors.get_mut(fd).and_then(|d| d.as_mut()).ok_or(KernelError::InvalidArgument { what: "fd" })?;
    let new_offset = match from {
        SeekFrom::Start(pos) => pos as i64,
        SeekFrom::Current(delta) => file.offset as i64 + delta as i64,
        SeekFrom::End(delta) => file.inode.size as i64 + delta as i64,
    };
    if new_offset < 0 {
        return Err(KernelError::InvalidArgument { what: "seek offset" });
    }
    file.offset = new_offset as u32;
    Ok(file.offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::{self, BlockDevice};
    use alloc::boxed::Box;
    use alloc::vec::Vec as StdVec;

    struct RamDisk {
        blocks: Mutex<StdVec<[u8; blockfs::BLOCK_SIZE]>>,
    }

    impl BlockDevice for RamDisk {
        fn block_size(&self) -> usize {
            blockfs::BLOCK_SIZE
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

    /// Formats a fresh device, mounts it as root, and hands back nothing —
    /// callers use the module-level `resolve`/`mkdir`/`readdir` afterward,
    /// exactly as a real bring-up would.
    fn mount_fresh_root(name: &str) {
        blockdev::unregister(name);
        blockdev::register(name, Box::new(RamDisk { blocks: Mutex::new(alloc::vec![[0u8; blockfs::BLOCK_SIZE]; 64]) }));
        blockfs::format(name).unwrap();
        mount("/", blockfs::create(name).unwrap()).unwrap();
    }

    #[test]
    fn resolve_rejects_relative_paths() {
        assert!(resolve("etc").is_none());
    }

    #[test]
    fn resolve_of_root_succeeds_once_mounted() {
        mount_fresh_root("test-vfs-root");
        let root = resolve("/").expect("root resolves");
        assert_eq!(root.node_type, NodeType::Directory);
        unmount("/").unwrap();
        blockdev::unregister("test-vfs-root");
    }

    #[test]
    fn mkdir_then_resolve_finds_new_component() {
        mount_fresh_root("test-vfs-mkdir");
        mkdir("/", "etc").unwrap();
        let node = resolve("/etc").expect("resolves after mkdir");
        assert_eq!(node.name, "etc");
        assert_eq!(node.node_type, NodeType::Directory);
        unmount("/").unwrap();
        blockdev::unregister("test-vfs-mkdir");
    }

    #[test]
    fn resolve_fails_past_a_missing_component() {
        mount_fresh_root("test-vfs-missing");
        assert!(resolve("/does-not-exist/child").is_none());
        unmount("/").unwrap();
        blockdev::unregister("test-vfs-missing");
    }

    #[test]
    fn readdir_lists_every_created_child() {
        mount_fresh_root("test-vfs-readdir");
        mkdir("/", "a").unwrap();
        mkdir("/", "b").unwrap();
        let names: Vec<String> = readdir("/").unwrap().into_iter().map(|n| n.name).collect();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
        unmount("/").unwrap();
        blockdev::unregister("test-vfs-readdir");
    }
}
