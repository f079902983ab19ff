//! Task model (C8): task control block and its six-state lifecycle.
//!
//! | From | Event | To |
//! |------|-------|----|
//! | (new) | created | Ready |
//! | Ready | scheduled | Running |
//! | Running | preempted / yields | Ready |
//! | Running | sleeps | Sleeping |
//! | Sleeping | wake tick reached | Ready |
//! | Running | blocks on resource | Blocked |
//! | Blocked | resource available | Ready |
//! | Running | exit | Zombie |
//! | Zombie | reaped | Dead |

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

use crate::arch::x86_64::trap::TrapFrame;
use crate::mm::{frame_allocator, page_table, PageFlags, PhysicalAddress, VirtualAddress};

pub const KERNEL_STACK_SIZE: usize = 16 * 1024;
pub const USER_STACK_SIZE: usize = 16 * 1024;
pub const USER_CODE_SIZE: usize = 16 * 1024;

/// Low-memory user-task virtual layout (resolves the two-revision
/// inconsistency the descriptor-table design calls out): user code starts
/// at 64 MiB, user stack top sits at 128 MiB. Chosen over the 512 GiB
/// second-PML4-slot convention because it needs no extra PDPT entries
/// beyond what a minimal user address space already allocates, and keeps
/// every user address comfortably inside the first PML4 slot.
pub const USER_CODE_BASE: u64 = 64 * 1024 * 1024;
pub const USER_STACK_TOP: u64 = 128 * 1024 * 1024;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 1,
    Low = 2,
    Idle = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Sleeping,
    Blocked,
    Zombie,
    Dead,
}

/// One task control block. Intrusive `prev`/`next` task-id links let the
/// scheduler's ready queue avoid a separate allocation per queue node.
pub struct Task {
    pub id: TaskId,
    pub name: [u8; 32],
    pub priority: Priority,
    pub state: Mutex<TaskState>,
    /// Full register snapshot, valid whenever this task is not the one
    /// currently `Running` (the switch contract in `scheduler.rs` is the
    /// only writer and reader of this field while a task is off-CPU).
    pub frame: Mutex<TrapFrame>,
    pub address_space: PhysicalAddress,
    pub kernel_stack_top: u64,
    pub kernel_stack_base: PhysicalAddress,
    pub is_user: bool,
    pub wake_at_tick: AtomicU64,
    pub total_ticks: AtomicU64,
    pub exit_code: AtomicU32,
}

fn copy_name(name: &str) -> [u8; 32] {
    let mut buf = [0u8; 32];
    let bytes = name.as_bytes();
    let n = bytes.len().min(31);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn alloc_kernel_stack() -> Option<(PhysicalAddress, u64)> {
    const FRAMES: usize = KERNEL_STACK_SIZE / frame_allocator::FRAME_SIZE;
    let base = frame_allocator::alloc_contiguous(FRAMES)?;
    let virt_base = base.to_direct_map().as_u64();
    Some((base, virt_base + KERNEL_STACK_SIZE as u64))
}

impl Task {
    /// Kernel-task construction: a task structure, a 16 KiB kernel stack
    /// (four contiguous frames), a trap frame with `rip = entry`,
    /// `rsp = stack top`, kernel selectors, and interrupts enabled in the
    /// saved flags. Address space is whatever the current kernel top table
    /// is at creation time.
    pub fn new_kernel(entry: u64, name: &str, priority: Priority) -> Option<Task> {
        let (stack_base, stack_top) = alloc_kernel_stack()?;
        let selectors = crate::arch::x86_64::gdt::selectors();

        let mut frame = TrapFrame::default();
        frame.rip = entry;
        frame.rsp = stack_top;
        frame.cs = selectors.kernel_code.0 as u64;
        frame.ss = selectors.kernel_data.0 as u64;
        frame.ds = selectors.kernel_data.0 as u64;
        frame.rflags = 0x202; // IF set, reserved bit 1 set

        Some(Task {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: copy_name(name),
            priority,
            state: Mutex::new(TaskState::Ready),
            frame: Mutex::new(frame),
            address_space: page_table::current_top_table(),
            kernel_stack_top: stack_top,
            kernel_stack_base: stack_base,
            is_user: false,
            wake_at_tick: AtomicU64::new(0),
            total_ticks: AtomicU64::new(0),
            exit_code: AtomicU32::new(0),
        })
    }

    /// User-task construction: task and kernel stack as above, plus a new
    /// address space (inheriting the upper-half kernel mapping), a user
    /// stack and user code region mapped user-accessible in that space, and
    /// `entry_bytes` copied into the user code frames (there is no program
    /// loader yet). Any failure partway releases everything acquired so
    /// far.
    pub fn new_user(entry_bytes: &[u8], name: &str, priority: Priority) -> Option<Task> {
        let (stack_base, stack_top) = alloc_kernel_stack()?;

        let Some(space) = page_table::create_space() else {
            frame_allocator::free_range(stack_base, KERNEL_STACK_SIZE / frame_allocator::FRAME_SIZE);
            return None;
        };

        let prev_space = page_table::current_top_table();
        page_table::switch_to(space);

        let cleanup_on_failure = |stack_base: PhysicalAddress| {
            page_table::switch_to(prev_space);
            page_table::destroy_space(space);
            frame_allocator::free_range(stack_base, KERNEL_STACK_SIZE / frame_allocator::FRAME_SIZE);
        };

        let user_stack_frames = USER_STACK_SIZE / frame_allocator::FRAME_SIZE;
        let Some(user_stack_phys) = frame_allocator::alloc_contiguous(user_stack_frames) else {
            cleanup_on_failure(stack_base);
            return None;
        };
        let user_stack_base_virt = USER_STACK_TOP - USER_STACK_SIZE as u64;
        if page_table::map_range(
            VirtualAddress::new(user_stack_base_virt),
            user_stack_phys,
            user_stack_frames,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
        )
        .is_none()
        {
            cleanup_on_failure(stack_base);
            return None;
        }

        let code_frames = USER_CODE_SIZE / frame_allocator::FRAME_SIZE;
        let Some(user_code_phys) = frame_allocator::alloc_contiguous(code_frames) else {
            cleanup_on_failure(stack_base);
            return None;
        };
        if page_table::map_range(
            VirtualAddress::new(USER_CODE_BASE),
            user_code_phys,
            code_frames,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
        )
        .is_none()
        {
            cleanup_on_failure(stack_base);
            return None;
        }

        // SAFETY: the code region was just mapped present+writable in the
        // address space we're still running under (we switched to it
        // above); copying fewer bytes than USER_CODE_SIZE is in-bounds.
        unsafe {
            let dst = USER_CODE_BASE as *mut u8;
            let len = entry_bytes.len().min(USER_CODE_SIZE);
            core::ptr::copy_nonoverlapping(entry_bytes.as_ptr(), dst, len);
        }

        page_table::switch_to(prev_space);

        let selectors = crate::arch::x86_64::gdt::selectors();
        let mut frame = TrapFrame::default();
        frame.rip = USER_CODE_BASE;
        frame.rsp = USER_STACK_TOP;
        frame.cs = selectors.user_code.0 as u64;
        frame.ss = selectors.user_data.0 as u64;
        frame.ds = selectors.user_data.0 as u64;
        frame.rflags = 0x202;

        Some(Task {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: copy_name(name),
            priority,
            state: Mutex::new(TaskState::Ready),
            frame: Mutex::new(frame),
            address_space: space,
            kernel_stack_top: stack_top,
            kernel_stack_base: stack_base,
            is_user: true,
            wake_at_tick: AtomicU64::new(0),
            total_ticks: AtomicU64::new(0),
            exit_code: AtomicU32::new(0),
        })
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }
}

impl Drop for Task {
    /// Releases every physical resource this control block owns: the
    /// kernel stack always, and — for a user task — every frame backing its
    /// address space (user stack, user code, and the page-table levels
    /// themselves) via `destroy_space`. A kernel task's `address_space` is
    /// the shared kernel top table, never owned by the task, so it is left
    /// alone. Callers (`scheduler::remove`/`reap_if_zombie`) only drop a
    /// task once it is guaranteed off-CPU, so freeing its stack and address
    /// space here is never pulling the rug out from under the running CPU.
    fn drop(&mut self) {
        frame_allocator::free_range(self.kernel_stack_base, KERNEL_STACK_SIZE / frame_allocator::FRAME_SIZE);
        if self.is_user {
            page_table::destroy_space(self.address_space);
        }
    }
}
