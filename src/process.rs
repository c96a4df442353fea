//! Process lifecycle: stack layout, the initial context frame, process
//! creation, the idle process, and teardown.

use core::mem::size_of;
use core::ptr::addr_of_mut;

use crate::mem::{kfree, kmalloc};
use crate::pcb::{
    BlockedStatus, Pcb, PcbTable, ProcState, StackAlloc, DEFAULT_STACK_SIZE, IDLE_STACK_SIZE,
    PCB_MAX_FDS, SIGNAL_TABLE_SIZE,
};
use crate::signal::{sigkill_stub, KILL_SIGNAL_NUM};
use crate::sleep::SleepQueue;
use crate::syscall::{sysstop, CREATE_FAILURE};

/// Saved processor context as laid down by the entry stubs: the pusha
/// block (eax at byte offset 28) followed by the iret frame.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct ContextFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

/// Interrupts enabled, IOPL 3.
pub const STARTING_EFLAGS: u32 = 0x0000_3200;

/// Seed a context frame so that restoring it enters `entry` with empty
/// registers, interrupts enabled, and the stack starting just above the
/// frame.
///
/// # Safety
/// `frame` must point at writable memory with room for a [`ContextFrame`].
pub unsafe fn init_context_frame(frame: *mut ContextFrame, entry: usize) {
    let above = frame.add(1) as u32;
    frame.write(ContextFrame {
        edi: 0,
        esi: 0,
        ebp: above,
        esp: above,
        ebx: 0,
        edx: 0,
        ecx: 0,
        eax: 0,
        eip: entry as u32,
        cs: crate::arch::code_segment() as u32,
        eflags: STARTING_EFLAGS,
    });
}

/// Lay out a fresh process stack: the kernel stop stub as the return
/// address at the very top, the initial context frame directly below it.
/// Returns the initial stack pointer.
unsafe fn seed_stack(base: usize, len: usize, entry: usize) -> usize {
    let stop_slot = base + len - size_of::<u32>();
    (stop_slot as *mut u32).write(sysstop as usize as u32);

    let frame = stop_slot - size_of::<ContextFrame>();
    init_context_frame(frame as *mut ContextFrame, entry);
    frame
}

/// Create a new process running `entry` and enqueue it as ready. Returns
/// the new pid, or −1 when `entry` is null, memory is exhausted, or no PCB
/// slot is free.
pub fn create(pcbs: &mut PcbTable, entry: usize, stack_size: i32) -> i32 {
    if entry == 0 {
        crate::kwarn!("create called with a null entry point");
        return CREATE_FAILURE;
    }

    let stack_len = (stack_size.max(0) as usize).max(DEFAULT_STACK_SIZE);
    let stack = match kmalloc(stack_len) {
        Some(stack) => stack,
        None => return CREATE_FAILURE,
    };

    let idx = match pcbs.get_free_slot() {
        Some(idx) => idx,
        None => {
            crate::kwarn!("create: no free PCB slot");
            kfree(stack);
            return CREATE_FAILURE;
        }
    };

    let pcb = &mut pcbs.slots[idx];
    pcb.blocked_status = BlockedStatus::None;
    pcb.blocked_id = 0;
    pcb.ret = 0;
    pcb.args = 0;
    pcb.cpu_time = 0;
    pcb.xfer = None;
    pcb.sig_pending = 0;
    pcb.sig_inflight = 0;
    pcb.sig_handlers = [None; SIGNAL_TABLE_SIZE];
    pcb.sig_handlers[KILL_SIGNAL_NUM as usize] = Some(sigkill_stub);
    pcb.fds = [None; PCB_MAX_FDS];
    pcb.stack = Some(StackAlloc {
        base: stack,
        len: stack_len,
    });
    pcb.esp = unsafe { seed_stack(stack.as_ptr() as usize, stack_len, entry) };

    let pid = pcb.pid;
    pcbs.make_ready(idx);
    crate::kdebug!("created pid {} in slot {} (stack {} bytes)", pid, idx, stack_len);
    pid as i32
}

static mut IDLE_STACK: [u8; IDLE_STACK_SIZE] = [0; IDLE_STACK_SIZE];

/// The idle process: halt until the next interrupt, forever.
pub extern "C" fn idle_main() {
    loop {
        crate::arch::halt();
    }
}

/// Build the idle process (pid 0). It lives outside the PCB table, on its
/// own static stack, and is only ever selected when the ready queue is
/// empty.
pub fn init_idle() -> Pcb {
    let mut idle = Pcb::new(0);
    idle.pid = 0;
    idle.state = ProcState::Ready;
    idle.esp = unsafe {
        let base = addr_of_mut!(IDLE_STACK) as usize;
        seed_stack(base, IDLE_STACK_SIZE, idle_main as usize)
    };
    idle
}

/// Tear down a process completely: detach it from whichever queue holds
/// it, wake its waiters, free its stack, and recycle the PCB slot.
pub fn cleanup(pcbs: &mut PcbTable, sleepq: &mut SleepQueue, idx: usize) {
    pcbs.ready.remove(&mut pcbs.slots, idx);
    pcbs.blocked.remove(&mut pcbs.slots, idx);
    sleepq.remove(pcbs, idx);

    let pid = pcbs.slots[idx].pid;
    pcbs.unblock_waiters(pid);

    if let Some(stack) = pcbs.slots[idx].stack.take() {
        kfree(stack.base);
    }
    pcbs.release(idx);
    crate::kdebug!("cleaned up pid {} (slot {})", pid, idx);
}
