//! Signals: per-process handler tables, pending/in-flight masks, priority
//! delivery through a trampoline frame on the process stack, and the
//! sigreturn path back out of it.
//!
//! A signal's priority is its slot index; higher wins. Slot 31 (`KILL`) is
//! pre-installed with the kernel stop stub and cannot be replaced.
//! Delivery happens on the dispatcher's way back into a process: the
//! pending bit moves to the in-flight mask and the process resumes inside
//! the trampoline, which runs the handler and then issues `sigreturn`.
//! A higher-priority signal may preempt a running handler; an equal or
//! lower one stays pending until the handler returns.

use crate::pcb::{BlockedStatus, Pcb, PcbTable, ProcState, SIGNAL_TABLE_SIZE};
use crate::process::{init_context_frame, ContextFrame};
use crate::sleep::SleepQueue;
use crate::syscall::{BLOCKED_PROC_SIGNALED, SYSKILL_SIG_INVALID};

/// Signal handlers run with the trampoline context word as their argument.
pub type SigHandler = extern "C" fn(usize);

pub const KILL_SIGNAL_NUM: i32 = SIGNAL_TABLE_SIZE as i32 - 1;

/// Placeholder return address under the trampoline frame; never used.
pub const SENTINEL_RETURN_ADDR: u32 = 0x0BAD_A555;

/// Runs in process context with the interrupted context word on the
/// stack: invoke the handler, then ask the kernel to restore the
/// interrupted context.
pub extern "C" fn sigtramp(handler: SigHandler, cntx: usize) {
    handler(cntx);
    crate::syscall::syssigreturn(cntx);
}

/// Kill-signal handler seeded into slot 31 of every new process.
pub extern "C" fn sigkill_stub(_cntx: usize) {
    crate::syscall::sysstop();
}

fn highest_bit(mask: u32) -> Option<i32> {
    if mask == 0 {
        None
    } else {
        Some(31 - mask.leading_zeros() as i32)
    }
}

/// Mark `signal` pending on the process in `idx`, waking it if the signal
/// interrupts a blocking syscall. A signal with no installed handler is
/// dropped silently.
///
/// Returns 0, or −561 for an out-of-range signal number.
pub fn raise(pcbs: &mut PcbTable, sleepq: &mut SleepQueue, idx: usize, signal: i32) -> i32 {
    if !(0..SIGNAL_TABLE_SIZE as i32).contains(&signal) {
        return SYSKILL_SIG_INVALID;
    }
    if pcbs.slots[idx].sig_handlers[signal as usize].is_none() {
        return 0;
    }

    pcbs.slots[idx].sig_pending |= 1 << signal;

    if pcbs.slots[idx].state == ProcState::Blocked {
        match pcbs.slots[idx].blocked_status {
            BlockedStatus::Sleep => {
                sleepq.cancel(pcbs, idx);
            }
            BlockedStatus::Send | BlockedStatus::Recv | BlockedStatus::Wait => {
                pcbs.slots[idx].ret = BLOCKED_PROC_SIGNALED;
                pcbs.slots[idx].xfer = None;
                pcbs.blocked.remove(&mut pcbs.slots, idx);
                pcbs.slots[idx].blocked_id = 0;
                pcbs.make_ready(idx);
            }
            status => {
                panic!("signal raised against process blocked as {:?}", status);
            }
        }
    }

    0
}

/// True when the highest pending signal outranks every in-flight handler.
fn deliverable(pcb: &Pcb) -> Option<i32> {
    let pending = highest_bit(pcb.sig_pending)?;
    match highest_bit(pcb.sig_inflight) {
        Some(inflight) if pending <= inflight => None,
        _ => Some(pending),
    }
}

/// Deliver the highest-priority pending signal, if any outranks the
/// in-flight handlers. Called by the dispatcher immediately before
/// resuming the process, so `pcb.esp` addresses its saved context frame.
pub fn deliver_pending(pcb: &mut Pcb) {
    let signal = match deliverable(pcb) {
        Some(signal) => signal,
        None => return,
    };
    pcb.sig_pending &= !(1 << signal);

    let handler = match pcb.sig_handlers[signal as usize] {
        Some(handler) => handler,
        // Handler uninstalled after the bit was raised; nothing to run.
        None => return,
    };

    pcb.sig_inflight |= 1 << signal;
    unsafe {
        pcb.esp = build_handler_frame(pcb.esp, pcb.ret, handler as usize, sigtramp as usize);
    }
}

/// Lay out the trampoline frame below `esp` and return the new stack
/// pointer. Frame, from high to low:
///
/// ```text
///   esp -  4   saved return value (restored by sigreturn)
///   esp -  8   interrupted esp (the trampoline's context argument)
///   esp - 12   handler address (the trampoline's handler argument)
///   esp - 16   sentinel return address
///   below      fresh context frame resuming at the trampoline
/// ```
///
/// # Safety
/// `esp` must point into writable process stack with room for the frame.
pub unsafe fn build_handler_frame(esp: usize, ret: i32, handler: usize, trampoline: usize) -> usize {
    let mut sp = esp;
    push_word(&mut sp, ret as u32);
    push_word(&mut sp, esp as u32);
    push_word(&mut sp, handler as u32);
    push_word(&mut sp, SENTINEL_RETURN_ADDR);

    sp -= core::mem::size_of::<ContextFrame>();
    init_context_frame(sp as *mut ContextFrame, trampoline);
    sp
}

unsafe fn push_word(sp: &mut usize, value: u32) {
    *sp -= core::mem::size_of::<u32>();
    (*sp as *mut u32).write(value);
}

/// Unwind a finished handler: restore the saved return value and stack
/// pointer, and retire the highest in-flight signal so lower-priority
/// pending signals become deliverable again.
///
/// # Safety
/// `old_sp` must be the context word the trampoline was given.
pub unsafe fn sigreturn(pcb: &mut Pcb, old_sp: usize) {
    pcb.ret = ((old_sp - core::mem::size_of::<u32>()) as *const u32).read() as i32;
    pcb.esp = old_sp;
    if let Some(bit) = highest_bit(pcb.sig_inflight) {
        pcb.sig_inflight &= !(1 << bit);
    }
}
