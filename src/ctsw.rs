//! Rust side of the context switch.
//!
//! The assembly stubs in `arch/entry.S` own the actual register
//! choreography; this module installs them in the IDT and wraps the raw
//! switch in a typed interface: hand it the current PCB, get back the raw
//! request tag that brought control into the kernel.

use crate::arch::idt::set_evec;
use crate::pcb::Pcb;
use crate::syscall::{Request, KEYBOARD_INT_NUM, SYSCALL_INT_NUM, TIMER_INT_NUM};

/// Shared with `__ctsw_switch`; field order and sizes are fixed by the
/// assembly.
#[repr(C)]
struct SwitchRecord {
    esp: usize,
    eax: u32,
    edx: u32,
    trigger: u32,
}

const TRIGGER_SYSCALL: u32 = 0;
const TRIGGER_TIMER: u32 = 1;
const TRIGGER_KEYBOARD: u32 = 2;

extern "C" {
    fn __ctsw_switch(record: *mut SwitchRecord);
    fn __syscall_entry();
    fn __timer_entry();
    fn __keyboard_entry();
}

/// Install the interrupt entry points.
pub fn init() {
    set_evec(SYSCALL_INT_NUM, __syscall_entry as usize);
    set_evec(TIMER_INT_NUM, __timer_entry as usize);
    set_evec(KEYBOARD_INT_NUM, __keyboard_entry as usize);
    crate::kinfo!("Context switcher initialized");
}

/// Resume `pcb` and run it until the next syscall or interrupt. The PCB's
/// saved `ret` is patched into its context frame on the way out; on the
/// way back in, its stack pointer, interrupted `eax`, and argument
/// pointer are recorded. Returns the raw request tag.
pub fn context_switch(pcb: &mut Pcb) -> u32 {
    let mut record = SwitchRecord {
        esp: pcb.esp,
        eax: pcb.ret as u32,
        edx: 0,
        trigger: 0,
    };
    unsafe { __ctsw_switch(&mut record) };

    pcb.esp = record.esp;
    // Preserve the interrupted eax; syscall handlers overwrite this with
    // their result.
    pcb.ret = record.eax as i32;

    match record.trigger {
        TRIGGER_SYSCALL => {
            pcb.args = record.edx as usize;
            record.eax
        }
        TRIGGER_TIMER => Request::TimerInt as u32,
        TRIGGER_KEYBOARD => Request::KeyboardInt as u32,
        trigger => {
            crate::kfatal!("Unknown context switch trigger {}; halting", trigger);
            crate::arch::halt_loop();
        }
    }
}
