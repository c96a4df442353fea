//! Interrupt Descriptor Table setup.
//!
//! The kernel runs entirely in ring 0, so every vector is a 32-bit
//! interrupt gate in the kernel code segment. Vectors start out pointing
//! at a stub that reports the vector class and halts; the context switcher
//! installs the real syscall/timer/keyboard entries over it.

use core::arch::asm;
use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch;

const IDT_ENTRIES: usize = 256;

/// Present, ring 0, 32-bit interrupt gate.
const GATE_FLAGS: u32 = 0x8E00;

#[derive(Clone, Copy)]
#[repr(C)]
struct IdtEntry {
    low: u32,
    high: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self { low: 0, high: 0 }
    }

    fn interrupt_gate(handler: usize, selector: u16) -> Self {
        let offset = handler as u32;
        Self {
            low: ((selector as u32) << 16) | (offset & 0xFFFF),
            high: (offset & 0xFFFF_0000) | GATE_FLAGS,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

lazy_static! {
    // The table is 2 KiB; lazy_static keeps it off the boot stack and
    // gives it the stable address lidt needs.
    static ref IDT: Mutex<[IdtEntry; IDT_ENTRIES]> =
        Mutex::new([IdtEntry::missing(); IDT_ENTRIES]);
}

extern "C" {
    fn __unexpected_trap_entry();
}

core::arch::global_asm!(
    r#"
    .globl __unexpected_trap_entry
__unexpected_trap_entry:
    cli
    call {report}
1:  hlt
    jmp 1b
"#,
    report = sym report_unexpected_trap,
);

extern "C" fn report_unexpected_trap() {
    crate::kfatal!("Unexpected trap with no registered handler; halting");
}

/// Point every vector at the halt stub and load the table.
pub fn init() {
    let selector = arch::code_segment();
    let mut idt = IDT.lock();
    for entry in idt.iter_mut() {
        *entry = IdtEntry::interrupt_gate(__unexpected_trap_entry as usize, selector);
    }
    load(&idt);
    crate::kinfo!("IDT loaded with {} vectors", IDT_ENTRIES);
}

/// Install `handler` as the entry point for `vector`.
pub fn set_evec(vector: u8, handler: usize) {
    let selector = arch::code_segment();
    IDT.lock()[vector as usize] = IdtEntry::interrupt_gate(handler, selector);
}

fn load(table: &[IdtEntry; IDT_ENTRIES]) {
    let pointer = IdtPointer {
        limit: (IDT_ENTRIES * size_of::<IdtEntry>() - 1) as u16,
        base: table.as_ptr() as u32,
    };
    unsafe {
        asm!(
            "lidt [{0}]",
            in(reg) &pointer as *const IdtPointer,
            options(nostack, preserves_flags)
        );
    }
}
