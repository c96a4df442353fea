#![no_std]
#![no_main]

use core::panic::PanicInfo;

use kestrel_os::{kernel_main, kfatal};

const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BADB002;

/// Leading fields of the Multiboot v1 info record. Only the memory sizes
/// are consumed; `mem_upper` is the number of KiB above 1 MiB.
#[repr(C)]
struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
}

const MULTIBOOT_INFO_MEMORY: u32 = 1 << 0;

extern "C" {
    static __kernel_end: u8;
}

#[no_mangle]
pub extern "C" fn kmain(magic: u32, info: *const MultibootInfo) -> ! {
    if magic != MULTIBOOT_BOOTLOADER_MAGIC {
        kfatal!("Invalid Multiboot magic value: {:#x}", magic);
        kestrel_os::arch::halt_loop();
    }

    let info = unsafe { &*info };
    if info.flags & MULTIBOOT_INFO_MEMORY == 0 {
        kfatal!("Bootloader provided no memory information");
        kestrel_os::arch::halt_loop();
    }

    let freemem = unsafe { &__kernel_end as *const u8 as usize };
    let maxaddr = 0x10_0000 + info.mem_upper as usize * 1024;

    kernel_main(freemem, maxaddr)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kestrel_os::panic(info)
}
