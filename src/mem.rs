//! Kernel heap: a first-fit, address-ordered free list with coalescing.
//!
//! The heap manages the RAM left over after the kernel image, split around
//! the BIOS hole when `freemem` lies below it: `[align16(freemem),
//! hole_start)` and `[hole_end, align16_down(maxaddr))`. Every chunk starts
//! with a header whose `size` includes the header itself; a live chunk's
//! `sanity` field points at its own data so `free` can reject pointers the
//! allocator never handed out.
//!
//! The allocator is a plain struct over a [`MemoryMap`] so the host test
//! suite can run it over synthetic regions; the kernel wraps a single
//! instance in the `KHEAP` static.

use core::mem::size_of;
use core::ptr::{self, NonNull};

use spin::Mutex;

pub const PARAGRAPH_SIZE: usize = 16;
pub const HOLE_START: usize = 0xA0000;
pub const HOLE_END: usize = 0x100000;

/// Bytes reserved for the kernel stack directly below `freemem`.
pub const KERNEL_STACK: usize = 16384;

/// Physical-memory layout consumed from the boot collaborator.
#[derive(Clone, Copy, Debug)]
pub struct MemoryMap {
    pub freemem: usize,
    pub hole_start: usize,
    pub hole_end: usize,
    pub maxaddr: usize,
    pub kernel_stack: usize,
}

impl MemoryMap {
    pub const fn pc(freemem: usize, maxaddr: usize) -> Self {
        Self {
            freemem,
            hole_start: HOLE_START,
            hole_end: HOLE_END,
            maxaddr,
            kernel_stack: KERNEL_STACK,
        }
    }

    /// Check a pointer handed across the syscall boundary: the range must
    /// be non-empty, stay below `maxaddr`, and avoid both the BIOS hole
    /// and the reserved kernel stack region below `freemem`.
    pub fn verify_sysptr(&self, addr: usize, len: usize) -> bool {
        if len == 0 || addr == 0 {
            return false;
        }
        let end = match addr.checked_add(len - 1) {
            Some(end) => end,
            None => return false,
        };
        if end > self.maxaddr {
            return false;
        }
        if addr < self.hole_end && end >= self.hole_start {
            return false;
        }
        let stack_base = self.freemem.saturating_sub(self.kernel_stack);
        if addr < self.freemem && end >= stack_base {
            return false;
        }
        true
    }
}

#[repr(C)]
struct MemHeader {
    size: usize,
    prev: *mut MemHeader,
    next: *mut MemHeader,
    sanity: *mut u8,
}

const HEADER_SIZE: usize = size_of::<MemHeader>();

fn align_to_paragraph(addr: usize) -> usize {
    (addr + PARAGRAPH_SIZE - 1) & !(PARAGRAPH_SIZE - 1)
}

unsafe fn data_start(header: *mut MemHeader) -> *mut u8 {
    (header as *mut u8).add(HEADER_SIZE)
}

pub struct FreeList {
    head: *mut MemHeader,
    map: MemoryMap,
}

// Only ever reached through the KHEAP mutex (or owned outright in tests).
unsafe impl Send for FreeList {}

impl FreeList {
    /// Build the free list over the map's usable regions.
    ///
    /// # Safety
    /// The regions described by `map` must be unused RAM owned by the
    /// caller for the lifetime of the allocator.
    pub unsafe fn init(map: MemoryMap) -> Self {
        let mut list = Self {
            head: ptr::null_mut(),
            map,
        };

        let top = map.maxaddr & !(PARAGRAPH_SIZE - 1);
        if map.freemem < map.hole_start {
            let start = align_to_paragraph(map.freemem);
            list.seed_region(start, map.hole_start - start);
            list.seed_region(map.hole_end, top - map.hole_end);
        } else {
            // Image loaded above the hole: one region past the image.
            let start = align_to_paragraph(map.freemem);
            list.seed_region(start, top.saturating_sub(start));
        }
        list
    }

    unsafe fn seed_region(&mut self, start: usize, size: usize) {
        if size <= HEADER_SIZE {
            return;
        }
        let header = start as *mut MemHeader;
        (*header).size = size;
        (*header).prev = ptr::null_mut();
        (*header).next = ptr::null_mut();
        (*header).sanity = ptr::null_mut();
        self.insert_sorted(header);
    }

    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    /// Total free bytes, headers included.
    pub fn free_bytes(&self) -> usize {
        let mut total = 0;
        let mut curr = self.head;
        while !curr.is_null() {
            unsafe {
                total += (*curr).size;
                curr = (*curr).next;
            }
        }
        total
    }

    /// First-fit allocation of at least `size` bytes, rounded up to a
    /// paragraph. Returns the chunk's data pointer.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let required = align_to_paragraph(size) + HEADER_SIZE;

        let mut curr = self.head;
        while !curr.is_null() {
            unsafe {
                if required <= (*curr).size {
                    // Split only when the tail is big enough to stand on
                    // its own as a free chunk.
                    if (*curr).size > required + HEADER_SIZE {
                        let leftover = (curr as *mut u8).add(required) as *mut MemHeader;
                        (*leftover).size = (*curr).size - required;
                        (*leftover).sanity = ptr::null_mut();
                        (*leftover).prev = curr;
                        (*leftover).next = (*curr).next;
                        if !(*curr).next.is_null() {
                            (*(*curr).next).prev = leftover;
                        }
                        (*curr).next = leftover;
                        (*curr).size = required;
                    }

                    self.unlink(curr);
                    (*curr).sanity = data_start(curr);
                    return NonNull::new(data_start(curr));
                }
                curr = (*curr).next;
            }
        }

        crate::kwarn!("kmalloc unable to satisfy request for {} bytes", size);
        None
    }

    /// Return a chunk to the free list, coalescing with its address
    /// neighbours. A pointer that fails the sanity check is ignored.
    pub fn free(&mut self, ptr: NonNull<u8>) -> bool {
        let node = unsafe { (ptr.as_ptr()).sub(HEADER_SIZE) } as *mut MemHeader;
        unsafe {
            if (*node).sanity != ptr.as_ptr() {
                crate::kdebug!("kfree rejecting unknown pointer {:p}", ptr);
                return false;
            }
            (*node).sanity = ptr::null_mut();
            self.insert_sorted(node);
            let next = (*node).next;
            self.coalesce(node, next);
            let prev = (*node).prev;
            self.coalesce(prev, node);
        }
        true
    }

    unsafe fn unlink(&mut self, node: *mut MemHeader) {
        if !(*node).prev.is_null() {
            (*(*node).prev).next = (*node).next;
        } else {
            self.head = (*node).next;
        }
        if !(*node).next.is_null() {
            (*(*node).next).prev = (*node).prev;
        }
        (*node).prev = ptr::null_mut();
        (*node).next = ptr::null_mut();
    }

    unsafe fn insert_sorted(&mut self, node: *mut MemHeader) {
        let mut prev: *mut MemHeader = ptr::null_mut();
        let mut next = self.head;
        while !next.is_null() && next < node {
            prev = next;
            next = (*next).next;
        }

        (*node).prev = prev;
        (*node).next = next;
        if !prev.is_null() {
            (*prev).next = node;
        } else {
            self.head = node;
        }
        if !next.is_null() {
            (*next).prev = node;
        }
    }

    /// Merge `second` into `first` when the two chunks are contiguous.
    unsafe fn coalesce(&mut self, first: *mut MemHeader, second: *mut MemHeader) {
        if first.is_null() || second.is_null() {
            return;
        }
        if (first as usize) + (*first).size != second as usize {
            return;
        }
        (*first).size += (*second).size;
        (*first).next = (*second).next;
        if !(*second).next.is_null() {
            (*(*second).next).prev = first;
        }
    }

    /// Log the free list at debug level.
    pub fn dump(&self) {
        let mut curr = self.head;
        while !curr.is_null() {
            unsafe {
                crate::kdebug!("free chunk at {:#x}, {} bytes", curr as usize, (*curr).size);
                curr = (*curr).next;
            }
        }
    }
}

static KHEAP: Mutex<Option<FreeList>> = Mutex::new(None);

/// Hand the usable RAM described by `map` to the kernel heap.
pub fn init_with_map(map: MemoryMap) {
    let list = unsafe { FreeList::init(map) };
    let free = list.free_bytes();
    *KHEAP.lock() = Some(list);
    crate::kinfo!("Kernel heap initialized, {} bytes free", free);
}

pub fn init(freemem: usize, maxaddr: usize) {
    init_with_map(MemoryMap::pc(freemem, maxaddr));
}

pub fn kmalloc(size: usize) -> Option<NonNull<u8>> {
    KHEAP.lock().as_mut()?.alloc(size)
}

pub fn kfree(ptr: NonNull<u8>) -> bool {
    match KHEAP.lock().as_mut() {
        Some(heap) => heap.free(ptr),
        None => false,
    }
}

pub fn verify_sysptr(addr: usize, len: usize) -> bool {
    KHEAP
        .lock()
        .as_ref()
        .map_or(false, |heap| heap.map.verify_sysptr(addr, len))
}

pub fn memory_map() -> Option<MemoryMap> {
    KHEAP.lock().as_ref().map(|heap| heap.map)
}

pub fn heap_free_bytes() -> usize {
    KHEAP.lock().as_ref().map_or(0, FreeList::free_bytes)
}

pub fn mem_dump() {
    if let Some(heap) = KHEAP.lock().as_ref() {
        heap.dump();
    }
}
