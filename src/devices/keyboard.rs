//! PS/2 keyboard driver.
//!
//! The upper half (open/close/read/ioctl) runs as syscall handlers; the
//! lower half is the interrupt service routine. Decoded characters go
//! straight into waiting readers' buffers when any exist, otherwise into a
//! small circular type-ahead buffer that the next read drains. The EOF
//! character ends the session: the keyboard IRQ line is masked and every
//! waiting reader wakes with whatever it has.

use bitflags::bitflags;
use core::ptr;

use crate::arch::io::inb;
use crate::arch::pic::{set_irq_masked, IRQ_KEYBOARD};
use crate::pcb::{BlockedStatus, PcbTable, ProcState, PCB_TABLE_SIZE};
use crate::syscall::{BLOCKERR, SYSERR};

pub const KEYBOARD_PORT_DATA: u16 = 0x60;
pub const KEYBOARD_PORT_CONTROL: u16 = 0x64;

pub const KEYBOARD_IOCTL_SET_EOF: u32 = 53;
pub const KEYBOARD_IOCTL_DISABLE_ECHO: u32 = 55;
pub const KEYBOARD_IOCTL_ENABLE_ECHO: u32 = 56;

const KBD_DEFAULT_EOF: u8 = 0x04;

const CONTROL_READY_MASK: u8 = 0x01;

/// Circular buffer; one slot is sacrificed to distinguish full from empty.
const TYPEAHEAD_SIZE: usize = 4 + 1;

const SCANCODE_LIMIT: usize = 0x54;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const CAPS_LOCK = 1 << 2;
    }
}

static LOWER: [u8; SCANCODE_LIMIT] = [
    0, 0x1B, b'1', b'2', b'3', b'4', b'5', b'6',
    b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i',
    b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';',
    b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*',
    0, b' ', 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, b'-', 0, 0, 0, b'+', 0,
    0, 0, 0, 0,
];

static UPPER: [u8; SCANCODE_LIMIT] = [
    0, 0x1B, b'!', b'@', b'#', b'$', b'%', b'^',
    b'&', b'*', b'(', b')', b'_', b'+', 0x08, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I',
    b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':',
    b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b'<', b'>', b'?', 0, 0,
    0, b' ', 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, b'7',
    b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1',
    b'2', b'3', b'0', b'.',
];

static CTRL: [u8; SCANCODE_LIMIT] = [
    0, 0x1B, 0, 0, 0, 0, 0, 0x1E,
    0, 0, 0, 0, 0x1F, 0, 0x7F, 0,
    0x11, 0x17, 0x05, 0x12, 0x14, 0x19, 0x15, 0x09,
    0x0F, 0x10, 0x1B, 0x1D, 0x0A, 0, 0x01, 0x13,
    0x04, 0x06, 0x07, 0x08, 0x0A, 0x0B, 0x0C, 0,
    0, 0, 0, 0x1C, 0x1A, 0x18, 0x03, 0x16,
    0x02, 0x0E, 0x0D, 0, 0, 0, 0, 0x10,
    0, b' ', 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0,
];

/// One blocked (or completing) reader. Indexed by PCB slot, so pid
/// recycling cannot collide two processes on one entry.
#[derive(Clone, Copy)]
struct KbdTask {
    buf: *mut u8,
    len: usize,
    count: usize,
    waiting: bool,
}

impl KbdTask {
    const fn idle() -> Self {
        Self {
            buf: ptr::null_mut(),
            len: 0,
            count: 0,
            waiting: false,
        }
    }
}

pub struct Keyboard {
    refcount: u32,
    current_minor: u8,
    eof_seen: bool,
    typeahead: [u8; TYPEAHEAD_SIZE],
    head: usize,
    tail: usize,
    eof_char: u8,
    echo: bool,
    modifiers: Modifiers,
    tasks: [KbdTask; PCB_TABLE_SIZE],
    task_refcount: u32,
}

impl Keyboard {
    pub const fn new() -> Self {
        Self {
            refcount: 0,
            current_minor: 0,
            eof_seen: false,
            typeahead: [0; TYPEAHEAD_SIZE],
            head: 0,
            tail: 0,
            eof_char: KBD_DEFAULT_EOF,
            echo: false,
            modifiers: Modifiers::empty(),
            tasks: [KbdTask::idle(); PCB_TABLE_SIZE],
            task_refcount: 0,
        }
    }

    /// Drain any stale controller state left over from before the kernel
    /// took the IRQ.
    pub fn init(&mut self) {
        inb(KEYBOARD_PORT_DATA);
        inb(KEYBOARD_PORT_CONTROL);
        crate::kinfo!("PS/2 keyboard driver initialized");
    }

    /// Open the device in the mode selected by `minor` (0 = no echo,
    /// 1 = echo). Only one mode may be open at a time; reopening the same
    /// mode is refcounted.
    pub fn open(&mut self, minor: u8) -> Result<(), ()> {
        if self.refcount > 0 {
            if self.current_minor != minor {
                return Err(());
            }
            self.refcount += 1;
            return Ok(());
        }

        self.current_minor = minor;
        self.eof_seen = false;
        self.head = 0;
        self.tail = 0;
        self.modifiers = Modifiers::empty();
        self.eof_char = KBD_DEFAULT_EOF;
        self.echo = minor != 0;
        self.refcount = 1;
        set_irq_masked(IRQ_KEYBOARD, false);
        Ok(())
    }

    pub fn close(&mut self, slot: usize) -> Result<(), ()> {
        if self.refcount == 0 {
            return Err(());
        }
        self.refcount -= 1;
        if self.refcount == 0 {
            set_irq_masked(IRQ_KEYBOARD, true);
        }
        if self.tasks[slot].waiting {
            self.task_refcount -= 1;
            self.tasks[slot].waiting = false;
        }
        Ok(())
    }

    /// Begin a read for the process in `slot`. Buffered type-ahead is
    /// flushed first; the call completes synchronously when that already
    /// satisfies it (buffer filled, newline seen, or EOF reached), and
    /// otherwise parks the reader and returns `BLOCKERR`.
    pub fn read(&mut self, pcbs: &mut PcbTable, slot: usize, buf: *mut u8, len: usize) -> i32 {
        self.task_refcount += 1;
        self.tasks[slot] = KbdTask {
            buf,
            len,
            count: 0,
            waiting: true,
        };

        self.flush_typeahead(pcbs);

        let task = self.tasks[slot];
        if !task.waiting {
            return task.count as i32;
        }
        if self.eof_seen {
            // Stray buffered characters may need several reads to drain,
            // so report the count even after EOF.
            self.tasks[slot].waiting = false;
            self.task_refcount -= 1;
            return task.count as i32;
        }
        BLOCKERR
    }

    /// The keyboard cannot be written.
    pub fn write(&mut self) -> i32 {
        SYSERR
    }

    pub fn ioctl(&mut self, command: u32, arg: u32) -> i32 {
        match command {
            KEYBOARD_IOCTL_SET_EOF => {
                self.eof_char = arg as u8;
                0
            }
            KEYBOARD_IOCTL_DISABLE_ECHO => {
                self.echo = false;
                0
            }
            KEYBOARD_IOCTL_ENABLE_ECHO => {
                self.echo = true;
                0
            }
            _ => SYSERR,
        }
    }

    /// Lower half: take one scancode from the controller and route the
    /// decoded character to a waiting reader or the type-ahead buffer.
    pub fn isr(&mut self, pcbs: &mut PcbTable) {
        let data_present = inb(KEYBOARD_PORT_CONTROL) & CONTROL_READY_MASK != 0;
        let data = inb(KEYBOARD_PORT_DATA);
        if !data_present {
            return;
        }

        let c = self.translate(data);
        if c == 0 {
            return;
        }

        if self.task_refcount > 0 {
            self.deliver(pcbs, c, self.echo);
        } else if (self.head + 1) % TYPEAHEAD_SIZE != self.tail {
            self.typeahead[self.head] = c;
            self.head = (self.head + 1) % TYPEAHEAD_SIZE;
            if self.echo && c != self.eof_char {
                crate::kprint!("{}", c as char);
            }
        }
    }

    /// Decode a scancode against the current modifier state, tracking
    /// make/break codes for shift and ctrl and the caps-lock toggle.
    /// Unmapped codes decode to 0.
    fn translate(&mut self, data: u8) -> u8 {
        let mut c = 0;
        if (data as usize) < SCANCODE_LIMIT {
            c = if self.modifiers.contains(Modifiers::CTRL) {
                CTRL[data as usize]
            } else if self.modifiers.contains(Modifiers::SHIFT)
                != self.modifiers.contains(Modifiers::CAPS_LOCK)
            {
                UPPER[data as usize]
            } else {
                LOWER[data as usize]
            };
        }

        if c == 0 {
            match data {
                0x2A | 0x36 => self.modifiers.insert(Modifiers::SHIFT),
                0xAA | 0xB6 => self.modifiers.remove(Modifiers::SHIFT),
                0x1D => self.modifiers.insert(Modifiers::CTRL),
                0x9D => self.modifiers.remove(Modifiers::CTRL),
                0x3A => self.modifiers.toggle(Modifiers::CAPS_LOCK),
                _ => {}
            }
        }
        c
    }

    /// Move as much buffered type-ahead as possible into waiting readers.
    /// Buffered characters were already echoed when they were typed.
    fn flush_typeahead(&mut self, pcbs: &mut PcbTable) {
        while self.task_refcount > 0 && self.tail != self.head {
            let c = self.typeahead[self.tail];
            self.tail = (self.tail + 1) % TYPEAHEAD_SIZE;
            self.deliver(pcbs, c, false);
        }
    }

    /// Hand one character to every waiting reader, unblocking any that
    /// fill up or see a newline. The EOF character ends the session
    /// instead of being delivered. Each typed character is echoed at most
    /// once, however many readers take it.
    fn deliver(&mut self, pcbs: &mut PcbTable, c: u8, echo: bool) {
        if c == self.eof_char {
            self.handle_eof(pcbs);
            return;
        }
        if echo {
            crate::kprint!("{}", c as char);
        }

        for slot in 0..PCB_TABLE_SIZE {
            if !self.tasks[slot].waiting {
                continue;
            }
            {
                let task = &mut self.tasks[slot];
                unsafe { task.buf.add(task.count).write(c) };
                task.count += 1;
            }
            if self.tasks[slot].count == self.tasks[slot].len || c == b'\n' {
                self.unblock(pcbs, slot);
            }
        }
    }

    /// EOF: mask the keyboard IRQ and wake every waiting reader with its
    /// current count.
    fn handle_eof(&mut self, pcbs: &mut PcbTable) {
        set_irq_masked(IRQ_KEYBOARD, true);
        self.eof_seen = true;
        for slot in 0..PCB_TABLE_SIZE {
            if self.tasks[slot].waiting {
                self.unblock(pcbs, slot);
            }
        }
    }

    fn unblock(&mut self, pcbs: &mut PcbTable, slot: usize) {
        self.task_refcount -= 1;
        self.tasks[slot].waiting = false;
        pcbs.slots[slot].ret = self.tasks[slot].count as i32;

        // A reader completing synchronously inside its own read call is
        // still Running and must not be requeued.
        if pcbs.slots[slot].state == ProcState::Blocked
            && pcbs.slots[slot].blocked_status == BlockedStatus::DeviceIo
        {
            pcbs.make_ready(slot);
        }
    }
}
