//! Device-independent layer: a fixed device table plus the dispatch from
//! per-process file descriptors into drivers.
//!
//! Two logical device numbers select the keyboard driver in echo-off (0)
//! and echo-on (1) mode; the table entry's minor number carries the mode
//! into the driver.

pub mod keyboard;

use crate::pcb::{PcbTable, PCB_MAX_FDS};
use crate::syscall::SYSERR;

pub const DEV_ID_KEYBOARD_NO_ECHO: i32 = 0;
pub const DEV_ID_KEYBOARD: i32 = 1;
pub const NUM_DEVICES: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Keyboard,
}

#[derive(Clone, Copy)]
pub struct DeviceDescriptor {
    pub class: DeviceClass,
    pub minor: u8,
}

pub struct DeviceTable {
    entries: [DeviceDescriptor; NUM_DEVICES],
    pub keyboard: keyboard::Keyboard,
}

impl DeviceTable {
    pub fn new() -> Self {
        let mut table = Self {
            entries: [
                DeviceDescriptor {
                    class: DeviceClass::Keyboard,
                    minor: 0,
                },
                DeviceDescriptor {
                    class: DeviceClass::Keyboard,
                    minor: 1,
                },
            ],
            keyboard: keyboard::Keyboard::new(),
        };
        table.keyboard.init();
        crate::kinfo!("Device table initialized with {} devices", NUM_DEVICES);
        table
    }

    fn valid_fd(&self, pcbs: &PcbTable, slot: usize, fd: i32) -> Option<usize> {
        if !(0..PCB_MAX_FDS as i32).contains(&fd) {
            return None;
        }
        pcbs.slots[slot].fds[fd as usize]
    }

    /// Open `device_no` for the process in `slot`, assigning its lowest
    /// free file descriptor. Returns the fd, or −1.
    pub fn open(&mut self, pcbs: &mut PcbTable, slot: usize, device_no: i32) -> i32 {
        if !(0..NUM_DEVICES as i32).contains(&device_no) {
            return SYSERR;
        }
        let fd = match pcbs.slots[slot].fds.iter().position(|fd| fd.is_none()) {
            Some(fd) => fd,
            None => return SYSERR,
        };

        let entry = self.entries[device_no as usize];
        let opened = match entry.class {
            DeviceClass::Keyboard => self.keyboard.open(entry.minor),
        };
        if opened.is_err() {
            return SYSERR;
        }

        pcbs.slots[slot].fds[fd] = Some(device_no as usize);
        fd as i32
    }

    /// Close `fd`, releasing the driver reference and clearing the slot.
    pub fn close(&mut self, pcbs: &mut PcbTable, slot: usize, fd: i32) -> i32 {
        let device_no = match self.valid_fd(pcbs, slot, fd) {
            Some(device_no) => device_no,
            None => return SYSERR,
        };

        let entry = self.entries[device_no];
        let closed = match entry.class {
            DeviceClass::Keyboard => self.keyboard.close(slot),
        };
        if closed.is_err() {
            return SYSERR;
        }

        pcbs.slots[slot].fds[fd as usize] = None;
        0
    }

    /// Read through `fd`. May return `BLOCKERR`, in which case the
    /// dispatcher parks the caller as device-blocked.
    pub fn read(&mut self, pcbs: &mut PcbTable, slot: usize, fd: i32, buf: *mut u8, len: usize) -> i32 {
        let device_no = match self.valid_fd(pcbs, slot, fd) {
            Some(device_no) => device_no,
            None => return SYSERR,
        };
        match self.entries[device_no].class {
            DeviceClass::Keyboard => self.keyboard.read(pcbs, slot, buf, len),
        }
    }

    /// Write through `fd`.
    pub fn write(&mut self, pcbs: &mut PcbTable, slot: usize, fd: i32) -> i32 {
        let device_no = match self.valid_fd(pcbs, slot, fd) {
            Some(device_no) => device_no,
            None => return SYSERR,
        };
        match self.entries[device_no].class {
            DeviceClass::Keyboard => self.keyboard.write(),
        }
    }

    /// Device-specific control through `fd`.
    pub fn ioctl(&mut self, pcbs: &mut PcbTable, slot: usize, fd: i32, command: u32, arg: u32) -> i32 {
        let device_no = match self.valid_fd(pcbs, slot, fd) {
            Some(device_no) => device_no,
            None => return SYSERR,
        };
        match self.entries[device_no].class {
            DeviceClass::Keyboard => self.keyboard.ioctl(command, arg),
        }
    }
}
