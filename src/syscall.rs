//! The syscall ABI: request identifiers, error codes, typed argument
//! records, and the user-side stubs.
//!
//! A syscall is software interrupt 255 with the request id in `eax` and a
//! pointer to a per-request `#[repr(C)]` argument record in `edx`; the
//! kernel's answer comes back in `eax`. Each request id maps to exactly one
//! record shape, which the dispatcher validates once before reading.

use core::arch::asm;

use crate::pcb::{Pid, PCB_TABLE_SIZE};
use crate::signal::SigHandler;

pub const SYSCALL_INT_NUM: u8 = 255;
pub const TIMER_INT_NUM: u8 = 32;
pub const KEYBOARD_INT_NUM: u8 = 33;

/* Universal return constants */
pub const SYSERR: i32 = -1;
pub const BLOCKERR: i32 = -5;

/* Syscall return constants */
pub const CREATE_FAILURE: i32 = -1;
pub const SYSPID_DNE: i32 = -1;
pub const SYSPID_SELF: i32 = -2;
pub const SYSERR_OTHER: i32 = -3;
pub const INVALID_SIGNAL: i32 = -1;
pub const SYSHANDLER_NEWHANDLER_INVALID: i32 = -2;
pub const SYSHANDLER_OLDHANDLER_INVALID: i32 = -3;
pub const SYSKILL_TARGET_DNE: i32 = -512;
pub const SYSKILL_SIG_INVALID: i32 = -561;

/// Result of a blocked send/recv/wait whose caller was handed a signal.
pub const BLOCKED_PROC_SIGNALED: i32 = -99;

/// Request tags handed to the dispatcher by the context switcher. Ids
/// 0..=17 arrive from user code in `eax`; the last two are synthesized for
/// hardware interrupts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Request {
    Create = 0,
    Yield,
    Stop,
    GetPid,
    Puts,
    Kill,
    Recv,
    Send,
    Sleep,
    CpuTimes,
    SigHandler,
    SigReturn,
    Wait,
    Open,
    Close,
    Write,
    Read,
    Ioctl,
    TimerInt,
    KeyboardInt,
}

impl Request {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Create,
            1 => Self::Yield,
            2 => Self::Stop,
            3 => Self::GetPid,
            4 => Self::Puts,
            5 => Self::Kill,
            6 => Self::Recv,
            7 => Self::Send,
            8 => Self::Sleep,
            9 => Self::CpuTimes,
            10 => Self::SigHandler,
            11 => Self::SigReturn,
            12 => Self::Wait,
            13 => Self::Open,
            14 => Self::Close,
            15 => Self::Write,
            16 => Self::Read,
            17 => Self::Ioctl,
            18 => Self::TimerInt,
            19 => Self::KeyboardInt,
            _ => return None,
        })
    }
}

/// Entry point of a created process.
pub type ProcEntry = extern "C" fn();

/* Argument records, one per syscall id. */

#[repr(C)]
pub struct CreateArgs {
    pub entry: usize,
    pub stack_size: i32,
}

#[repr(C)]
pub struct PutsArgs {
    pub ptr: *const u8,
    pub len: usize,
}

#[repr(C)]
pub struct KillArgs {
    pub pid: Pid,
    pub signal: i32,
}

#[repr(C)]
pub struct SendArgs {
    pub dest: Pid,
    pub buf: *const u8,
    pub len: i32,
}

#[repr(C)]
pub struct RecvArgs {
    pub from: *mut Pid,
    pub buf: *mut u8,
    pub len: i32,
}

#[repr(C)]
pub struct SleepArgs {
    pub ms: u32,
}

#[repr(C)]
pub struct CpuTimesArgs {
    pub ps: *mut ProcessStatuses,
}

#[repr(C)]
pub struct SigHandlerArgs {
    pub signal: i32,
    pub new_handler: Option<SigHandler>,
    pub old_handler: *mut Option<SigHandler>,
}

#[repr(C)]
pub struct SigReturnArgs {
    pub old_sp: usize,
}

#[repr(C)]
pub struct WaitArgs {
    pub pid: Pid,
}

#[repr(C)]
pub struct OpenArgs {
    pub device: i32,
}

#[repr(C)]
pub struct CloseArgs {
    pub fd: i32,
}

#[repr(C)]
pub struct RwArgs {
    pub fd: i32,
    pub buf: *mut u8,
    pub len: i32,
}

#[repr(C)]
pub struct IoctlArgs {
    pub fd: i32,
    pub command: u32,
    pub arg: u32,
}

/// Per-process snapshot filled by `sysgetcputimes`. Slot 0 is the idle
/// process; `entries` is the index of the last slot written.
#[repr(C)]
pub struct ProcessStatuses {
    pub entries: i32,
    pub pid: [i32; PCB_TABLE_SIZE],
    pub status: [i32; PCB_TABLE_SIZE],
    pub cpu_time: [i32; PCB_TABLE_SIZE],
}

impl ProcessStatuses {
    pub const fn new() -> Self {
        Self {
            entries: 0,
            pid: [0; PCB_TABLE_SIZE],
            status: [0; PCB_TABLE_SIZE],
            cpu_time: [0; PCB_TABLE_SIZE],
        }
    }
}

impl Default for ProcessStatuses {
    fn default() -> Self {
        Self::new()
    }
}

/* User-side stubs. */

fn syscall(req: Request, args: *const ()) -> i32 {
    let ret: i32;
    unsafe {
        asm!(
            "int 255",
            inlateout("eax") req as u32 => ret,
            in("edx") args as usize as u32,
        );
    }
    ret
}

/// Create a new process running `entry` on a stack of at least
/// `stack_size` bytes. Returns the new pid, or −1 on failure.
pub fn syscreate(entry: ProcEntry, stack_size: i32) -> i32 {
    let args = CreateArgs {
        entry: entry as usize,
        stack_size,
    };
    syscall(Request::Create, &args as *const _ as *const ())
}

/// Give up the CPU; the caller re-enters the ready queue at the tail.
pub fn sysyield() {
    syscall(Request::Yield, core::ptr::null());
}

/// Terminate the calling process. Also serves as the return address seeded
/// at the top of every process stack.
pub extern "C" fn sysstop() {
    syscall(Request::Stop, core::ptr::null());
}

pub fn sysgetpid() -> Pid {
    syscall(Request::GetPid, core::ptr::null()) as Pid
}

/// Synchronized console output.
pub fn sysputs(s: &str) {
    let args = PutsArgs {
        ptr: s.as_ptr(),
        len: s.len(),
    };
    syscall(Request::Puts, &args as *const _ as *const ());
}

/// Deliver `signal` to `pid`. Returns 0 on success, −512 if the pid does
/// not exist, −561 if the signal number is invalid.
pub fn syskill(pid: Pid, signal: i32) -> i32 {
    let args = KillArgs { pid, signal };
    syscall(Request::Kill, &args as *const _ as *const ())
}

/// Send `buf` to `dest`, blocking until a matching receive. Returns the
/// number of bytes transferred.
pub fn syssend(dest: Pid, buf: &[u8]) -> i32 {
    let args = SendArgs {
        dest,
        buf: buf.as_ptr(),
        len: buf.len() as i32,
    };
    syscall(Request::Send, &args as *const _ as *const ())
}

/// Receive into `buf`, blocking until a matching send. `*from` names the
/// sender, 0 accepting any; on success it holds the actual sender's pid.
pub fn sysrecv(from: &mut Pid, buf: &mut [u8]) -> i32 {
    let args = RecvArgs {
        from,
        buf: buf.as_mut_ptr(),
        len: buf.len() as i32,
    };
    syscall(Request::Recv, &args as *const _ as *const ())
}

/// Sleep for at least `ms` milliseconds. Returns 0 after a full sleep, or
/// the unslept remainder if a signal cut it short.
pub fn syssleep(ms: u32) -> i32 {
    let args = SleepArgs { ms };
    syscall(Request::Sleep, &args as *const _ as *const ())
}

/// Fill `ps` with the status of every live process. Returns the index of
/// the last entry, or a negative error.
pub fn sysgetcputimes(ps: &mut ProcessStatuses) -> i32 {
    let args = CpuTimesArgs { ps };
    syscall(Request::CpuTimes, &args as *const _ as *const ())
}

/// Install `new_handler` for `signal`, storing the previous handler in
/// `old_handler`.
pub fn syssighandler(
    signal: i32,
    new_handler: Option<SigHandler>,
    old_handler: &mut Option<SigHandler>,
) -> i32 {
    let args = SigHandlerArgs {
        signal,
        new_handler,
        old_handler,
    };
    syscall(Request::SigHandler, &args as *const _ as *const ())
}

/// Restore the context interrupted by a signal delivery. Only the signal
/// trampoline calls this; it does not return.
pub fn syssigreturn(old_sp: usize) {
    let args = SigReturnArgs { old_sp };
    syscall(Request::SigReturn, &args as *const _ as *const ());
}

/// Block until `pid` terminates. Returns 0 once it has, −1 if it does not
/// exist, −99 if interrupted by a signal.
pub fn syswait(pid: Pid) -> i32 {
    let args = WaitArgs { pid };
    syscall(Request::Wait, &args as *const _ as *const ())
}

/// Open a device. Returns a file descriptor or −1.
pub fn sysopen(device: i32) -> i32 {
    let args = OpenArgs { device };
    syscall(Request::Open, &args as *const _ as *const ())
}

/// Close a file descriptor. Returns 0 or −1.
pub fn sysclose(fd: i32) -> i32 {
    let args = CloseArgs { fd };
    syscall(Request::Close, &args as *const _ as *const ())
}

/// Write to a file descriptor. Returns bytes written or −1.
pub fn syswrite(fd: i32, buf: &[u8]) -> i32 {
    let args = RwArgs {
        fd,
        buf: buf.as_ptr() as *mut u8,
        len: buf.len() as i32,
    };
    syscall(Request::Write, &args as *const _ as *const ())
}

/// Read from a file descriptor. Returns bytes read, 0 at end of file, −1
/// on failure.
pub fn sysread(fd: i32, buf: &mut [u8]) -> i32 {
    let args = RwArgs {
        fd,
        buf: buf.as_mut_ptr(),
        len: buf.len() as i32,
    };
    syscall(Request::Read, &args as *const _ as *const ())
}

/// Device-specific control command.
pub fn sysioctl(fd: i32, command: u32, arg: u32) -> i32 {
    let args = IoctlArgs { fd, command, arg };
    syscall(Request::Ioctl, &args as *const _ as *const ())
}
