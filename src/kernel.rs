//! The kernel singleton and the per-request syscall handlers.
//!
//! All engine state (PCB table, sleep queue, device table, idle process,
//! current selection) lives in one owned [`Kernel`] value built during
//! boot; the dispatcher borrows it for every request. Handlers either set
//! the current process's saved return value and keep running it, or move
//! it to another queue and select the next runnable process.

use core::mem::size_of;

use crate::devices::DeviceTable;
use crate::mem;
use crate::msg;
use crate::pcb::{BlockedStatus, Pcb, PcbTable, Pid, ProcState, MS_PER_CLOCK_TICK, PCB_TABLE_SIZE};
use crate::process;
use crate::signal;
use crate::sleep::SleepQueue;
use crate::syscall::{
    CloseArgs, CpuTimesArgs, CreateArgs, IoctlArgs, KillArgs, OpenArgs, ProcEntry,
    ProcessStatuses, PutsArgs, RecvArgs, Request, RwArgs, SendArgs, SigHandlerArgs, SigReturnArgs,
    SleepArgs, WaitArgs, BLOCKERR, INVALID_SIGNAL, SYSERR, SYSERR_OTHER,
    SYSHANDLER_NEWHANDLER_INVALID, SYSHANDLER_OLDHANDLER_INVALID, SYSKILL_TARGET_DNE, SYSPID_DNE,
    SYSPID_SELF,
};

/// What the dispatcher is about to run: a table slot, or the idle process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Current {
    Idle,
    Proc(usize),
}

pub struct Kernel {
    pub pcbs: PcbTable,
    pub sleepq: SleepQueue,
    pub devices: DeviceTable,
    pub idle: Pcb,
    pub current: Current,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            pcbs: PcbTable::new(),
            sleepq: SleepQueue::new(),
            devices: DeviceTable::new(),
            idle: process::init_idle(),
            current: Current::Idle,
        }
    }

    /// Create a process from kernel context (boot-time only; user code
    /// goes through the create syscall).
    pub fn spawn(&mut self, entry: ProcEntry, stack_size: i32) -> i32 {
        process::create(&mut self.pcbs, entry as usize, stack_size)
    }

    pub fn current_pcb(&mut self) -> &mut Pcb {
        match self.current {
            Current::Idle => &mut self.idle,
            Current::Proc(idx) => &mut self.pcbs.slots[idx],
        }
    }

    fn cur_slot(&self) -> usize {
        match self.current {
            Current::Proc(idx) => idx,
            Current::Idle => panic!("idle process issued a syscall"),
        }
    }

    /// Select the next runnable process: the head of the ready queue, or
    /// idle when the queue is empty.
    pub fn pick_next(&mut self) {
        self.current = match self.pcbs.next_ready() {
            Some(idx) => Current::Proc(idx),
            None => {
                self.idle.state = ProcState::Running;
                Current::Idle
            }
        };
    }

    /// Read the current request's argument record, validating the user
    /// pointer first.
    fn read_args<T>(&mut self) -> Option<T> {
        let addr = self.current_pcb().args;
        if !mem::verify_sysptr(addr, size_of::<T>()) {
            return None;
        }
        Some(unsafe { (addr as *const T).read() })
    }

    fn set_ret(&mut self, value: i32) {
        self.current_pcb().ret = value;
    }

    /// Dispatch one decoded request.
    pub fn handle_request(&mut self, request: Request) {
        match request {
            Request::Create => self.handle_create(),
            Request::Yield => self.handle_yield(),
            Request::Stop => self.handle_stop(),
            Request::GetPid => {
                let pid = self.current_pcb().pid;
                self.set_ret(pid as i32);
            }
            Request::Puts => self.handle_puts(),
            Request::Kill => self.handle_kill(),
            Request::Recv => self.handle_recv(),
            Request::Send => self.handle_send(),
            Request::Sleep => self.handle_sleep(),
            Request::CpuTimes => self.handle_cputimes(),
            Request::SigHandler => self.handle_sighandler(),
            Request::SigReturn => self.handle_sigreturn(),
            Request::Wait => self.handle_wait(),
            Request::Open => self.handle_open(),
            Request::Close => self.handle_close(),
            Request::Write => self.handle_write(),
            Request::Read => self.handle_read(),
            Request::Ioctl => self.handle_ioctl(),
            Request::TimerInt => self.handle_timer(),
            Request::KeyboardInt => self.handle_keyboard(),
        }
    }

    fn handle_create(&mut self) {
        let args: CreateArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        if !mem::verify_sysptr(args.entry, size_of::<usize>()) {
            return self.set_ret(SYSERR);
        }
        let ret = process::create(&mut self.pcbs, args.entry, args.stack_size);
        self.set_ret(ret);
    }

    fn handle_yield(&mut self) {
        if let Current::Proc(idx) = self.current {
            self.pcbs.slots[idx].ret = 0;
            self.pcbs.make_ready(idx);
        }
        self.pick_next();
    }

    fn handle_stop(&mut self) {
        if let Current::Proc(idx) = self.current {
            process::cleanup(&mut self.pcbs, &mut self.sleepq, idx);
        }
        self.pick_next();
    }

    fn handle_puts(&mut self) {
        let args: PutsArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        if args.len > 0 && mem::verify_sysptr(args.ptr as usize, args.len) {
            let bytes = unsafe { core::slice::from_raw_parts(args.ptr, args.len) };
            match core::str::from_utf8(bytes) {
                Ok(s) => crate::kprint!("{}", s),
                Err(_) => {
                    for &b in bytes {
                        crate::kprint!("{}", b as char);
                    }
                }
            }
        }
        self.set_ret(0);
    }

    fn handle_kill(&mut self) {
        let args: KillArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        let target = match self.pcbs.pid_to_slot(args.pid) {
            Some(target) => target,
            None => return self.set_ret(SYSKILL_TARGET_DNE),
        };
        let ret = signal::raise(&mut self.pcbs, &mut self.sleepq, target, args.signal);
        self.set_ret(ret);
    }

    fn handle_send(&mut self) {
        let cur = self.cur_slot();
        let args: SendArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR_OTHER),
        };

        let dest = match self.pcbs.pid_to_slot(args.dest) {
            Some(dest) => dest,
            None => return self.set_ret(SYSPID_DNE),
        };
        if args.dest == self.pcbs.slots[cur].pid {
            return self.set_ret(SYSPID_SELF);
        }
        if args.len <= 0 || !mem::verify_sysptr(args.buf as usize, args.len as usize) {
            return self.set_ret(SYSERR_OTHER);
        }

        let ret = msg::send(&mut self.pcbs, cur, dest, args.buf, args.len as usize);
        if ret == BLOCKERR {
            self.pick_next();
        } else {
            self.set_ret(ret);
        }
    }

    fn handle_recv(&mut self) {
        let cur = self.cur_slot();
        let args: RecvArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR_OTHER),
        };

        if !mem::verify_sysptr(args.from as usize, size_of::<Pid>()) {
            return self.set_ret(SYSERR_OTHER);
        }
        let from_pid = unsafe { args.from.read() };

        let from = if from_pid == 0 {
            None
        } else {
            match self.pcbs.pid_to_slot(from_pid) {
                Some(from) => Some(from),
                None => return self.set_ret(SYSPID_DNE),
            }
        };
        if from_pid == self.pcbs.slots[cur].pid {
            return self.set_ret(SYSPID_SELF);
        }
        if args.len <= 0 || !mem::verify_sysptr(args.buf as usize, args.len as usize) {
            return self.set_ret(SYSERR_OTHER);
        }

        let ret = msg::recv(&mut self.pcbs, cur, from, args.from, args.buf, args.len as usize);
        if ret == BLOCKERR {
            self.pick_next();
        } else {
            self.set_ret(ret);
        }
    }

    fn handle_sleep(&mut self) {
        let cur = self.cur_slot();
        let args: SleepArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        let ticks = SleepQueue::ticks_for_ms(args.ms);
        self.sleepq.insert(&mut self.pcbs, cur, ticks);
        self.pick_next();
    }

    fn handle_cputimes(&mut self) {
        let args: CpuTimesArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        let addr = args.ps as usize;
        let map = match mem::memory_map() {
            Some(map) => map,
            None => return self.set_ret(SYSERR),
        };
        if addr >= map.hole_start && addr <= map.hole_end {
            return self.set_ret(-1);
        }
        if addr.saturating_add(size_of::<ProcessStatuses>()) > map.maxaddr {
            return self.set_ret(-2);
        }

        let mut ps = ProcessStatuses::new();
        let last = self.fill_process_statuses(&mut ps);
        unsafe { args.ps.write(ps) };
        self.set_ret(last);
    }

    /// Snapshot every live process: the idle process in slot 0, then the
    /// table in slot order. Returns the index of the last entry written.
    fn fill_process_statuses(&mut self, ps: &mut ProcessStatuses) -> i32 {
        let caller_pid = self.current_pcb().pid;

        ps.pid[0] = self.idle.pid as i32;
        ps.status[0] = self.idle.state as i32;
        ps.cpu_time[0] = (self.idle.cpu_time * MS_PER_CLOCK_TICK) as i32;

        let mut slot = 0;
        for i in 0..PCB_TABLE_SIZE {
            let pcb = &self.pcbs.slots[i];
            if pcb.state == ProcState::Stopped {
                continue;
            }
            if slot + 1 == PCB_TABLE_SIZE {
                // Snapshot full: idle plus N-1 table entries.
                break;
            }
            slot += 1;
            ps.pid[slot] = pcb.pid as i32;
            ps.status[slot] = if pcb.pid == caller_pid {
                ProcState::Running as i32
            } else {
                pcb.status_code()
            };
            ps.cpu_time[slot] = (pcb.cpu_time * MS_PER_CLOCK_TICK) as i32;
        }
        ps.entries = slot as i32;
        slot as i32
    }

    fn handle_sighandler(&mut self) {
        let cur = self.cur_slot();
        let args: SigHandlerArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(INVALID_SIGNAL),
        };

        if !(0..signal::KILL_SIGNAL_NUM).contains(&args.signal) {
            return self.set_ret(INVALID_SIGNAL);
        }
        if let Some(handler) = args.new_handler {
            if !mem::verify_sysptr(handler as usize, size_of::<usize>()) {
                return self.set_ret(SYSHANDLER_NEWHANDLER_INVALID);
            }
        }
        if !mem::verify_sysptr(args.old_handler as usize, size_of::<usize>()) {
            return self.set_ret(SYSHANDLER_OLDHANDLER_INVALID);
        }

        let pcb = &mut self.pcbs.slots[cur];
        let old = pcb.sig_handlers[args.signal as usize];
        pcb.sig_handlers[args.signal as usize] = args.new_handler;
        if args.new_handler.is_none() {
            // Keep the invariant: no pending bit without a handler.
            pcb.sig_pending &= !(1 << args.signal);
        }
        unsafe { args.old_handler.write(old) };
        self.set_ret(0);
    }

    fn handle_sigreturn(&mut self) {
        let cur = self.cur_slot();
        let args: SigReturnArgs = match self.read_args() {
            Some(args) => args,
            None => {
                // A corrupted trampoline frame is unrecoverable; kill the
                // process rather than resume into garbage.
                process::cleanup(&mut self.pcbs, &mut self.sleepq, cur);
                self.pick_next();
                return;
            }
        };
        if !mem::verify_sysptr(args.old_sp, size_of::<usize>()) {
            process::cleanup(&mut self.pcbs, &mut self.sleepq, cur);
            self.pick_next();
            return;
        }
        unsafe { signal::sigreturn(&mut self.pcbs.slots[cur], args.old_sp) };
    }

    fn handle_wait(&mut self) {
        let cur = self.cur_slot();
        let args: WaitArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSPID_DNE),
        };
        if args.pid == 0 || self.pcbs.pid_to_slot(args.pid).is_none() {
            return self.set_ret(SYSPID_DNE);
        }

        // Assume the target eventually dies; the result is in place when
        // cleanup wakes us.
        self.pcbs.slots[cur].ret = 0;
        self.pcbs.make_blocked(cur, BlockedStatus::Wait, args.pid);
        self.pick_next();
    }

    fn handle_open(&mut self) {
        let cur = self.cur_slot();
        let args: OpenArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        let ret = self.devices.open(&mut self.pcbs, cur, args.device);
        self.set_ret(ret);
    }

    fn handle_close(&mut self) {
        let cur = self.cur_slot();
        let args: CloseArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        let ret = self.devices.close(&mut self.pcbs, cur, args.fd);
        self.set_ret(ret);
    }

    fn handle_write(&mut self) {
        let cur = self.cur_slot();
        let args: RwArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        if args.len <= 0 || !mem::verify_sysptr(args.buf as usize, args.len as usize) {
            return self.set_ret(SYSERR);
        }
        let ret = self.devices.write(&mut self.pcbs, cur, args.fd);
        self.set_ret(ret);
    }

    fn handle_read(&mut self) {
        let cur = self.cur_slot();
        let args: RwArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        if args.len <= 0 || !mem::verify_sysptr(args.buf as usize, args.len as usize) {
            return self.set_ret(SYSERR);
        }

        let ret = self
            .devices
            .read(&mut self.pcbs, cur, args.fd, args.buf, args.len as usize);
        if ret == BLOCKERR {
            let pcb = &mut self.pcbs.slots[cur];
            pcb.state = ProcState::Blocked;
            pcb.blocked_status = BlockedStatus::DeviceIo;
            self.pick_next();
        } else {
            self.set_ret(ret);
        }
    }

    fn handle_ioctl(&mut self) {
        let cur = self.cur_slot();
        let args: IoctlArgs = match self.read_args() {
            Some(args) => args,
            None => return self.set_ret(SYSERR),
        };
        let ret = self
            .devices
            .ioctl(&mut self.pcbs, cur, args.fd, args.command, args.arg);
        self.set_ret(ret);
    }

    /// Timer tick: age the sleep queue, charge the running process, and
    /// rotate it to the ready tail (idle is never queued).
    fn handle_timer(&mut self) {
        self.sleepq.tick(&mut self.pcbs);
        self.current_pcb().cpu_time += 1;
        if let Current::Proc(idx) = self.current {
            self.pcbs.make_ready(idx);
        } else {
            self.idle.state = ProcState::Ready;
        }
        self.pick_next();
        crate::arch::pic::end_of_interrupt(crate::arch::pic::IRQ_TIMER);
    }

    fn handle_keyboard(&mut self) {
        self.devices.keyboard.isr(&mut self.pcbs);
        crate::arch::pic::end_of_interrupt(crate::arch::pic::IRQ_KEYBOARD);
    }
}
