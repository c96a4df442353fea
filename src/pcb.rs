//! Process control blocks, the fixed PCB table, and the FIFO queues the
//! dispatcher moves processes between.
//!
//! Queues are intrusive: each PCB carries a single `next` link (a slot
//! index), so a PCB can sit in at most one queue at a time and `next` is
//! `None` exactly when it is detached. The stopped queue doubles as the
//! free-list of PCB slots.

use core::ptr::NonNull;

use crate::signal::SigHandler;

pub type Pid = u32;

pub const PCB_TABLE_SIZE: usize = 32;
pub const SIGNAL_TABLE_SIZE: usize = 32;
pub const PID_MAX: u32 = 32768;
pub const PCB_MAX_FDS: usize = 4;
pub const DEFAULT_STACK_SIZE: usize = 8192;
pub const IDLE_STACK_SIZE: usize = 2048;
pub const MS_PER_CLOCK_TICK: u32 = 10;

/// Process states, with the stable numeric encoding used by the
/// `cputimes` status snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcState {
    Ready = 0,
    Stopped = 1,
    Running = 2,
    Blocked = 3,
}

/// Why a blocked process is blocked. Added to `ProcState::Blocked` in the
/// status snapshot encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockedStatus {
    None = 0,
    Send = 1,
    Recv = 2,
    Wait = 3,
    Sleep = 4,
    DeviceIo = 5,
}

/// Stack memory owned by a PCB, allocated from the kernel heap.
#[derive(Clone, Copy)]
pub struct StackAlloc {
    pub base: NonNull<u8>,
    pub len: usize,
}

/// A transfer endpoint parked in a blocked sender/receiver, validated once
/// when the syscall was dispatched. The rendezvous peer completes the copy
/// from this record. `from_ptr` is null for senders.
#[derive(Clone, Copy)]
pub struct PendingXfer {
    pub buf: *mut u8,
    pub len: usize,
    pub from_ptr: *mut Pid,
}

pub struct Pcb {
    pub pid: Pid,
    pub state: ProcState,
    pub blocked_status: BlockedStatus,
    /// Pid this PCB waits for; 0 means "any peer" (receivers) or "none".
    pub blocked_id: Pid,
    /// Intrusive queue link; `None` when not queued.
    pub next: Option<usize>,
    pub stack: Option<StackAlloc>,
    /// Saved stack pointer while the process is not running.
    pub esp: usize,
    /// Saved return value for the next resume. Doubles as the delta (in
    /// ticks) while the PCB sits on the sleep queue.
    pub ret: i32,
    /// User pointer to the current request record.
    pub args: usize,
    pub xfer: Option<PendingXfer>,
    /// Clock ticks consumed.
    pub cpu_time: u32,
    pub sig_handlers: [Option<SigHandler>; SIGNAL_TABLE_SIZE],
    pub sig_pending: u32,
    pub sig_inflight: u32,
    /// Open file descriptors: indices into the device table.
    pub fds: [Option<usize>; PCB_MAX_FDS],
}

impl Pcb {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            state: ProcState::Stopped,
            blocked_status: BlockedStatus::None,
            blocked_id: 0,
            next: None,
            stack: None,
            esp: 0,
            ret: 0,
            args: 0,
            xfer: None,
            cpu_time: 0,
            sig_handlers: [None; SIGNAL_TABLE_SIZE],
            sig_pending: 0,
            sig_inflight: 0,
            fds: [None; PCB_MAX_FDS],
        }
    }

    /// Status snapshot encoding: the caller reports `Running`; a blocked
    /// process reports `Blocked` plus its blocked status.
    pub fn status_code(&self) -> i32 {
        self.state as i32 + self.blocked_status as i32
    }
}

/// Singly-linked FIFO of PCB slot indices with O(1) offer/poll and O(n)
/// remove-by-slot.
#[derive(Clone, Copy)]
pub struct PcbQueue {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl PcbQueue {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn peek(&self) -> Option<usize> {
        self.head
    }

    pub fn offer(&mut self, slots: &mut [Pcb], idx: usize) {
        debug_assert!(slots[idx].next.is_none());
        slots[idx].next = None;
        match self.tail {
            Some(tail) => slots[tail].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    pub fn poll(&mut self, slots: &mut [Pcb]) -> Option<usize> {
        let head = self.head?;
        self.head = slots[head].next;
        if self.head.is_none() {
            self.tail = None;
        }
        slots[head].next = None;
        self.len -= 1;
        Some(head)
    }

    /// Detach `idx` from wherever it sits in the queue. Returns whether it
    /// was a member.
    pub fn remove(&mut self, slots: &mut [Pcb], idx: usize) -> bool {
        let mut prev: Option<usize> = None;
        let mut curr = self.head;
        while let Some(c) = curr {
            if c == idx {
                let next = slots[c].next;
                match prev {
                    Some(p) => slots[p].next = next,
                    None => self.head = next,
                }
                if next.is_none() {
                    self.tail = prev;
                }
                slots[c].next = None;
                self.len -= 1;
                return true;
            }
            prev = curr;
            curr = slots[c].next;
        }
        false
    }

    /// Splice `idx` in directly after `after` (`None` inserts at the
    /// head). Ordered-queue support; plain FIFOs use `offer`.
    pub fn insert_after(&mut self, slots: &mut [Pcb], after: Option<usize>, idx: usize) {
        debug_assert!(slots[idx].next.is_none());
        match after {
            Some(prev) => {
                slots[idx].next = slots[prev].next;
                slots[prev].next = Some(idx);
                if self.tail == Some(prev) {
                    self.tail = Some(idx);
                }
            }
            None => {
                slots[idx].next = self.head;
                if self.head.is_none() {
                    self.tail = Some(idx);
                }
                self.head = Some(idx);
            }
        }
        self.len += 1;
    }

    /// Queue members in FIFO order, for scans that must not disturb the
    /// queue.
    pub fn iter<'a>(&self, slots: &'a [Pcb]) -> QueueIter<'a> {
        QueueIter {
            slots,
            curr: self.head,
        }
    }
}

pub struct QueueIter<'a> {
    slots: &'a [Pcb],
    curr: Option<usize>,
}

impl Iterator for QueueIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let curr = self.curr?;
        self.curr = self.slots[curr].next;
        Some(curr)
    }
}

/// The PCB table and the scheduling queues over it.
pub struct PcbTable {
    pub slots: [Pcb; PCB_TABLE_SIZE],
    pub ready: PcbQueue,
    pub blocked: PcbQueue,
    pub stopped: PcbQueue,
}

impl PcbTable {
    pub fn new() -> Self {
        let mut table = Self {
            slots: core::array::from_fn(|i| Pcb::new(i as Pid + 1)),
            ready: PcbQueue::new(),
            blocked: PcbQueue::new(),
            stopped: PcbQueue::new(),
        };
        for i in 0..PCB_TABLE_SIZE {
            table.stopped.offer(&mut table.slots, i);
        }
        table
    }

    /// Pull a free PCB slot off the stopped queue.
    pub fn get_free_slot(&mut self) -> Option<usize> {
        self.stopped.poll(&mut self.slots)
    }

    /// Resolve a pid to its table slot. The pid is live iff its slot is
    /// not stopped and still holds the same pid (a recycled slot does not
    /// alias its previous occupant).
    pub fn pid_to_slot(&self, pid: Pid) -> Option<usize> {
        if pid == 0 {
            return None;
        }
        let idx = ((pid - 1) % PCB_TABLE_SIZE as u32) as usize;
        let pcb = &self.slots[idx];
        if pcb.state != ProcState::Stopped && pcb.pid == pid {
            Some(idx)
        } else {
            None
        }
    }

    /// Move a PCB to the tail of the ready queue.
    pub fn make_ready(&mut self, idx: usize) {
        let pcb = &mut self.slots[idx];
        pcb.state = ProcState::Ready;
        pcb.blocked_status = BlockedStatus::None;
        self.ready.offer(&mut self.slots, idx);
    }

    /// Move a PCB to the blocked queue with the given status and peer.
    pub fn make_blocked(&mut self, idx: usize, status: BlockedStatus, blocked_id: Pid) {
        let pcb = &mut self.slots[idx];
        pcb.state = ProcState::Blocked;
        pcb.blocked_status = status;
        pcb.blocked_id = blocked_id;
        self.blocked.offer(&mut self.slots, idx);
    }

    /// Pick the next runnable process off the ready queue.
    pub fn next_ready(&mut self) -> Option<usize> {
        let idx = self.ready.poll(&mut self.slots)?;
        self.slots[idx].state = ProcState::Running;
        Some(idx)
    }

    /// First `Send`-blocked process in queue order, without disturbing the
    /// queue.
    pub fn peek_next_sender(&self) -> Option<usize> {
        self.blocked
            .iter(&self.slots)
            .find(|&i| self.slots[i].blocked_status == BlockedStatus::Send)
    }

    /// First receiver blocked on "any sender", in queue order.
    pub fn peek_any_receiver(&self) -> Option<usize> {
        self.blocked.iter(&self.slots).find(|&i| {
            self.slots[i].blocked_status == BlockedStatus::Recv && self.slots[i].blocked_id == 0
        })
    }

    /// Wake every process `Wait`-blocked on `pid`; their preset result (0)
    /// stands.
    pub fn unblock_waiters(&mut self, pid: Pid) {
        loop {
            let waiter = self.blocked.iter(&self.slots).find(|&i| {
                self.slots[i].blocked_status == BlockedStatus::Wait && self.slots[i].blocked_id == pid
            });
            match waiter {
                Some(idx) => {
                    self.blocked.remove(&mut self.slots, idx);
                    self.slots[idx].blocked_id = 0;
                    self.make_ready(idx);
                }
                None => break,
            }
        }
    }

    /// Recycle a slot back onto the stopped free-list. The pid advances by
    /// one table generation so the slot's next occupant gets a fresh pid.
    pub fn release(&mut self, idx: usize) {
        let pcb = &mut self.slots[idx];
        pcb.pid = (pcb.pid + PCB_TABLE_SIZE as u32 - 1) % PID_MAX + 1;
        pcb.cpu_time = 0;
        pcb.state = ProcState::Stopped;
        pcb.blocked_status = BlockedStatus::None;
        pcb.blocked_id = 0;
        pcb.sig_pending = 0;
        pcb.sig_inflight = 0;
        pcb.sig_handlers = [None; SIGNAL_TABLE_SIZE];
        pcb.xfer = None;
        pcb.fds = [None; PCB_MAX_FDS];
        self.stopped.offer(&mut self.slots, idx);
    }

    pub fn dump_ready_queue(&self) {
        crate::kdebug!("ready queue:");
        for idx in self.ready.iter(&self.slots) {
            crate::kdebug!("  slot {} pid {} ret {}", idx, self.slots[idx].pid, self.slots[idx].ret);
        }
    }

    pub fn dump_blocked_queue(&self) {
        crate::kdebug!("blocked queue:");
        for idx in self.blocked.iter(&self.slots) {
            crate::kdebug!(
                "  slot {} pid {} {:?} waiting on {}",
                idx,
                self.slots[idx].pid,
                self.slots[idx].blocked_status,
                self.slots[idx].blocked_id
            );
        }
    }
}
