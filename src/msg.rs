//! Synchronous message passing with rendezvous semantics.
//!
//! Neither side proceeds until the exchange completes, and exactly
//! `min(sender_len, receiver_len)` bytes move. A blocked endpoint parks
//! its validated transfer record in its PCB; the peer that completes the
//! rendezvous copies straight out of that record and unblocks it in one
//! kernel step.

use core::cmp::min;
use core::ptr;

use crate::pcb::{BlockedStatus, PcbTable, PendingXfer, Pid, ProcState};
use crate::syscall::BLOCKERR;

/// Finish a rendezvous with the receiver parked in `rx`: copy the bytes,
/// report the sender's pid through the receiver's `from` pointer, and make
/// the receiver ready with the byte count as its result.
fn complete_to_receiver(pcbs: &mut PcbTable, rx: usize, from_pid: Pid, buf: *const u8, len: usize) -> i32 {
    let xfer = match pcbs.slots[rx].xfer.take() {
        Some(xfer) => xfer,
        None => panic!("receiver blocked without a transfer record"),
    };
    let n = min(len, xfer.len);
    unsafe {
        ptr::copy_nonoverlapping(buf, xfer.buf, n);
        if !xfer.from_ptr.is_null() {
            *xfer.from_ptr = from_pid;
        }
    }
    pcbs.blocked.remove(&mut pcbs.slots, rx);
    pcbs.slots[rx].blocked_id = 0;
    pcbs.slots[rx].ret = n as i32;
    pcbs.make_ready(rx);
    n as i32
}

/// Finish a rendezvous with the sender parked in `tx`, copying into the
/// receiver's buffer and reporting the sender through `from_ptr`.
fn complete_from_sender(pcbs: &mut PcbTable, tx: usize, from_ptr: *mut Pid, buf: *mut u8, len: usize) -> i32 {
    let xfer = match pcbs.slots[tx].xfer.take() {
        Some(xfer) => xfer,
        None => panic!("sender blocked without a transfer record"),
    };
    let n = min(len, xfer.len);
    unsafe {
        ptr::copy_nonoverlapping(xfer.buf as *const u8, buf, n);
        if !from_ptr.is_null() {
            *from_ptr = pcbs.slots[tx].pid;
        }
    }
    pcbs.blocked.remove(&mut pcbs.slots, tx);
    pcbs.slots[tx].blocked_id = 0;
    pcbs.slots[tx].ret = n as i32;
    pcbs.make_ready(tx);
    n as i32
}

/// Send `len` bytes from `cur` to `dest`. If `dest` (or, failing that, any
/// any-sender receiver) is already waiting, the exchange completes now and
/// both ends are ready; otherwise `cur` parks as `Send`-blocked and the
/// dispatcher gets `BLOCKERR`.
pub fn send(pcbs: &mut PcbTable, cur: usize, dest: usize, buf: *const u8, len: usize) -> i32 {
    let cur_pid = pcbs.slots[cur].pid;
    let dest_pid = pcbs.slots[dest].pid;

    let d = &pcbs.slots[dest];
    let direct_match = d.state == ProcState::Blocked
        && d.blocked_status == BlockedStatus::Recv
        && (d.blocked_id == cur_pid || d.blocked_id == 0);

    let rx = if direct_match {
        Some(dest)
    } else {
        pcbs.peek_any_receiver()
    };

    match rx {
        Some(rx) => complete_to_receiver(pcbs, rx, cur_pid, buf, len),
        None => {
            pcbs.slots[cur].xfer = Some(PendingXfer {
                buf: buf as *mut u8,
                len,
                from_ptr: ptr::null_mut(),
            });
            pcbs.make_blocked(cur, BlockedStatus::Send, dest_pid);
            BLOCKERR
        }
    }
}

/// Receive into `buf`. `from` of `Some(slot)` names the only acceptable
/// sender; `None` accepts the first parked sender addressed to `cur` in
/// queue order. The sender's pid is written through `from_ptr` on
/// completion.
pub fn recv(
    pcbs: &mut PcbTable,
    cur: usize,
    from: Option<usize>,
    from_ptr: *mut Pid,
    buf: *mut u8,
    len: usize,
) -> i32 {
    let cur_pid = pcbs.slots[cur].pid;

    match from {
        Some(tx) => {
            let s = &pcbs.slots[tx];
            if s.state == ProcState::Blocked
                && s.blocked_status == BlockedStatus::Send
                && s.blocked_id == cur_pid
            {
                complete_from_sender(pcbs, tx, from_ptr, buf, len)
            } else {
                let from_pid = pcbs.slots[tx].pid;
                pcbs.slots[cur].xfer = Some(PendingXfer { buf, len, from_ptr });
                pcbs.make_blocked(cur, BlockedStatus::Recv, from_pid);
                BLOCKERR
            }
        }
        None => {
            let tx = pcbs.blocked.iter(&pcbs.slots).find(|&i| {
                pcbs.slots[i].blocked_status == BlockedStatus::Send
                    && (pcbs.slots[i].blocked_id == cur_pid || pcbs.slots[i].blocked_id == 0)
            });
            match tx {
                Some(tx) => complete_from_sender(pcbs, tx, from_ptr, buf, len),
                None => {
                    pcbs.slots[cur].xfer = Some(PendingXfer { buf, len, from_ptr });
                    pcbs.make_blocked(cur, BlockedStatus::Recv, 0);
                    BLOCKERR
                }
            }
        }
    }
}
