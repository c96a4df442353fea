//! The sleep delta-queue.
//!
//! Each queued PCB stores, in its `ret` word, the tick delta to the node
//! in front of it; the head's delta is the absolute remaining ticks of the
//! earliest sleeper. The invariant is that prefix sums along the queue
//! equal each sleeper's absolute remaining time, which insertion and
//! removal both preserve.

use crate::pcb::{BlockedStatus, PcbTable, ProcState, MS_PER_CLOCK_TICK};

pub struct SleepQueue {
    q: crate::pcb::PcbQueue,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            q: crate::pcb::PcbQueue::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Milliseconds quantized up to whole clock ticks.
    pub fn ticks_for_ms(ms: u32) -> i32 {
        (ms / MS_PER_CLOCK_TICK + u32::from(ms % MS_PER_CLOCK_TICK != 0)) as i32
    }

    /// Park `idx` for `ticks`. Walks the queue subtracting earlier deltas
    /// until the remainder is strictly less than the next node's delta,
    /// then splices in and shrinks the successor's delta accordingly.
    pub fn insert(&mut self, pcbs: &mut PcbTable, idx: usize, ticks: i32) {
        let pcb = &mut pcbs.slots[idx];
        pcb.state = ProcState::Blocked;
        pcb.blocked_status = BlockedStatus::Sleep;

        let mut delta = ticks;
        let mut prev: Option<usize> = None;
        let mut curr = self.q.peek();
        while let Some(c) = curr {
            if delta < pcbs.slots[c].ret {
                break;
            }
            delta -= pcbs.slots[c].ret;
            prev = curr;
            curr = pcbs.slots[c].next;
        }

        pcbs.slots[idx].ret = delta;
        if let Some(c) = curr {
            pcbs.slots[c].ret -= delta;
        }
        self.q.insert_after(&mut pcbs.slots, prev, idx);
    }

    /// Detach `idx`, giving its delta back to the successor so everyone
    /// behind it keeps their absolute wake time.
    pub fn remove(&mut self, pcbs: &mut PcbTable, idx: usize) -> bool {
        let mut found = false;
        for i in self.q.iter(&pcbs.slots) {
            if i == idx {
                found = true;
                break;
            }
        }
        if !found {
            return false;
        }
        if let Some(next) = pcbs.slots[idx].next {
            pcbs.slots[next].ret += pcbs.slots[idx].ret;
        }
        self.q.remove(&mut pcbs.slots, idx)
    }

    /// Absolute remaining ticks for a queued sleeper (prefix sum of deltas
    /// through its node).
    pub fn remaining_ticks(&self, pcbs: &PcbTable, idx: usize) -> i32 {
        let mut total = 0;
        for i in self.q.iter(&pcbs.slots) {
            total += pcbs.slots[i].ret;
            if i == idx {
                return total;
            }
        }
        0
    }

    /// One clock tick: age the head and wake every sleeper whose time has
    /// run out. Woken processes resume with result 0 (full sleep).
    pub fn tick(&mut self, pcbs: &mut PcbTable) {
        let head = match self.q.peek() {
            Some(head) => head,
            None => return,
        };
        pcbs.slots[head].ret -= 1;
        while let Some(head) = self.q.peek() {
            if pcbs.slots[head].ret > 0 {
                break;
            }
            let _ = self.q.poll(&mut pcbs.slots);
            pcbs.slots[head].ret = 0;
            pcbs.make_ready(head);
        }
    }

    /// Cancel a sleep early (signal delivery). The sleeper becomes ready
    /// and its syscall reports the unslept remainder in milliseconds.
    pub fn cancel(&mut self, pcbs: &mut PcbTable, idx: usize) -> i32 {
        let remaining = self.remaining_ticks(pcbs, idx);
        self.remove(pcbs, idx);
        let remaining_ms = remaining * MS_PER_CLOCK_TICK as i32;
        pcbs.slots[idx].ret = remaining_ms;
        pcbs.make_ready(idx);
        remaining_ms
    }

    pub fn dump(&self, pcbs: &PcbTable) {
        crate::kdebug!("sleep queue:");
        for idx in self.q.iter(&pcbs.slots) {
            crate::kdebug!("  slot {} pid {} delta {}", idx, pcbs.slots[idx].pid, pcbs.slots[idx].ret);
        }
    }
}
