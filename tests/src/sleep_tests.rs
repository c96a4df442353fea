//! Sleep delta-queue tests: quantization, monotone insertion, delta
//! give-back on removal, tick aging, and signal cancellation.

use crate::pcb::{BlockedStatus, PcbTable, ProcState, MS_PER_CLOCK_TICK};
use crate::sleep::SleepQueue;

fn table_with_slots(n: usize) -> (PcbTable, Vec<usize>) {
    let mut table = PcbTable::new();
    let slots = (0..n).map(|_| table.get_free_slot().unwrap()).collect();
    (table, slots)
}

fn deltas(q: &SleepQueue, pcbs: &PcbTable) -> Vec<i32> {
    // remaining_ticks of each queued sleeper is a prefix sum, so recover
    // the raw deltas by walking slots in wake order.
    let mut out = Vec::new();
    let mut prev = 0;
    for slot in 0..crate::pcb::PCB_TABLE_SIZE {
        if pcbs.slots[slot].blocked_status == BlockedStatus::Sleep {
            out.push((slot, q.remaining_ticks(pcbs, slot)));
        }
    }
    out.sort_by_key(|&(_, abs)| abs);
    out.iter()
        .map(|&(_, abs)| {
            let d = abs - prev;
            prev = abs;
            d
        })
        .collect()
}

#[test]
fn milliseconds_quantize_up_to_ticks() {
    assert_eq!(SleepQueue::ticks_for_ms(0), 0);
    assert_eq!(SleepQueue::ticks_for_ms(1), 1);
    assert_eq!(SleepQueue::ticks_for_ms(MS_PER_CLOCK_TICK), 1);
    assert_eq!(SleepQueue::ticks_for_ms(MS_PER_CLOCK_TICK + 1), 2);
    assert_eq!(SleepQueue::ticks_for_ms(5000), 500);
}

#[test]
fn insert_stores_deltas_not_absolutes() {
    let (mut pcbs, s) = table_with_slots(3);
    let mut q = SleepQueue::new();

    q.insert(&mut pcbs, s[0], 10);
    q.insert(&mut pcbs, s[1], 25);
    q.insert(&mut pcbs, s[2], 3);

    assert_eq!(q.remaining_ticks(&pcbs, s[2]), 3);
    assert_eq!(q.remaining_ticks(&pcbs, s[0]), 10);
    assert_eq!(q.remaining_ticks(&pcbs, s[1]), 25);
    assert_eq!(deltas(&q, &pcbs), vec![3, 7, 15]);

    for &slot in &s {
        assert_eq!(pcbs.slots[slot].state, ProcState::Blocked);
        assert_eq!(pcbs.slots[slot].blocked_status, BlockedStatus::Sleep);
    }
}

#[test]
fn equal_wake_times_queue_behind_the_earlier_sleeper() {
    let (mut pcbs, s) = table_with_slots(2);
    let mut q = SleepQueue::new();

    q.insert(&mut pcbs, s[0], 5);
    q.insert(&mut pcbs, s[1], 5);

    assert_eq!(pcbs.slots[s[0]].ret, 5);
    assert_eq!(pcbs.slots[s[1]].ret, 0);

    // Both wake on the same tick.
    for _ in 0..4 {
        q.tick(&mut pcbs);
        assert_eq!(pcbs.ready.len(), 0);
    }
    q.tick(&mut pcbs);
    assert_eq!(pcbs.ready.len(), 2);
}

#[test]
fn removal_gives_the_delta_back_to_the_successor() {
    let (mut pcbs, s) = table_with_slots(3);
    let mut q = SleepQueue::new();

    q.insert(&mut pcbs, s[0], 4);
    q.insert(&mut pcbs, s[1], 9);
    q.insert(&mut pcbs, s[2], 15);

    assert!(q.remove(&mut pcbs, s[1]));
    // The later sleeper's absolute wake time is unchanged.
    assert_eq!(q.remaining_ticks(&pcbs, s[2]), 15);
    assert_eq!(q.len(), 2);

    assert!(!q.remove(&mut pcbs, s[1]));
}

#[test]
fn head_removal_keeps_the_queue_monotone() {
    let (mut pcbs, s) = table_with_slots(2);
    let mut q = SleepQueue::new();

    q.insert(&mut pcbs, s[0], 2);
    q.insert(&mut pcbs, s[1], 10);
    assert!(q.remove(&mut pcbs, s[0]));
    assert_eq!(q.remaining_ticks(&pcbs, s[1]), 10);

    // Exactly ten ticks to wake.
    for _ in 0..9 {
        q.tick(&mut pcbs);
    }
    assert!(pcbs.ready.is_empty());
    q.tick(&mut pcbs);
    assert_eq!(pcbs.ready.peek(), Some(s[1]));
}

#[test]
fn tick_only_ages_the_head() {
    let (mut pcbs, s) = table_with_slots(2);
    let mut q = SleepQueue::new();

    q.insert(&mut pcbs, s[0], 3);
    q.insert(&mut pcbs, s[1], 6);

    q.tick(&mut pcbs);
    assert_eq!(q.remaining_ticks(&pcbs, s[0]), 2);
    assert_eq!(q.remaining_ticks(&pcbs, s[1]), 5);
    assert_eq!(deltas(&q, &pcbs), vec![2, 3]);
}

#[test]
fn sleepers_wake_after_exactly_their_tick_count() {
    let (mut pcbs, s) = table_with_slots(1);
    let mut q = SleepQueue::new();

    q.insert(&mut pcbs, s[0], 7);
    for _ in 0..6 {
        q.tick(&mut pcbs);
        assert!(pcbs.ready.is_empty());
    }
    q.tick(&mut pcbs);
    assert_eq!(pcbs.ready.peek(), Some(s[0]));
    assert_eq!(pcbs.slots[s[0]].state, ProcState::Ready);
    // A completed sleep reports zero remaining.
    assert_eq!(pcbs.slots[s[0]].ret, 0);
    assert!(q.is_empty());
}

#[test]
fn zero_tick_sleep_wakes_on_the_next_tick() {
    let (mut pcbs, s) = table_with_slots(1);
    let mut q = SleepQueue::new();

    q.insert(&mut pcbs, s[0], 0);
    q.tick(&mut pcbs);
    assert_eq!(pcbs.ready.peek(), Some(s[0]));
    assert_eq!(pcbs.slots[s[0]].ret, 0);
}

#[test]
fn cancel_reports_the_remaining_milliseconds() {
    let (mut pcbs, s) = table_with_slots(2);
    let mut q = SleepQueue::new();

    // 5000 ms sleeper cancelled after 2000 ms.
    q.insert(&mut pcbs, s[0], SleepQueue::ticks_for_ms(5000));
    for _ in 0..SleepQueue::ticks_for_ms(2000) {
        q.tick(&mut pcbs);
    }
    let remaining = q.cancel(&mut pcbs, s[0]);
    assert_eq!(remaining, 3000);
    assert_eq!(pcbs.slots[s[0]].ret, 3000);
    assert_eq!(pcbs.slots[s[0]].state, ProcState::Ready);

    // Cancelling a sleeper leaves the rest of the queue intact.
    pcbs.ready.remove(&mut pcbs.slots, s[0]);
    q.insert(&mut pcbs, s[0], 4);
    q.insert(&mut pcbs, s[1], 9);
    let remaining = q.cancel(&mut pcbs, s[0]);
    assert_eq!(remaining, 4 * MS_PER_CLOCK_TICK as i32);
    assert_eq!(q.remaining_ticks(&pcbs, s[1]), 9);
}
