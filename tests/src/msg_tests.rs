//! Rendezvous messaging tests: directed and any-sender exchanges, byte
//! accounting, blocking transitions, and queue-order matching.

use crate::msg::{recv, send};
use crate::pcb::{BlockedStatus, PcbTable, PendingXfer, Pid, ProcState};
use crate::syscall::BLOCKERR;

fn table_with_slots(n: usize) -> (PcbTable, Vec<usize>) {
    let mut table = PcbTable::new();
    let slots = (0..n)
        .map(|_| {
            let slot = table.get_free_slot().unwrap();
            table.slots[slot].state = ProcState::Running;
            slot
        })
        .collect();
    (table, slots)
}

/// Park `slot` as a blocked receiver the way the recv handler would.
fn park_receiver(
    pcbs: &mut PcbTable,
    slot: usize,
    from: Option<usize>,
    from_ptr: *mut Pid,
    buf: &mut [u8],
) {
    let ret = recv(pcbs, slot, from, from_ptr, buf.as_mut_ptr(), buf.len());
    assert_eq!(ret, BLOCKERR);
}

/// Park `slot` as a blocked sender the way the send handler would.
fn park_sender(pcbs: &mut PcbTable, slot: usize, dest: usize, buf: &[u8]) {
    let ret = send(pcbs, slot, dest, buf.as_ptr(), buf.len());
    assert_eq!(ret, BLOCKERR);
}

#[test]
fn send_with_no_receiver_blocks_the_sender() {
    let (mut pcbs, s) = table_with_slots(2);
    let payload = b"hello";

    park_sender(&mut pcbs, s[0], s[1], payload);
    let sender = &pcbs.slots[s[0]];
    assert_eq!(sender.state, ProcState::Blocked);
    assert_eq!(sender.blocked_status, BlockedStatus::Send);
    assert_eq!(sender.blocked_id, pcbs.slots[s[1]].pid);
    assert!(sender.xfer.is_some());
}

#[test]
fn recv_with_no_sender_blocks_the_receiver() {
    let (mut pcbs, s) = table_with_slots(2);
    let mut from: Pid = pcbs.slots[s[1]].pid;
    let mut buf = [0u8; 8];

    park_receiver(&mut pcbs, s[0], Some(s[1]), &mut from, &mut buf);
    let receiver = &pcbs.slots[s[0]];
    assert_eq!(receiver.state, ProcState::Blocked);
    assert_eq!(receiver.blocked_status, BlockedStatus::Recv);
    assert_eq!(receiver.blocked_id, pcbs.slots[s[1]].pid);
}

#[test]
fn directed_rendezvous_receiver_first() {
    let (mut pcbs, s) = table_with_slots(2);
    let (rx, tx) = (s[0], s[1]);
    let tx_pid = pcbs.slots[tx].pid;

    let mut from: Pid = tx_pid;
    let mut inbox = [0u8; 14];
    park_receiver(&mut pcbs, rx, Some(tx), &mut from, &mut inbox);

    let payload = b"hello world!\n\0\0\0";
    let n = send(&mut pcbs, tx, rx, payload.as_ptr(), 16);

    // min(16, 14) bytes move and both parties are ready.
    assert_eq!(n, 14);
    assert_eq!(pcbs.slots[rx].ret, 14);
    assert_eq!(&inbox[..13], b"hello world!\n");
    assert_eq!(pcbs.slots[rx].state, ProcState::Ready);
    assert_eq!(pcbs.slots[tx].state, ProcState::Running);
    assert_eq!(from, tx_pid);
    assert!(pcbs.slots[rx].xfer.is_none());
}

#[test]
fn directed_rendezvous_sender_first() {
    let (mut pcbs, s) = table_with_slots(2);
    let (tx, rx) = (s[0], s[1]);
    let tx_pid = pcbs.slots[tx].pid;

    let payload = b"hello world!\n\0\0\0";
    park_sender(&mut pcbs, tx, rx, payload);

    let mut from: Pid = tx_pid;
    let mut inbox = [0u8; 32];
    let n = recv(&mut pcbs, rx, Some(tx), &mut from, inbox.as_mut_ptr(), inbox.len());

    assert_eq!(n, 16);
    assert_eq!(pcbs.slots[tx].ret, 16);
    assert_eq!(&inbox[..16], payload);
    assert_eq!(pcbs.slots[tx].state, ProcState::Ready);
    assert_eq!(pcbs.slots[tx].blocked_id, 0);
}

#[test]
fn any_receiver_accepts_a_directed_send() {
    let (mut pcbs, s) = table_with_slots(2);
    let (rx, tx) = (s[0], s[1]);
    let tx_pid = pcbs.slots[tx].pid;

    let mut from: Pid = 0;
    let mut inbox = [0u8; 8];
    park_receiver(&mut pcbs, rx, None, &mut from, &mut inbox);

    let n = send(&mut pcbs, tx, rx, b"ping".as_ptr(), 4);
    assert_eq!(n, 4);
    assert_eq!(&inbox[..4], b"ping");
    // The receiver learns who the sender was.
    assert_eq!(from, tx_pid);
}

#[test]
fn any_receiver_elsewhere_absorbs_a_send_to_a_busy_peer() {
    // dest is not receiving, but a third process is parked in
    // receive-from-any; the transfer goes there.
    let (mut pcbs, s) = table_with_slots(3);
    let (tx, dest, any_rx) = (s[0], s[1], s[2]);

    let mut from: Pid = 0;
    let mut inbox = [0u8; 8];
    park_receiver(&mut pcbs, any_rx, None, &mut from, &mut inbox);

    let n = send(&mut pcbs, tx, dest, b"stray".as_ptr(), 5);
    assert_eq!(n, 5);
    assert_eq!(&inbox[..5], b"stray");
    assert_eq!(from, pcbs.slots[tx].pid);
    assert_eq!(pcbs.slots[any_rx].state, ProcState::Ready);
    assert_eq!(pcbs.slots[tx].state, ProcState::Running);
}

#[test]
fn any_recv_takes_parked_senders_in_queue_order() {
    let (mut pcbs, s) = table_with_slots(4);
    let rx = s[0];
    let senders = [s[1], s[2], s[3]];

    let payloads: [&[u8]; 3] = [b"one", b"two", b"three"];
    for (i, &tx) in senders.iter().enumerate() {
        park_sender(&mut pcbs, tx, rx, payloads[i]);
    }

    for (i, &tx) in senders.iter().enumerate() {
        let mut from: Pid = 0;
        let mut inbox = [0u8; 8];
        let n = recv(&mut pcbs, rx, None, &mut from, inbox.as_mut_ptr(), inbox.len());
        assert_eq!(n as usize, payloads[i].len());
        assert_eq!(&inbox[..n as usize], payloads[i]);
        assert_eq!(from, pcbs.slots[tx].pid, "queue order violated");
        assert_eq!(pcbs.slots[tx].state, ProcState::Ready);
    }
}

#[test]
fn any_recv_ignores_senders_addressed_to_others() {
    let (mut pcbs, s) = table_with_slots(3);
    let (rx, tx, other) = (s[0], s[1], s[2]);

    park_sender(&mut pcbs, tx, other, b"not for you");

    let mut from: Pid = 0;
    let mut inbox = [0u8; 8];
    let ret = recv(&mut pcbs, rx, None, &mut from, inbox.as_mut_ptr(), inbox.len());
    assert_eq!(ret, BLOCKERR);
    assert_eq!(pcbs.slots[rx].blocked_status, BlockedStatus::Recv);
    assert_eq!(pcbs.slots[tx].state, ProcState::Blocked);
}

#[test]
fn directed_recv_does_not_match_a_sender_bound_elsewhere() {
    let (mut pcbs, s) = table_with_slots(3);
    let (rx, tx, other) = (s[0], s[1], s[2]);

    park_sender(&mut pcbs, tx, other, b"xyz");

    let mut from: Pid = pcbs.slots[tx].pid;
    let mut inbox = [0u8; 8];
    let ret = recv(&mut pcbs, rx, Some(tx), &mut from, inbox.as_mut_ptr(), inbox.len());
    assert_eq!(ret, BLOCKERR);
    // Receiver waits specifically for that sender.
    assert_eq!(pcbs.slots[rx].blocked_id, pcbs.slots[tx].pid);
}

#[test]
fn completion_consumes_the_parked_transfer_record() {
    let (mut pcbs, s) = table_with_slots(2);
    let (tx, rx) = (s[0], s[1]);

    park_sender(&mut pcbs, tx, rx, b"abc");
    assert!(matches!(
        pcbs.slots[tx].xfer,
        Some(PendingXfer { len: 3, .. })
    ));

    let mut from: Pid = 0;
    let mut inbox = [0u8; 8];
    recv(&mut pcbs, rx, None, &mut from, inbox.as_mut_ptr(), inbox.len());
    assert!(pcbs.slots[tx].xfer.is_none());
}
