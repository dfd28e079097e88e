//! Single-slot rendezvous channel.

use crate::kernel::Kernel;
use crate::machine::Machine;
use crate::sched::SchedPolicy;
use crate::sync::{Condition, Lock};
use alloc::sync::Arc;

struct Slot {
    word: i32,
    written: bool,
    /// Receivers currently waiting for a word. A sender may only write
    /// when at least one is committed to reading.
    receivers: u64,
    /// Senders currently waiting for a receiver or a free slot.
    senders: u64,
}

/// A rendezvous channel pairing exactly one sender with one receiver per
/// message.
///
/// `send` does not return until its word has been read; `receive` does not
/// return until a word is available. At most one word is ever in flight and
/// none is overwritten silently.
///
/// Both sides wake *all* candidates on the other side rather than one:
/// there is no pairing order between senders and receivers, so a single
/// wake could pick a waiter that fails its re-check and goes back to sleep
/// while its intended counterpart is never woken. Waking everyone lets
/// every candidate re-validate the slot state.
pub struct Rendezvous<M: Machine, P: SchedPolicy> {
    lock: Lock<M, P>,
    sender: Condition<M, P>,
    receiver: Condition<M, P>,
    /// Parks the writing sender until its word is consumed.
    delivered: Condition<M, P>,
    slot: spin::Mutex<Slot>,
}

impl<M: Machine, P: SchedPolicy> Rendezvous<M, P> {
    pub fn new(kernel: &Arc<Kernel<M, P>>) -> Self {
        let lock = Lock::new(kernel);
        let sender = Condition::new(&lock);
        let receiver = Condition::new(&lock);
        let delivered = Condition::new(&lock);
        Self {
            lock,
            sender,
            receiver,
            delivered,
            slot: spin::Mutex::new(Slot {
                word: 0,
                written: false,
                receivers: 0,
                senders: 0,
            }),
        }
    }

    /// Transfer `word` to exactly one receiver, blocking until it is
    /// consumed.
    pub fn send(&self, word: i32) {
        self.lock.acquire();

        loop {
            let mut slot = self.slot.lock();
            // Write only with a committed receiver and an empty slot;
            // anything else would pair two messages or overwrite one.
            if slot.receivers != 0 && !slot.written {
                slot.word = word;
                slot.written = true;
                slot.receivers = 0;
                drop(slot);
                break;
            }
            slot.senders += 1;
            log::trace!("sender waits for a receiver ({} queued)", slot.senders);
            drop(slot);
            self.sender.sleep();
        }

        self.receiver.wake_all();
        // Block until the reader acknowledges consumption of this word.
        self.delivered.sleep();
        self.lock.release();
    }

    /// Receive the word of exactly one sender, blocking until one is
    /// available.
    pub fn receive(&self) -> i32 {
        self.lock.acquire();

        loop {
            let mut slot = self.slot.lock();
            if slot.written {
                let word = slot.word;
                slot.written = false;
                slot.senders = 0;
                drop(slot);

                self.sender.wake_all();
                self.delivered.wake();
                self.lock.release();
                return word;
            }
            slot.receivers += 1;
            log::trace!("receiver waits for a word ({} queued)", slot.receivers);
            drop(slot);
            // Nudge blocked senders to re-check now that a receiver is
            // committed, then wait for the word.
            self.sender.wake_all();
            self.receiver.sleep();
        }
    }
}
