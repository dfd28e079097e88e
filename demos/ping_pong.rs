//! Two threads alternating through a condition variable.
//!
//! Run with: cargo run --example ping_pong

use coop_threads::{Condition, Kernel, Lock, PriorityPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const ROUNDS: usize = 5;

fn main() {
    let kernel = Kernel::host(PriorityPolicy).expect("failed to start kernel");

    let lock = Lock::new(&kernel);
    let condition = Arc::new(Condition::new(&lock));
    let turn = Arc::new(AtomicUsize::new(0));

    let mut players = Vec::new();
    for (id, name) in [(0, "ping"), (1, "pong")] {
        let l = lock.clone();
        let c = condition.clone();
        let t = turn.clone();
        let player = kernel
            .thread()
            .name(name)
            .spawn(move || {
                for round in 0..ROUNDS {
                    l.acquire();
                    while t.load(Ordering::SeqCst) != id {
                        c.sleep();
                    }
                    println!("{} {}", name, round);
                    t.store(1 - id, Ordering::SeqCst);
                    c.wake();
                    l.release();
                }
            })
            .expect("failed to spawn player");
        players.push(player);
    }

    for player in players {
        kernel.join(player);
    }
    kernel.shutdown();
    println!("done");
}
