//! Producers and consumers meeting on the rendezvous channel.
//!
//! Every `send` blocks until exactly one consumer has taken its word, so
//! the channel itself is the synchronization point; no buffer exists.
//!
//! Run with: cargo run --example producer_consumer

use coop_threads::{Kernel, PriorityPolicy, Rendezvous};
use std::sync::Arc;

const PRODUCERS: i32 = 3;
const ITEMS: i32 = 4;

fn main() {
    let kernel = Kernel::host(PriorityPolicy).expect("failed to start kernel");
    let channel = Arc::new(Rendezvous::new(&kernel));

    let mut workers = Vec::new();
    for producer in 0..PRODUCERS {
        let ch = channel.clone();
        workers.push(
            kernel
                .thread()
                .name(format!("producer-{}", producer))
                .spawn(move || {
                    for item in 0..ITEMS {
                        let word = producer * 100 + item;
                        ch.send(word);
                        println!("producer {} delivered {}", producer, word);
                    }
                })
                .expect("failed to spawn producer"),
        );
    }

    for consumer in 0..PRODUCERS {
        let ch = channel.clone();
        workers.push(
            kernel
                .thread()
                .name(format!("consumer-{}", consumer))
                .spawn(move || {
                    for _ in 0..ITEMS {
                        let word = ch.receive();
                        println!("consumer {} took {}", consumer, word);
                    }
                })
                .expect("failed to spawn consumer"),
        );
    }

    for worker in workers {
        kernel.join(worker);
    }
    kernel.shutdown();
}
