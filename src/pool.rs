//! A process-wide free list of default-initialized `Message`s, reducing
//! allocation churn on the push/reply hot paths. See `SPEC_FULL.md` §4.2.
//!
//! Grounded on `protocol/pool.go` (a `sync.Pool` of `*Message`). Rust has no
//! direct `sync.Pool` equivalent in `std`, and the daemon never pools
//! objects anywhere in its own codebase, so this follows the most direct
//! idiomatic translation: a bounded free list behind a `Mutex`. Pool
//! correctness is a convention, not an enforced invariant: a message must
//! not be read after `release` — the write loop upholds this by releasing
//! only after `write_to` has returned (see `server.rs`).

use std::sync::Mutex;

use crate::frame::Message;

/// Free lists larger than this are trimmed on release rather than grown
/// without bound; the fan-out push paths release bursts of acquired
/// messages, and there's no use in caching more of them than plausible
/// concurrent session counts need at once.
const MAX_POOLED: usize = 4096;

pub struct MessagePool {
    free: Mutex<Vec<Message>>,
}

impl MessagePool {
    pub fn new() -> Self {
        MessagePool {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Returns a message with default header fields populated (magic,
    /// header length) and an empty body/cmd — the caller sets cmd/body.
    pub fn acquire(&self) -> Message {
        let mut free = self.free.lock().expect("message pool mutex poisoned");
        free.pop().unwrap_or_default()
    }

    /// Returns `msg` to the pool after resetting it. The caller must not
    /// retain any other reference to `msg` — see the pool discipline
    /// invariant in `SPEC_FULL.md` §8.
    pub fn release(&self, mut msg: Message) {
        msg.reset();
        let mut free = self.free.lock().expect("message pool mutex poisoned");
        if free.len() < MAX_POOLED {
            free.push(msg);
        }
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}
