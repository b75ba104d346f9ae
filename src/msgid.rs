//! Message identifier generator

use std::sync::atomic::{AtomicI32, Ordering};

/// Generator of LDAP message identifiers, one per connection.
///
/// Identifiers run from 1 to `i32::MAX` and then restart from 1. Zero is reserved for
/// unsolicited notifications and is never issued.
#[derive(Debug)]
pub struct MessageIds {
    last: AtomicI32,
}

impl Default for MessageIds {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIds {
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Generator whose first issued identifier follows `last`
    pub fn starting_after(last: i32) -> Self {
        Self {
            last: AtomicI32::new(last.max(0)),
        }
    }

    /// Issue the next identifier
    pub fn next_id(&self) -> i32 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = if current >= i32::MAX { 1 } else { current + 1 };
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Issue the next identifier that `in_flight` does not report as outstanding
    pub fn next_avoiding<F>(&self, in_flight: F) -> i32
    where
        F: Fn(i32) -> bool,
    {
        loop {
            let id = self.next_id();
            if !in_flight(id) {
                return id;
            }
        }
    }
}
