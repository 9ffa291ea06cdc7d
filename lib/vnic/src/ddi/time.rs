// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments, periodics, etc.

pub use std::time::Duration;
pub use std::time::Instant;

/// A fixed-rate tick for polling loops.
///
/// Ticks are scheduled from the previous deadline rather than from
/// when the caller woke up, so a slow iteration does not push every
/// later tick back.
#[derive(Clone, Copy, Debug)]
pub struct Periodic {
    interval: Duration,
    next: Instant,
}

impl Periodic {
    pub fn new(interval: Duration) -> Self {
        Self { interval, next: Instant::now() + interval }
    }

    /// Sleep until the next tick. If the tick has already passed,
    /// return immediately and schedule the one after now.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
            self.next += self.interval;
        } else {
            self.next = now + self.interval;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn waits_at_least_interval() {
        let start = Instant::now();
        let mut p = Periodic::new(Duration::from_millis(5));
        p.wait();
        p.wait();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
