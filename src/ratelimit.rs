// Copyright (C) 2026 Marquee Developers <devs@marquee.example>
//
// This file is part of marquee.
//
// marquee is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// marquee is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with marquee.  If not,
// see <http://www.gnu.org/licenses/>.

//! # request throttling
//!
//! A per-user fixed-window rate limiter, used to throttle review submission. *Attempts* are
//! counted, not successes: a request rejected for, say, being a duplicate review still burns a
//! slot in the caller's window, so a client hammering a 400 can't do so forever.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::entities::UserId;

struct Window {
    started: Instant,
    count: u32,
}

/// Per-user fixed-window counter; allows `limit` attempts per `window`
pub struct FixedWindow {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<UserId, Window>>,
}

impl FixedWindow {
    pub fn new(limit: u32, window: Duration) -> FixedWindow {
        FixedWindow {
            limit,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }
    /// Record an attempt by `user`; returns false if the user has exhausted their window
    pub async fn check(&self, user: UserId) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(user).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count < self.limit {
            entry.count += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attempts_are_counted_per_user() {
        let limiter = FixedWindow::new(3, Duration::from_secs(60));
        let alice = UserId::new();
        let bob = UserId::new();

        for _ in 0..3 {
            assert!(limiter.check(alice).await);
        }
        assert!(!limiter.check(alice).await);
        // another user's window is untouched
        assert!(limiter.check(bob).await);
    }

    #[tokio::test]
    async fn window_resets() {
        let limiter = FixedWindow::new(1, Duration::from_millis(10));
        let alice = UserId::new();
        assert!(limiter.check(alice).await);
        assert!(!limiter.check(alice).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(limiter.check(alice).await);
    }
}
