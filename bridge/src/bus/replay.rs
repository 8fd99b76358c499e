//! Bounded replay ring for late subscribers

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::message::Message;
use crate::config::ChannelOptions;

/// Keeps the last `capacity` messages, optionally dropping ones older than `ttl`
///
/// Expiry is lazy: entries are only checked when the backlog is read.
#[derive(Debug)]
pub(crate) struct ReplayBuffer {
    capacity: usize,
    ttl: Option<Duration>,
    entries: VecDeque<(Instant, Message)>,
}

impl ReplayBuffer {
    pub(crate) fn new(options: &ChannelOptions) -> Self {
        Self {
            capacity: options.replay,
            ttl: options.ttl(),
            entries: VecDeque::with_capacity(options.replay),
        }
    }

    /// Apply new options, keeping the newest entries that still fit
    pub(crate) fn reconfigure(&mut self, options: &ChannelOptions) {
        self.capacity = options.replay;
        self.ttl = options.ttl();
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.push_at(Instant::now(), message);
    }

    fn push_at(&mut self, at: Instant, message: Message) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((at, message));
    }

    /// Unexpired messages, oldest first
    pub(crate) fn backlog(&mut self) -> Vec<Message> {
        self.backlog_at(Instant::now())
    }

    fn backlog_at(&mut self, now: Instant) -> Vec<Message> {
        if let Some(ttl) = self.ttl {
            // Entries are in publish order, so expired ones sit at the front
            while let Some((at, _)) = self.entries.front() {
                if now.saturating_duration_since(*at) > ttl {
                    self.entries.pop_front();
                } else {
                    break;
                }
            }
        }
        self.entries.iter().map(|(_, m)| m.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
