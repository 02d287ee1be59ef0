//! Timeout scheduling
//!
//! One timer per (player, gesture) bounds how long a gesture may stay partially
//! complete. The table here is pure bookkeeping over deadlines; the engine's
//! timer thread sleeps until [`TimerTable::next_deadline`] and then collects
//! [`TimerTable::take_expired`] while holding the engine lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::PlayerId;

/// Timer identity
pub type TimerKey = (PlayerId, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    interval: Duration,
    deadline: Option<Instant>,
}

/// Armed and disarmed timers keyed by (player, gesture)
#[derive(Debug, Clone, Default)]
pub struct TimerTable {
    entries: HashMap<TimerKey, TimerEntry>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, creating it if absent; re-arming restarts the countdown
    pub fn arm(&mut self, player: PlayerId, gesture: &str, interval: Duration, now: Instant) {
        let entry = self
            .entries
            .entry((player, gesture.to_string()))
            .or_insert(TimerEntry {
                interval,
                deadline: None,
            });
        entry.interval = interval;
        entry.deadline = Some(now + interval);
    }

    /// Disarm the timer if it exists; returns whether it was armed
    pub fn disarm(&mut self, player: PlayerId, gesture: &str) -> bool {
        self.entries
            .get_mut(&(player, gesture.to_string()))
            .and_then(|entry| entry.deadline.take())
            .is_some()
    }

    pub fn is_armed(&self, player: PlayerId, gesture: &str) -> bool {
        self.entries
            .get(&(player, gesture.to_string()))
            .is_some_and(|entry| entry.deadline.is_some())
    }

    /// Time left before the timer fires
    pub fn remaining(&self, player: PlayerId, gesture: &str, now: Instant) -> Option<Duration> {
        self.entries
            .get(&(player, gesture.to_string()))
            .and_then(|entry| entry.deadline)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Earliest deadline among armed timers
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().filter_map(|e| e.deadline).min()
    }

    /// Disarm and return every timer whose deadline has passed
    pub fn take_expired(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut expired: Vec<TimerKey> = self
            .entries
            .iter_mut()
            .filter_map(|(key, entry)| match entry.deadline {
                Some(deadline) if deadline <= now => {
                    entry.deadline = None;
                    Some(key.clone())
                }
                _ => None,
            })
            .collect();
        expired.sort();
        expired
    }

    /// Drop every timer of a player
    pub fn forget_player(&mut self, player: PlayerId) {
        self.entries.retain(|(p, _), _| *p != player);
    }

    /// Drop every timer of a gesture
    pub fn forget_gesture(&mut self, gesture: &str) {
        self.entries.retain(|(_, g), _| g != gesture);
    }

    /// Disarm everything, keeping the entries
    pub fn disarm_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.deadline = None;
        }
    }

    pub fn armed_count(&self) -> usize {
        self.entries.values().filter(|e| e.deadline.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_arm_and_expire_once() {
        let start = Instant::now();
        let mut timers = TimerTable::new();
        timers.arm(1, "Wave", Duration::from_millis(500), start);

        assert!(timers.is_armed(1, "Wave"));
        assert!(timers.take_expired(start + Duration::from_millis(499)).is_empty());

        let expired = timers.take_expired(start + Duration::from_millis(500));
        assert_eq!(expired, vec![(1, "Wave".to_string())]);
        assert!(!timers.is_armed(1, "Wave"));

        // Already disarmed: never fires twice
        assert!(timers.take_expired(start + Duration::from_secs(10)).is_empty());
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_rearm_resets_countdown() {
        let start = Instant::now();
        let mut timers = TimerTable::new();
        timers.arm(1, "Wave", Duration::from_millis(500), start);
        timers.arm(1, "Wave", Duration::from_millis(500), start + Duration::from_millis(400));

        assert!(timers.take_expired(start + Duration::from_millis(600)).is_empty());
        assert_eq!(
            timers.remaining(1, "Wave", start + Duration::from_millis(600)),
            Some(Duration::from_millis(300))
        );
        assert_eq!(timers.take_expired(start + Duration::from_millis(900)).len(), 1);
    }

    #[test]
    fn test_disarm_and_next_deadline() {
        let start = Instant::now();
        let mut timers = TimerTable::new();
        timers.arm(1, "Wave", Duration::from_millis(800), start);
        timers.arm(2, "Wave", Duration::from_millis(200), start);
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_millis(200)));

        assert!(timers.disarm(2, "Wave"));
        assert!(!timers.disarm(2, "Wave"));
        assert!(!timers.disarm(3, "Punch"));
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_millis(800)));
        assert_eq!(timers.armed_count(), 1);

        timers.disarm_all();
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_forget() {
        let now = Instant::now();
        let mut timers = TimerTable::new();
        timers.arm(1, "Wave", Duration::from_secs(1), now);
        timers.arm(1, "Punch", Duration::from_secs(1), now);
        timers.arm(2, "Wave", Duration::from_secs(1), now);

        timers.forget_player(1);
        assert_eq!(timers.len(), 1);
        timers.forget_gesture("Wave");
        assert!(timers.is_empty());
    }
}
