//! Redial backoff for mesh peers.
//!
//! Failed dials double a per-peer wait starting at one second. The
//! whole table is dropped when the HTTP listener closes so that a
//! restarted node rediscovers its mesh quickly.

use std::collections::HashMap;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    stamp: Instant,
    /// Seconds to hold off after `stamp`. Doubles per failure.
    wait: u64,
}

#[derive(Debug, Default)]
pub struct BackoffTable {
    entries: HashMap<String, BackoffEntry>,
}

impl BackoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a dial towards `peer_id` is currently allowed.
    pub fn should_try(&self, peer_id: &str) -> bool {
        match self.entries.get(peer_id) {
            None => true,
            Some(entry) => entry.stamp.elapsed().as_secs_f64() >= entry.wait as f64,
        }
    }

    pub fn record_failure(&mut self, peer_id: &str) {
        match self.entries.get_mut(peer_id) {
            Some(entry) => {
                entry.stamp = Instant::now();
                entry.wait *= 2;
            }
            None => {
                self.entries.insert(
                    peer_id.to_owned(),
                    BackoffEntry { stamp: Instant::now(), wait: 1 },
                );
            }
        }
    }

    /// Dropped on successful open.
    pub fn clear(&mut self, peer_id: &str) {
        self.entries.remove(peer_id);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    fn wait_secs(&self, peer_id: &str) -> Option<u64> {
        self.entries.get(peer_id).map(|e| e.wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn first_failure_waits_one_second() {
        let mut table = BackoffTable::new();
        assert!(table.should_try("p"));

        table.record_failure("p");
        assert!(!table.should_try("p"));

        advance(Duration::from_millis(1100)).await;
        assert!(table.should_try("p"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_doubles_and_never_shrinks() {
        let mut table = BackoffTable::new();
        table.record_failure("p");
        assert_eq!(table.wait_secs("p"), Some(1));

        advance(Duration::from_secs(2)).await;
        table.record_failure("p");
        assert_eq!(table.wait_secs("p"), Some(2));
        assert!(!table.should_try("p"));

        advance(Duration::from_secs(1)).await;
        assert!(!table.should_try("p"));
        advance(Duration::from_secs(1)).await;
        assert!(table.should_try("p"));

        table.record_failure("p");
        assert_eq!(table.wait_secs("p"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resets_the_ladder() {
        let mut table = BackoffTable::new();
        table.record_failure("p");
        table.record_failure("p");
        table.clear("p");
        assert!(table.should_try("p"));

        table.record_failure("p");
        assert_eq!(table.wait_secs("p"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_empties_the_table() {
        let mut table = BackoffTable::new();
        table.record_failure("a");
        table.record_failure("b");
        table.clear_all();
        assert!(table.should_try("a"));
        assert!(table.should_try("b"));
    }
}
