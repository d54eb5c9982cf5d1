//! Cooldown-based event deduplication.
//!
//! The cooldown map is the only mutable state shared across cameras besides the
//! engine. `CooldownTracker::admit` performs check-and-set in one critical
//! section, so two concurrent reads of the same plate (same or different
//! camera) can never both pass.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::detect::DetectionCandidate;
use crate::NormalizedPlate;

const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_RETENTION_SECS: u64 = 600;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 30;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.95;

#[derive(Clone, Debug, PartialEq)]
pub struct CooldownConfig {
    /// Minimum time between two events for the same plate.
    pub cooldown: Duration,
    /// Entries older than this are purged by the janitor.
    pub retention: Duration,
    /// How often the janitor runs.
    pub cleanup_interval: Duration,
    /// Candidates must be strictly above this confidence.
    pub min_confidence: f32,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Shared plate → last accepted instant map.
pub struct CooldownTracker {
    cooldown: Duration,
    last_seen: Mutex<HashMap<NormalizedPlate, Instant>>,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<NormalizedPlate, Instant>> {
        // The map holds plain timestamps; a panicked holder cannot leave it torn.
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically accept `plate` at `now` unless it was accepted less than one
    /// cooldown ago. Returns `true` when accepted.
    pub fn admit(&self, plate: &NormalizedPlate, now: Instant) -> bool {
        let mut entries = self.entries();
        if let Some(last) = entries.get(plate) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        entries.insert(plate.clone(), now);
        true
    }

    /// Remove entries older than `retention`. Returns how many were removed.
    pub fn purge(&self, retention: Duration, now: Instant) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, last| now.saturating_duration_since(*last) <= retention);
        before - entries.len()
    }

    pub fn last_seen(&self, plate: &NormalizedPlate) -> Option<Instant> {
        self.entries().get(plate).copied()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// First sighting within the cooldown window.
    Accepted(NormalizedPlate),
    /// Seen less than one cooldown ago.
    Suppressed(NormalizedPlate),
    /// Below the confidence threshold or no usable text.
    Rejected,
}

/// Confidence filter + normalization + cooldown, shared by all cameras.
pub struct Deduplicator {
    config: CooldownConfig,
    tracker: CooldownTracker,
}

impl Deduplicator {
    pub fn new(config: CooldownConfig) -> Self {
        let tracker = CooldownTracker::new(config.cooldown);
        Self { config, tracker }
    }

    pub fn config(&self) -> &CooldownConfig {
        &self.config
    }

    pub fn tracker(&self) -> &CooldownTracker {
        &self.tracker
    }

    /// Decide whether `candidate` becomes an event.
    pub fn evaluate(&self, candidate: &DetectionCandidate, now: Instant) -> Admission {
        if candidate.confidence <= self.config.min_confidence {
            return Admission::Rejected;
        }
        let Some(plate) = NormalizedPlate::parse(&candidate.text) else {
            return Admission::Rejected;
        };
        if self.tracker.admit(&plate, now) {
            Admission::Accepted(plate)
        } else {
            log::debug!("plate {} suppressed (cooldown)", plate);
            Admission::Suppressed(plate)
        }
    }

    /// Returns the normalized plate when `candidate` becomes an event.
    pub fn admit(&self, candidate: &DetectionCandidate, now: Instant) -> Option<NormalizedPlate> {
        match self.evaluate(candidate, now) {
            Admission::Accepted(plate) => Some(plate),
            Admission::Suppressed(_) | Admission::Rejected => None,
        }
    }

    /// One janitor pass over the cooldown map.
    pub fn cleanup(&self, now: Instant) -> usize {
        self.tracker.purge(self.config.retention, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn plate(text: &str) -> NormalizedPlate {
        NormalizedPlate::parse(text).expect("plate")
    }

    fn dedup() -> Deduplicator {
        Deduplicator::new(CooldownConfig::default())
    }

    #[test]
    fn repeat_within_cooldown_is_suppressed() {
        let dedup = dedup();
        let t0 = Instant::now();
        let read = DetectionCandidate::new("34ABC123", 0.97);
        assert_eq!(dedup.admit(&read, t0), Some(plate("34ABC123")));
        assert_eq!(dedup.admit(&read, t0 + Duration::from_secs(9)), None);
    }

    #[test]
    fn repeat_after_cooldown_is_accepted() {
        let dedup = dedup();
        let t0 = Instant::now();
        let read = DetectionCandidate::new("34ABC123", 0.97);
        assert!(dedup.admit(&read, t0).is_some());
        assert!(dedup.admit(&read, t0 + Duration::from_secs(11)).is_some());
    }

    #[test]
    fn suppressed_reads_do_not_extend_the_window() {
        let dedup = dedup();
        let t0 = Instant::now();
        let read = DetectionCandidate::new("34ABC123", 0.97);
        assert!(dedup.admit(&read, t0).is_some());
        assert!(dedup.admit(&read, t0 + Duration::from_secs(8)).is_none());
        assert!(dedup.admit(&read, t0 + Duration::from_secs(10)).is_some());
    }

    #[test]
    fn formatting_variants_share_one_cooldown() {
        let dedup = dedup();
        let t0 = Instant::now();
        assert!(dedup
            .admit(&DetectionCandidate::new("34 abc-123", 0.99), t0)
            .is_some());
        assert!(dedup
            .admit(&DetectionCandidate::new("34ABC123", 0.99), t0)
            .is_none());
    }

    #[test]
    fn low_confidence_and_empty_reads_are_dropped() {
        let dedup = dedup();
        let t0 = Instant::now();
        assert!(dedup
            .admit(&DetectionCandidate::new("34ABC123", 0.95), t0)
            .is_none());
        assert!(dedup.admit(&DetectionCandidate::new("--", 0.99), t0).is_none());
        assert!(dedup.tracker().is_empty());
    }

    #[test]
    fn evaluate_tells_suppression_from_rejection() {
        let dedup = dedup();
        let t0 = Instant::now();
        let read = DetectionCandidate::new("34ABC123", 0.99);
        assert_eq!(dedup.evaluate(&read, t0), Admission::Accepted(plate("34ABC123")));
        assert_eq!(dedup.evaluate(&read, t0), Admission::Suppressed(plate("34ABC123")));
        assert_eq!(
            dedup.evaluate(&DetectionCandidate::new("34ABC123", 0.5), t0),
            Admission::Rejected
        );
    }

    #[test]
    fn cleanup_removes_entries_older_than_retention() {
        let dedup = dedup();
        let t0 = Instant::now();
        dedup.admit(&DetectionCandidate::new("OLD111", 0.99), t0);
        dedup.admit(
            &DetectionCandidate::new("NEW222", 0.99),
            t0 + Duration::from_secs(500),
        );

        let now = t0 + Duration::from_secs(700);
        assert_eq!(dedup.cleanup(now), 1);
        assert!(dedup.tracker().last_seen(&plate("OLD111")).is_none());
        assert!(dedup.tracker().last_seen(&plate("NEW222")).is_some());
        let retention = dedup.config().retention;
        assert!(dedup.tracker().entries().values().all(|last| now - *last <= retention));
    }

    #[test]
    fn concurrent_reads_of_one_plate_admit_exactly_once() {
        let tracker = Arc::new(CooldownTracker::new(Duration::from_secs(10)));
        let accepted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                let accepted = accepted.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    if tracker.admit(&plate("06MERT06"), now) {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("reader thread");
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
