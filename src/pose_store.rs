use crate::types::{FramePair, PoseSample, PoseStatus};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct PoseSlots {
    latest: Option<PoseSample>,
    count: u64,
    /// Timestamp delta between the two most recent samples, in seconds.
    delta_s: f64,
    relocalized: bool,
}

/// Latest pose sample shared between the service callback thread and the
/// render/query thread.
///
/// Both `publish` and `snapshot` hold the same lock only long enough to copy a
/// `PoseSample` in or out, so the producer never waits on consumer work.
#[derive(Debug, Default)]
pub struct PoseStore {
    slots: Mutex<PoseSlots>,
}

impl PoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Nothing panics while the lock is held, so a poisoned lock still holds a
    // consistent value.
    fn slots(&self) -> MutexGuard<'_, PoseSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the stored sample.
    pub fn publish(&self, sample: PoseSample) {
        let mut slots = self.slots();
        slots.delta_s = match slots.latest {
            Some(prev) => sample.timestamp - prev.timestamp,
            None => 0.0,
        };
        slots.count += 1;
        if sample.frame == FramePair::AREA_DESCRIPTION_TO_START_OF_SERVICE
            && sample.status == PoseStatus::Valid
        {
            slots.relocalized = true;
        }
        slots.latest = Some(sample);
    }

    /// Copy of the most recently published sample, or `None` before the first publish.
    pub fn snapshot(&self) -> Option<PoseSample> {
        self.slots().latest
    }

    /// Whether the service has relocalized against an area description at least once.
    pub fn is_relocalized(&self) -> bool {
        self.slots().relocalized
    }

    /// Number of samples published since creation or the last reset.
    pub fn sample_count(&self) -> u64 {
        self.slots().count
    }

    /// Forget every published sample and the relocalization state.
    pub fn reset(&self) {
        *self.slots() = PoseSlots::default();
    }

    /// Human-readable summary of the latest pose.
    pub fn pose_string(&self) -> String {
        let (latest, count, delta_s) = {
            let slots = self.slots();
            (slots.latest, slots.count, slots.delta_s)
        };
        match latest {
            Some(sample) => format!(
                "status: {}, count: {}, delta time (ms): {:.3}\n{}",
                sample.status,
                count,
                delta_s * 1000.0,
                sample
            ),
            None => "status: no data".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoordinateFrame;
    use std::sync::Arc;

    fn sample(seed: f64, frame: FramePair, status: PoseStatus) -> PoseSample {
        PoseSample {
            timestamp: seed,
            translation: [seed, seed, seed],
            orientation: [seed, seed, seed, seed],
            frame,
            status,
        }
    }

    #[test]
    fn test_snapshot_before_publish_is_none() {
        let store = PoseStore::new();
        assert!(store.snapshot().is_none());
        assert_eq!(store.pose_string(), "status: no data");
    }

    #[test]
    fn test_publish_replaces_sample() {
        let store = PoseStore::new();
        let a = sample(1.0, FramePair::START_OF_SERVICE_TO_DEVICE, PoseStatus::Valid);
        let b = sample(1.5, FramePair::START_OF_SERVICE_TO_DEVICE, PoseStatus::Valid);
        store.publish(a);
        assert_eq!(store.snapshot(), Some(a));
        store.publish(b);
        assert_eq!(store.snapshot(), Some(b));
        assert_eq!(store.sample_count(), 2);
        assert!(store.pose_string().contains("delta time (ms): 500.000"));
    }

    #[test]
    fn test_relocalization_needs_valid_adf_pose() {
        let store = PoseStore::new();
        store.publish(sample(
            1.0,
            FramePair::AREA_DESCRIPTION_TO_START_OF_SERVICE,
            PoseStatus::Initializing,
        ));
        assert!(!store.is_relocalized());

        store.publish(sample(
            2.0,
            FramePair::new(CoordinateFrame::AreaDescription, CoordinateFrame::StartOfService),
            PoseStatus::Valid,
        ));
        assert!(store.is_relocalized());

        store.reset();
        assert!(!store.is_relocalized());
        assert!(store.snapshot().is_none());
        assert_eq!(store.sample_count(), 0);
    }

    #[test]
    fn test_concurrent_snapshots_are_never_torn() {
        let store = Arc::new(PoseStore::new());
        let producer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 1..=20_000 {
                    store.publish(sample(
                        i as f64,
                        FramePair::START_OF_SERVICE_TO_DEVICE,
                        PoseStatus::Valid,
                    ));
                }
            })
        };

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..20_000 {
                        if let Some(s) = store.snapshot() {
                            let seed = s.timestamp;
                            assert!(s.translation.iter().all(|&v| v == seed));
                            assert!(s.orientation.iter().all(|&v| v == seed));
                        }
                    }
                })
            })
            .collect();

        producer.join().unwrap();
        for c in consumers {
            c.join().unwrap();
        }
        assert_eq!(store.snapshot().unwrap().timestamp, 20_000.0);
    }
}
