use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Capacity-one exclusion gate for ingest sessions.
///
/// Acquisition never blocks or queues: a caller either takes the single slot
/// or is turned away immediately.
#[derive(Clone, Default)]
pub struct AdmissionGate {
    active: Arc<AtomicUsize>,
}

/// Holds the gate's slot; dropping it releases the slot.
#[must_use = "dropping the permit releases the admission slot"]
pub struct AdmissionPermit {
    active: Arc<AtomicUsize>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.active
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AdmissionPermit {
                active: Arc::clone(&self.active),
            })
    }

    /// Sessions currently admitted, 0 or 1.
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl AdmissionPermit {
    pub fn release(self) {}
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.active.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test_timeout::timeout]
    fn second_acquire_is_rejected_until_release() {
        let gate = AdmissionGate::new();
        let permit = gate.try_acquire().expect("gate starts open");
        assert_eq!(gate.in_flight(), 1);
        assert!(gate.try_acquire().is_none());

        permit.release();
        assert_eq!(gate.in_flight(), 0);
        assert!(gate.try_acquire().is_some());
    }

    #[test_timeout::timeout]
    fn dropping_permit_reopens_gate() {
        let gate = AdmissionGate::new();
        {
            let _permit = gate.try_acquire().unwrap();
            assert!(gate.clone().try_acquire().is_none());
        }
        assert_eq!(gate.in_flight(), 0);
    }

    #[test_timeout::timeout]
    fn racing_acquires_admit_exactly_one() {
        const THREADS: usize = 16;
        let gate = AdmissionGate::new();
        let barrier = Arc::new(Barrier::new(THREADS));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let gate = gate.clone();
                let barrier = Arc::clone(&barrier);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.try_acquire().map(|permit| {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        permit
                    })
                })
            })
            .collect();

        // Permits are held until every thread has reported back.
        let permits: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(permits.iter().filter(|p| p.is_some()).count(), 1);
        assert_eq!(gate.in_flight(), 1);

        drop(permits);
        assert_eq!(gate.in_flight(), 0);
    }
}
