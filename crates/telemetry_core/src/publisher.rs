//! Slot único de "último snapshot".
//!
//! O loop de aquisição é o único escritor. `publish` troca um `Arc` sob o
//! lock de escrita; `latest` clona o `Arc` sob o lock de leitura. Nenhum lado
//! segura o lock além dessa troca de ponteiro, e um leitor nunca vê um
//! snapshot montado pela metade.

use crate::types::Snapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct SnapshotPublisher {
    slot: RwLock<Option<Arc<Snapshot>>>,
    published: AtomicU64,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitui o último snapshot.
    pub fn publish(&self, snapshot: Snapshot) {
        let next = Arc::new(snapshot);
        let previous = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            slot.replace(next)
        };
        // O anterior é liberado fora do lock.
        drop(previous);
        self.published.fetch_add(1, Ordering::Release);
    }

    /// Último snapshot publicado, se houver.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Quantos snapshots já foram publicados.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldValue, Fields, Reading, SourceKind};
    use chrono::Local;
    use std::thread;

    /// Snapshot cujos campos carregam todos o mesmo número de geração.
    fn generation(n: i64) -> Snapshot {
        let mut snap = Snapshot::new(Local::now());
        for kind in SourceKind::ALL {
            let mut fields = Fields::new();
            for key in ["a", "b", "c", "d"] {
                fields.insert(key.into(), FieldValue::Int(n));
            }
            snap = snap.with_reading(kind, Reading::ok(fields));
        }
        snap
    }

    fn generation_of(snap: &Snapshot) -> Option<i64> {
        let mut seen = None;
        for reading in snap.sources.values() {
            for value in reading.fields.values() {
                let FieldValue::Int(n) = value else { return None };
                match seen {
                    None => seen = Some(*n),
                    Some(s) if s != *n => return None,
                    _ => {}
                }
            }
        }
        seen
    }

    #[test]
    fn empty_until_first_publish() {
        let publisher = SnapshotPublisher::new();
        assert!(publisher.latest().is_none());
        publisher.publish(generation(1));
        assert_eq!(generation_of(&publisher.latest().unwrap()), Some(1));
        assert_eq!(publisher.published(), 1);
    }

    #[test]
    fn publish_replaces_previous() {
        let publisher = SnapshotPublisher::new();
        publisher.publish(generation(1));
        let held = publisher.latest().unwrap();
        publisher.publish(generation(2));
        assert_eq!(generation_of(&held), Some(1));
        assert_eq!(generation_of(&publisher.latest().unwrap()), Some(2));
    }

    #[test]
    fn readers_never_see_mixed_generations() {
        let publisher = Arc::new(SnapshotPublisher::new());
        publisher.publish(generation(0));

        let writer = {
            let publisher = Arc::clone(&publisher);
            thread::spawn(move || {
                for n in 1..=2_000 {
                    publisher.publish(generation(n));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let publisher = Arc::clone(&publisher);
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        let snap = publisher.latest().unwrap();
                        let n = generation_of(&snap).expect("snapshot misturado");
                        assert!(n >= last, "geração regrediu: {n} < {last}");
                        last = n;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(generation_of(&publisher.latest().unwrap()), Some(2_000));
    }
}
