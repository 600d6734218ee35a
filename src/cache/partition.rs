use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::name::FileSystemId;

/// Entry containers that can report emptiness.
pub(crate) trait PartitionEntries: Default {
    fn is_empty(&self) -> bool;
}

impl<K, V, S> PartitionEntries for std::collections::HashMap<K, V, S>
where
    S: Default,
{
    fn is_empty(&self) -> bool {
        std::collections::HashMap::is_empty(self)
    }
}

pub(crate) struct Slot<P> {
    pub entries: P,
    retired: bool,
}

/// One filesystem's share of the cache, behind its own lock.
///
/// A partition is retired under its write lock before it is unlinked from the
/// map. Writers that find a retired partition go back to the map and retry.
pub(crate) struct Partition<P> {
    slot: RwLock<Slot<P>>,
}

impl<P: PartitionEntries> Partition<P> {
    fn new() -> Self {
        Partition {
            slot: RwLock::new(Slot {
                entries: P::default(),
                retired: false,
            }),
        }
    }
}

/// Result of running a closure against a live partition.
pub(crate) struct Visit<R> {
    pub value: R,
    /// The partition was left empty and has been unlinked.
    pub emptied: bool,
}

/// Filesystem id to partition map shared by the locking policies.
pub(crate) struct PartitionMap<P> {
    partitions: DashMap<FileSystemId, Arc<Partition<P>>>,
    closed: AtomicBool,
}

impl<P: PartitionEntries> PartitionMap<P> {
    pub fn new() -> Self {
        PartitionMap {
            partitions: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lookup(&self, fs: FileSystemId, create: bool) -> Option<Arc<Partition<P>>> {
        if let Some(existing) = self.partitions.get(&fs) {
            return Some(existing.value().clone());
        }
        if !create {
            return None;
        }
        match self.partitions.entry(fs) {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(v) => {
                tracing::debug!("Creating cache partition for {}", fs);
                Some(v.insert(Arc::new(Partition::new())).clone())
            }
        }
    }

    fn unlink(&self, fs: FileSystemId, partition: &Arc<Partition<P>>, slot: &mut Slot<P>) {
        slot.retired = true;
        self.partitions
            .remove_if(&fs, |_, current| Arc::ptr_eq(current, partition));
    }

    /// Run `f` against the live partition for `fs` under its write lock.
    ///
    /// Returns `None` when there is no partition and `create` is false, or when
    /// the map has been closed. If the partition is empty after `f`, it is
    /// unlinked before the lock is released.
    pub fn write<R>(
        &self,
        fs: FileSystemId,
        create: bool,
        f: impl FnOnce(&mut P) -> R,
    ) -> Option<Visit<R>> {
        loop {
            if self.is_closed() {
                return None;
            }
            let partition = self.lookup(fs, create)?;
            let mut slot = partition.slot.write();
            if slot.retired {
                continue;
            }
            if self.is_closed() {
                self.unlink(fs, &partition, &mut slot);
                return None;
            }

            let value = f(&mut slot.entries);
            let emptied = slot.entries.is_empty();
            if emptied {
                tracing::debug!("Cache partition for {} is empty, unlinking", fs);
                self.unlink(fs, &partition, &mut slot);
            }
            return Some(Visit { value, emptied });
        }
    }

    /// Run `f` against the partition for `fs` under its read lock.
    pub fn read<R>(&self, fs: FileSystemId, f: impl FnOnce(&P) -> R) -> Option<R> {
        let partition = self.lookup(fs, false)?;
        let slot = partition.slot.read();
        if slot.retired {
            return None;
        }
        Some(f(&slot.entries))
    }

    /// Unlink and retire the partition for `fs`, handing back its entries.
    pub fn take(&self, fs: FileSystemId) -> Option<P> {
        let (_, partition) = self.partitions.remove(&fs)?;
        let mut slot = partition.slot.write();
        slot.retired = true;
        Some(std::mem::take(&mut slot.entries))
    }

    /// Close the map and drain every partition. Later writes are refused.
    pub fn close(&self) -> Vec<(FileSystemId, P)> {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<FileSystemId> = self.partitions.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter_map(|fs| self.take(fs).map(|entries| (fs, entries)))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    type Map = PartitionMap<HashMap<u32, u32>>;

    #[test]
    fn test_write_creates_on_demand() {
        let map = Map::new();
        let fs = FileSystemId::next();

        assert!(map.write(fs, false, |e| e.insert(1, 1)).is_none());
        assert!(map.is_empty());

        let visit = map.write(fs, true, |e| e.insert(1, 1)).unwrap();
        assert!(visit.value.is_none());
        assert!(!visit.emptied);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_emptied_partition_is_unlinked() {
        let map = Map::new();
        let fs = FileSystemId::next();
        map.write(fs, true, |e| e.insert(1, 1));

        let visit = map.write(fs, false, |e| e.remove(&1)).unwrap();
        assert_eq!(visit.value, Some(1));
        assert!(visit.emptied);
        assert!(map.is_empty());
        assert!(map.read(fs, |e| e.len()).is_none());
    }

    #[test]
    fn test_take_retires_partition() {
        let map = Map::new();
        let fs = FileSystemId::next();
        map.write(fs, true, |e| {
            e.insert(1, 10);
            e.insert(2, 20)
        });

        let taken = map.take(fs).unwrap();
        assert_eq!(taken.len(), 2);
        assert!(map.take(fs).is_none());

        // A fresh partition is created on the next write
        map.write(fs, true, |e| e.insert(3, 30));
        assert_eq!(map.read(fs, |e| e.len()), Some(1));
    }

    #[test]
    fn test_closed_map_refuses_writes() {
        let map = Map::new();
        let a = FileSystemId::next();
        let b = FileSystemId::next();
        map.write(a, true, |e| e.insert(1, 1));
        map.write(b, true, |e| e.insert(1, 1));

        let drained = map.close();
        assert_eq!(drained.len(), 2);
        assert!(map.is_closed());
        assert!(map.write(a, true, |e| e.insert(2, 2)).is_none());
        assert!(map.is_empty());
    }
}
