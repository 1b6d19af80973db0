//! Serial-number registry of locally visible volumes.
//!
//! Volume serials are not guaranteed unique, so the registry never resolves
//! an ambiguous serial: when a second volume shows up with a serial already
//! present, the entry is poisoned instead of overwritten. Poisoned entries
//! are excluded from lookups and iteration but stay in the map, so a later
//! enumeration pair cannot silently reintroduce the serial.

use std::collections::HashMap;

use log::warn;

use crate::record::VolumeSerial;
use crate::volume::VolumePath;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RegistryEntry {
    Path(VolumePath),
    /// Two distinct volumes reported this serial; neither is resolvable.
    Poisoned,
}

/// Map from volume serial to canonical volume path, built once per session
/// and immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct VolumeRegistry {
    entries: HashMap<VolumeSerial, RegistryEntry>,
}

impl VolumeRegistry {
    /// Fold enumeration output into the registry.
    ///
    /// Two-phase by design: callers collect every (serial, path) pair first,
    /// then this single pass applies the collision rule.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (VolumeSerial, VolumePath)>,
    {
        let mut entries = HashMap::new();
        for (serial, path) in pairs {
            match entries.get(&serial) {
                None => {
                    entries.insert(serial, RegistryEntry::Path(path));
                }
                Some(RegistryEntry::Path(_)) => {
                    warn!("volume serial {serial} is ambiguous; excluding it from lookups");
                    entries.insert(serial, RegistryEntry::Poisoned);
                }
                Some(RegistryEntry::Poisoned) => {}
            }
        }
        VolumeRegistry { entries }
    }

    /// Path for a serial, unless the serial is absent or poisoned.
    pub fn get(&self, serial: VolumeSerial) -> Option<&VolumePath> {
        match self.entries.get(&serial) {
            Some(RegistryEntry::Path(path)) => Some(path),
            _ => None,
        }
    }

    /// Whether this serial was seen on more than one volume.
    pub fn is_poisoned(&self, serial: VolumeSerial) -> bool {
        matches!(self.entries.get(&serial), Some(RegistryEntry::Poisoned))
    }

    /// Resolvable (serial, path) pairs; poisoned serials are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (VolumeSerial, &VolumePath)> {
        self.entries.iter().filter_map(|(serial, entry)| match entry {
            RegistryEntry::Path(path) => Some((*serial, path)),
            RegistryEntry::Poisoned => None,
        })
    }

    /// Number of resolvable volumes.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(windows)]
pub use self::os::VolumeHandleCache;

#[cfg(windows)]
mod os {
    use std::collections::HashMap;
    use std::collections::hash_map::Entry;

    use log::debug;

    use super::VolumeRegistry;
    use crate::errors::JournalError;
    use crate::record::VolumeSerial;
    use crate::volume::{self, AccessMode, OwnedHandle, VolumePath};

    impl VolumeRegistry {
        /// Enumerate every locally visible volume, obtain its serial and
        /// build the registry. Volumes that cannot be opened or identified
        /// (empty card readers, locked volumes) are skipped.
        pub fn discover(mode: AccessMode) -> Result<Self, JournalError> {
            let mut pairs = Vec::new();
            for path in volume::enumerate_volume_paths()? {
                let handle = match volume::open_volume(&path, mode) {
                    Ok(handle) => handle,
                    Err(err) => {
                        debug!("skipping volume {path}: {err}");
                        continue;
                    }
                };
                match volume::handle_serial(&handle) {
                    Ok(serial) => pairs.push((serial, path)),
                    Err(err) => debug!("skipping volume {path}: {err}"),
                }
            }
            Ok(Self::from_pairs(pairs))
        }

        /// Resolve the volume an open handle lives on, then look it up by
        /// serial. A poisoned or unknown serial is a miss.
        pub fn lookup_by_handle(
            &self,
            handle: &OwnedHandle,
        ) -> Result<Option<&VolumePath>, JournalError> {
            let serial = volume::handle_serial(handle)?;
            Ok(self.get(serial))
        }
    }

    /// Per-session cache of volume handles: one lazily opened, memoized
    /// handle per serial. Not thread-safe; confine to one thread or lock
    /// externally. The owner tears down with [`VolumeHandleCache::close_all`]
    /// (dropping the cache also closes every handle).
    pub struct VolumeHandleCache<'a> {
        registry: &'a VolumeRegistry,
        mode: AccessMode,
        handles: HashMap<VolumeSerial, OwnedHandle>,
    }

    impl<'a> VolumeHandleCache<'a> {
        pub fn new(registry: &'a VolumeRegistry, mode: AccessMode) -> Self {
            VolumeHandleCache {
                registry,
                mode,
                handles: HashMap::new(),
            }
        }

        /// Handle for the volume with this serial, opening it on first use.
        pub fn handle_for(&mut self, serial: VolumeSerial) -> Result<&OwnedHandle, JournalError> {
            match self.handles.entry(serial) {
                Entry::Occupied(entry) => Ok(entry.into_mut()),
                Entry::Vacant(slot) => {
                    let path = self
                        .registry
                        .get(serial)
                        .ok_or(JournalError::UnknownVolume(serial))?;
                    let handle = volume::open_volume(path, self.mode)?;
                    Ok(slot.insert(handle))
                }
            }
        }

        /// Explicit teardown: close every cached handle.
        pub fn close_all(&mut self) {
            self.handles.clear();
        }

        pub fn cached(&self) -> usize {
            self.handles.len()
        }
    }
}
