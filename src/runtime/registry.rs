//! Weak-reference registry.
//!
//! Every live script wrapper owns exactly one entry in a host-side anchor
//! dictionary rooted at `v:['%v8_weak%']`. The entry holds a strong host
//! reference, so neither the editor's refcounting nor its cycle collector can
//! free a container that script code can still reach. The entry is removed
//! when the engine collects the wrapper.

use super::error::{BridgeError, BridgeResult};
use super::host::{reserved, HostServices};
use super::host_value::{DictId, HostValue};
use std::fmt;
use tracing::{error, trace};

/// Per-wrapper-instance key into the anchor dictionary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrapperId(u64);

impl WrapperId {
    pub(crate) const fn from_serial(serial: u64) -> Self {
        Self(serial)
    }

    /// Anchor dictionary key for this wrapper.
    pub fn key(self) -> String {
        format!("{:x}", self.0)
    }
}

impl fmt::Display for WrapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Anchor-backed registry of strong host references.
pub struct WeakRegistry {
    anchor: DictId,
    next_serial: u64,
}

impl WeakRegistry {
    /// Create the anchor dictionary and root it in the special variables.
    pub fn new(host: &dyn HostServices) -> BridgeResult<Self> {
        let anchor = host.dict_alloc()?;
        // The special-variable entry takes over the allocation's reference.
        host.set_special(reserved::WEAK_ANCHOR, HostValue::Dict(anchor))?;
        Ok(Self {
            anchor,
            next_serial: 0,
        })
    }

    /// The anchor dictionary.
    pub fn anchor(&self) -> DictId {
        self.anchor
    }

    /// Store `value`, which must carry an owned reference, under a fresh key.
    pub fn register(&mut self, host: &dyn HostServices, value: HostValue) -> BridgeResult<WrapperId> {
        self.next_serial += 1;
        let id = WrapperId(self.next_serial);
        trace!(wrapper = %id, kind = value.type_name(), "register");
        host.dict_set(self.anchor, &id.key(), value)?;
        Ok(id)
    }

    /// Remove the entry of a collected wrapper, dropping exactly one host
    /// reference.
    ///
    /// A missing entry means the bookkeeping diverged; it is reported through
    /// the host's error channel and returned.
    pub fn unregister(&mut self, host: &dyn HostServices, id: WrapperId) -> BridgeResult<()> {
        trace!(wrapper = %id, "unregister");
        if host.dict_remove(self.anchor, &id.key()) {
            return Ok(());
        }
        let err = BridgeError::internal(format!("weak registry entry {} is missing", id));
        error!(wrapper = %id, "{}", err);
        host.report_error(&err.to_string());
        Err(err)
    }

    /// Number of live entries.
    pub fn len(&self, host: &dyn HostServices) -> usize {
        host.dict_len(self.anchor)
    }

    pub fn is_empty(&self, host: &dyn HostServices) -> bool {
        self.len(host) == 0
    }

    /// Drop every entry and unroot the anchor.
    pub fn teardown(&mut self, host: &dyn HostServices) {
        let remaining = self.len(host);
        if remaining > 0 {
            trace!(remaining, "releasing registry entries");
        }
        host.dict_clear(self.anchor);
        host.dict_remove(host.special_vars(), reserved::WEAK_ANCHOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::memory_host::MemoryHost;

    #[test]
    fn test_register_holds_one_reference() {
        let host = MemoryHost::new();
        let mut registry = WeakRegistry::new(&host).unwrap();

        let list = host.list_alloc().unwrap();
        host.let_var("g:l", HostValue::List(list)).unwrap();
        let value = HostValue::List(list);

        let mut ids = Vec::new();
        for _ in 0..3 {
            host.retain(&value);
            ids.push(registry.register(&host, value.clone()).unwrap());
        }
        assert_eq!(host.refcount(&value), Some(4));
        assert_eq!(registry.len(&host), 3);

        for id in ids {
            registry.unregister(&host, id).unwrap();
        }
        assert_eq!(host.refcount(&value), Some(1));
        assert!(registry.is_empty(&host));
    }

    #[test]
    fn test_anchor_is_rooted_and_keys_are_hex() {
        let host = MemoryHost::new();
        let mut registry = WeakRegistry::new(&host).unwrap();
        assert_eq!(
            host.dict_get(host.special_vars(), reserved::WEAK_ANCHOR),
            Some(HostValue::Dict(registry.anchor()))
        );

        let mut last = None;
        for _ in 0..16 {
            last = Some(registry.register(&host, HostValue::Number(0)).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.key(), "10");
        assert!(host.dict_get(registry.anchor(), "10").is_some());
    }

    #[test]
    fn test_missing_entry_is_reported() {
        let host = MemoryHost::new();
        let mut registry = WeakRegistry::new(&host).unwrap();
        let id = registry.register(&host, HostValue::Number(1)).unwrap();
        registry.unregister(&host, id).unwrap();

        let err = registry.unregister(&host, id).unwrap_err();
        assert!(matches!(err, BridgeError::Internal(_)));
        assert_eq!(host.errors().len(), 1);
        assert!(host.errors()[0].contains("weak registry entry 1 is missing"));
    }

    #[test]
    fn test_teardown_releases_everything() {
        let host = MemoryHost::new();
        let baseline = host.live_containers();
        let mut registry = WeakRegistry::new(&host).unwrap();
        let dict = host.dict_alloc().unwrap();
        registry.register(&host, HostValue::Dict(dict)).unwrap();

        registry.teardown(&host);
        assert_eq!(host.refcount(&HostValue::Dict(dict)), None);
        assert_eq!(host.live_containers(), baseline);
    }
}
