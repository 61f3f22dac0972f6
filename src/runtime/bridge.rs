//! Per-context bridge state.
//!
//! One [`Bridge`] exists per script context. It is stored in an isolate slot
//! so interceptor and constructor callbacks can reach it, and it owns every
//! table that ties wrappers to host containers: the weak registry, the
//! identity cache, and the queue of wrappers the engine has collected.
//!
//! Wrapper finalizers run inside the garbage collector, possibly while a host
//! operation is half done, so they only enqueue. The queue is drained at safe
//! points by [`Bridge::collect_pending`].

use super::cache::ObjectCache;
use super::error::{BridgeError, BridgeResult};
use super::host::HostServices;
use super::host_value::{DepthGuard, HostValue, IdentityKey};
use super::registry::{WeakRegistry, WrapperId};
use deno_core::v8;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// A wrapper the engine has collected, waiting for its registry entry to be
/// released.
struct Collected {
    wrapper: WrapperId,
    identity: Option<IdentityKey>,
}

/// Wrapper kinds that are built through a constructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContainerKind {
    List,
    Dict,
}

impl ContainerKind {
    pub(crate) fn of(value: &HostValue) -> Option<Self> {
        match value {
            HostValue::List(_) => Some(Self::List),
            HostValue::Dict(_) => Some(Self::Dict),
            _ => None,
        }
    }
}

/// Engine objects created once per context and reused for every wrapper.
pub(crate) struct Templates {
    pub list: v8::Global<v8::Function>,
    pub dict: v8::Global<v8::Function>,
    pub funcref_key: v8::Global<v8::Private>,
}

pub struct Bridge {
    host: Rc<dyn HostServices>,
    registry: RefCell<WeakRegistry>,
    cache: RefCell<ObjectCache<v8::Weak<v8::Object>>>,
    /// One finalizer-carrying weak handle per live wrapper.
    wrappers: RefCell<HashMap<WrapperId, v8::Weak<v8::Object>>>,
    collected: Rc<RefCell<Vec<Collected>>>,
    adopt: RefCell<Option<HostValue>>,
    templates: RefCell<Option<Templates>>,
    depth: RefCell<DepthGuard>,
    shut_down: RefCell<bool>,
}

/// Depth level held for the duration of one conversion step.
pub(crate) struct DepthScope<'b> {
    bridge: &'b Bridge,
}

impl Drop for DepthScope<'_> {
    fn drop(&mut self) {
        self.bridge.depth.borrow_mut().exit();
    }
}

impl Bridge {
    /// Create the bridge and root its registry anchor in the host.
    pub fn new(host: Rc<dyn HostServices>, max_depth: usize) -> BridgeResult<Rc<Self>> {
        let registry = WeakRegistry::new(host.as_ref())?;
        debug!(anchor = %registry.anchor(), max_depth, "bridge created");
        Ok(Rc::new(Self {
            host,
            registry: RefCell::new(registry),
            cache: RefCell::new(ObjectCache::new()),
            wrappers: RefCell::new(HashMap::new()),
            collected: Rc::new(RefCell::new(Vec::new())),
            adopt: RefCell::new(None),
            templates: RefCell::new(None),
            depth: RefCell::new(DepthGuard::new(max_depth)),
            shut_down: RefCell::new(false),
        }))
    }

    /// Fetch the bridge stored in the isolate.
    pub(crate) fn from_isolate(isolate: &mut v8::Isolate) -> Option<Rc<Self>> {
        isolate.get_slot::<Rc<Self>>().cloned()
    }

    pub fn host(&self) -> &dyn HostServices {
        self.host.as_ref()
    }

    pub(crate) fn set_templates(&self, templates: Templates) {
        *self.templates.borrow_mut() = Some(templates);
    }

    pub(crate) fn constructor<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        kind: ContainerKind,
    ) -> BridgeResult<v8::Local<'s, v8::Function>> {
        let templates = self.templates.borrow();
        let templates = templates
            .as_ref()
            .ok_or_else(|| BridgeError::internal("bridge templates are not installed"))?;
        let global = match kind {
            ContainerKind::List => &templates.list,
            ContainerKind::Dict => &templates.dict,
        };
        Ok(v8::Local::new(scope, global))
    }

    pub(crate) fn funcref_key<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
    ) -> BridgeResult<v8::Local<'s, v8::Private>> {
        let templates = self.templates.borrow();
        templates
            .as_ref()
            .map(|t| v8::Local::new(scope, &t.funcref_key))
            .ok_or_else(|| BridgeError::internal("bridge templates are not installed"))
    }

    /// Enter one conversion level.
    pub(crate) fn enter_depth(&self) -> BridgeResult<DepthScope<'_>> {
        self.depth
            .borrow_mut()
            .enter()
            .map_err(|limit| BridgeError::TooDeep { limit })?;
        Ok(DepthScope { bridge: self })
    }

    /// Hand a container to the next constructor call.
    pub(crate) fn set_adopt(&self, value: HostValue) {
        *self.adopt.borrow_mut() = Some(value);
    }

    pub(crate) fn take_adopt(&self) -> Option<HostValue> {
        self.adopt.borrow_mut().take()
    }

    /// Record an owned host reference for a new wrapper.
    pub(crate) fn register(&self, value: HostValue) -> BridgeResult<WrapperId> {
        self.registry.borrow_mut().register(self.host(), value)
    }

    /// The live cached wrapper for `identity`, if any.
    pub(crate) fn cached<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        identity: &IdentityKey,
    ) -> Option<v8::Local<'s, v8::Object>> {
        let cache = self.cache.borrow();
        cache.get(identity).and_then(|weak| weak.to_local(scope))
    }

    /// Arm the finalizer for a freshly registered wrapper and cache it as the
    /// wrapper of its identity.
    pub(crate) fn track(
        &self,
        scope: &mut v8::HandleScope<'_>,
        object: v8::Local<'_, v8::Object>,
        wrapper: WrapperId,
        identity: Option<IdentityKey>,
    ) {
        let collected = Rc::clone(&self.collected);
        let pending_identity = identity.clone();
        let finalizer = v8::Weak::with_finalizer(
            scope,
            object,
            Box::new(move |_: &mut v8::Isolate| {
                collected.borrow_mut().push(Collected {
                    wrapper,
                    identity: pending_identity,
                });
            }),
        );
        self.wrappers.borrow_mut().insert(wrapper, finalizer);

        if let Some(identity) = identity {
            let handle = v8::Weak::new(scope, object);
            trace!(wrapper = %wrapper, identity = %identity, "cached wrapper");
            self.cache.borrow_mut().insert(identity, wrapper, handle);
        }
    }

    /// Release the registry entries of wrappers the engine has collected.
    ///
    /// Returns how many wrappers were retired.
    pub fn collect_pending(&self) -> usize {
        let drained: Vec<Collected> = std::mem::take(&mut *self.collected.borrow_mut());
        if drained.is_empty() || *self.shut_down.borrow() {
            return 0;
        }
        let mut retired = 0;
        for Collected { wrapper, identity } in drained {
            self.wrappers.borrow_mut().remove(&wrapper);
            if let Some(identity) = identity {
                self.cache.borrow_mut().remove_if(&identity, wrapper);
            }
            // Failures are reported through the host by the registry.
            if self
                .registry
                .borrow_mut()
                .unregister(self.host(), wrapper)
                .is_ok()
            {
                retired += 1;
            }
        }
        trace!(retired, "collected wrappers");
        retired
    }

    /// Number of wrappers that are still alive as far as the bridge knows.
    pub fn live_wrappers(&self) -> usize {
        self.wrappers.borrow().len()
    }

    /// Number of entries in the weak registry.
    pub fn registry_len(&self) -> usize {
        self.registry.borrow().len(self.host())
    }

    /// Number of canonical wrappers in the identity cache.
    pub fn cached_wrappers(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Drop every wrapper link and release every registry entry.
    ///
    /// Must run while the isolate is still alive; weak handles are dropped
    /// here so their finalizers never fire afterwards.
    pub fn shutdown(&self) {
        if self.shut_down.replace(true) {
            return;
        }
        let dropped = self.wrappers.borrow_mut().drain().count();
        self.cache.borrow_mut().clear();
        self.collected.borrow_mut().clear();
        self.templates.borrow_mut().take();
        if let Some(value) = self.take_adopt() {
            warn!(kind = value.type_name(), "unconsumed adopt slot at shutdown");
        }
        self.registry.borrow_mut().teardown(self.host());
        debug!(wrappers = dropped, "bridge shut down");
    }
}
