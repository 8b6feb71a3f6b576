//! Per-resolution state carrier.
//!
//! A context tracks one identifier under resolution: its parent in the
//! dependency chain, the depth, the trace id shared by the whole tree, the
//! resolution flags, caller overrides, and a once-set slot for the resolved
//! instance. Cycle detection walks the parent chain.

use crate::error::{ResolutionError, Result};
use crate::value::{ArgumentValue, Instance};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Identifier shared by every context in one resolution tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u64);

impl TraceId {
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trace-{}", self.0)
    }
}

/// Behavior switches a resolution runs under.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionFlags {
    pub strict: bool,
    pub auto_define: bool,
    pub dev_mode: bool,
}

/// State carrier for one identifier under resolution.
pub struct KernelContext {
    service_id: String,
    parent: Option<Arc<KernelContext>>,
    depth: u32,
    trace_id: TraceId,
    flags: ResolutionFlags,
    overrides: Arc<HashMap<String, ArgumentValue>>,
    deadline: Option<Instant>,
    resolved: OnceCell<Instance>,
    meta: Mutex<HashMap<String, serde_json::Value>>,
}

impl KernelContext {
    /// Root context for a fresh resolution.
    pub fn root(
        service_id: impl Into<String>,
        flags: ResolutionFlags,
        overrides: HashMap<String, ArgumentValue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_id: service_id.into(),
            parent: None,
            depth: 0,
            trace_id: TraceId::new(),
            flags,
            overrides: Arc::new(overrides),
            deadline: None,
            resolved: OnceCell::new(),
            meta: Mutex::new(HashMap::new()),
        })
    }

    /// Root context with a resolution deadline.
    pub fn root_with_deadline(
        service_id: impl Into<String>,
        flags: ResolutionFlags,
        overrides: HashMap<String, ArgumentValue>,
        deadline: Instant,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_id: service_id.into(),
            parent: None,
            depth: 0,
            trace_id: TraceId::new(),
            flags,
            overrides: Arc::new(overrides),
            deadline: Some(deadline),
            resolved: OnceCell::new(),
            meta: Mutex::new(HashMap::new()),
        })
    }

    /// Child context: depth + 1, inherited trace id, flags, deadline, and
    /// overrides.
    pub fn child(self: &Arc<Self>, service_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            service_id: service_id.into(),
            parent: Some(Arc::clone(self)),
            depth: self.depth + 1,
            trace_id: self.trace_id,
            flags: self.flags,
            overrides: Arc::clone(&self.overrides),
            deadline: self.deadline,
            resolved: OnceCell::new(),
            meta: Mutex::new(HashMap::new()),
        })
    }

    /// Child context whose overrides replace the inherited ones (decorators,
    /// contextual redirects).
    pub fn child_with_overrides(
        self: &Arc<Self>,
        service_id: impl Into<String>,
        overrides: HashMap<String, ArgumentValue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_id: service_id.into(),
            parent: Some(Arc::clone(self)),
            depth: self.depth + 1,
            trace_id: self.trace_id,
            flags: self.flags,
            overrides: Arc::new(overrides),
            deadline: self.deadline,
            resolved: OnceCell::new(),
            meta: Mutex::new(HashMap::new()),
        })
    }

    #[inline]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    #[inline]
    pub fn parent(&self) -> Option<&Arc<KernelContext>> {
        self.parent.as_ref()
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    #[inline]
    pub fn flags(&self) -> ResolutionFlags {
        self.flags
    }

    #[inline]
    pub fn overrides(&self) -> &HashMap<String, ArgumentValue> {
        &self.overrides
    }

    /// Whether `identifier` appears anywhere in this chain, self included.
    pub fn contains(&self, identifier: &str) -> bool {
        let mut cursor = Some(self);
        while let Some(ctx) = cursor {
            if ctx.service_id == identifier {
                return true;
            }
            cursor = ctx.parent.as_deref();
        }
        false
    }

    /// Identifier chain from the resolution root down to this context.
    pub fn path(&self) -> Vec<String> {
        let mut path = Vec::with_capacity(self.depth as usize + 1);
        let mut cursor = Some(self);
        while let Some(ctx) = cursor {
            path.push(ctx.service_id.clone());
            cursor = ctx.parent.as_deref();
        }
        path.reverse();
        path
    }

    /// Store the resolved instance. Resolving twice on one context is fatal.
    pub fn set_resolved(&self, instance: Instance) -> Result<()> {
        self.resolved.set(instance).map_err(|_| {
            ResolutionError::container_state(format!(
                "context for `{}` was resolved twice",
                self.service_id
            ))
        })
    }

    #[inline]
    pub fn resolved(&self) -> Option<&Instance> {
        self.resolved.get()
    }

    /// First-write-wins metadata. Returns false when the key was already set.
    pub fn set_meta_once(&self, key: impl Into<String>, value: serde_json::Value) -> bool {
        let mut meta = self.meta.lock().unwrap_or_else(PoisonError::into_inner);
        match meta.entry(key.into()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    pub fn meta(&self, key: &str) -> Option<serde_json::Value> {
        self.meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the deadline, if any, has passed.
    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl std::fmt::Debug for KernelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelContext")
            .field("service_id", &self.service_id)
            .field("depth", &self.depth)
            .field("trace_id", &self.trace_id)
            .field("has_parent", &self.parent.is_some())
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}
