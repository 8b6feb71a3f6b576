//! Scope stack and shared-instance storage.
//!
//! Scopes form a stack: index 0 is the root, where singletons live; each
//! `begin_scope` pushes a fresh scope for scoped instances and `end_scope`
//! pops it, running terminators over its instances in reverse insertion
//! order. The root can never be popped.

use crate::definition::Lifetime;
use crate::error::{ResolutionError, Result};
use crate::value::Instance;
use ahash::RandomState;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[cfg(feature = "logging")]
use tracing::debug;

/// Unique scope identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
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

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

#[derive(Default)]
struct ScopeStore {
    map: HashMap<String, Instance, RandomState>,
    order: Vec<String>,
}

/// One scope: an insertion-ordered identifier-to-instance map.
pub struct Scope {
    id: ScopeId,
    store: RwLock<ScopeStore>,
}

impl Scope {
    fn new() -> Self {
        Self {
            id: ScopeId::new(),
            store: RwLock::new(ScopeStore::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn get(&self, identifier: &str) -> Option<Instance> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .get(identifier)
            .cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .contains_key(identifier)
    }

    pub fn put(&self, identifier: &str, instance: Instance) {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        if store.map.insert(identifier.to_string(), instance).is_none() {
            store.order.push(identifier.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.map.clear();
        store.order.clear();
    }

    /// Instances in reverse insertion order, for terminators.
    fn drain_reversed(&self) -> Vec<(String, Instance)> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::with_capacity(store.order.len());
        while let Some(identifier) = store.order.pop() {
            if let Some(instance) = store.map.remove(&identifier) {
                out.push((identifier, instance));
            }
        }
        out
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("instances", &self.len())
            .finish()
    }
}

/// Called per scoped instance when its scope ends.
pub type Terminator = Arc<dyn Fn(&str, &Instance) + Send + Sync>;

/// The scope stack plus per-identifier build locks for shared lifetimes.
pub struct ScopeManager {
    stack: RwLock<Vec<Arc<Scope>>>,
    terminators: RwLock<Vec<Terminator>>,
    /// Serializes first construction of shared instances per identifier.
    build_locks: DashMap<String, Arc<Mutex<()>>, RandomState>,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self {
            stack: RwLock::new(vec![Arc::new(Scope::new())]),
            terminators: RwLock::new(Vec::new()),
            build_locks: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// The root scope, home of singletons.
    pub fn root(&self) -> Arc<Scope> {
        let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&stack[0])
    }

    /// The top of the stack.
    pub fn current(&self) -> Arc<Scope> {
        let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(stack.last().unwrap_or(&stack[0]))
    }

    /// Number of scopes on the stack, root included.
    pub fn depth(&self) -> usize {
        self.stack
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Push a fresh scope.
    pub fn begin_scope(&self) -> ScopeId {
        let scope = Arc::new(Scope::new());
        let id = scope.id();
        self.stack
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(scope);

        #[cfg(feature = "logging")]
        debug!(
            target: "keystone_di",
            scope_id = id.id(),
            depth = self.depth(),
            "Scope opened"
        );

        id
    }

    /// Pop and discard the top scope, running terminators over its instances.
    pub fn end_scope(&self) -> Result<()> {
        let popped = {
            let mut stack = self.stack.write().unwrap_or_else(PoisonError::into_inner);
            if stack.len() <= 1 {
                return Err(ResolutionError::scope_violation(
                    "cannot pop the root scope",
                ));
            }
            stack.pop()
        };

        if let Some(scope) = popped {
            #[cfg(feature = "logging")]
            debug!(
                target: "keystone_di",
                scope_id = scope.id().id(),
                instances = scope.len(),
                "Scope closed"
            );

            let terminators = self
                .terminators
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for (identifier, instance) in scope.drain_reversed() {
                for terminator in &terminators {
                    terminator(&identifier, &instance);
                }
            }
        }
        Ok(())
    }

    /// Search the stack from top to bottom.
    pub fn has(&self, identifier: &str) -> bool {
        let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
        stack.iter().rev().any(|scope| scope.contains(identifier))
    }

    /// First instance found searching from the top down.
    pub fn lookup(&self, identifier: &str) -> Option<Instance> {
        let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
        stack.iter().rev().find_map(|scope| scope.get(identifier))
    }

    /// Lifetime-directed lookup: singletons against the root, scoped against
    /// the current scope.
    pub fn lookup_for(&self, identifier: &str, lifetime: Lifetime) -> Result<Option<Instance>> {
        match lifetime {
            Lifetime::Singleton | Lifetime::Instance => {
                let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
                Ok(stack[0].get(identifier))
            }
            Lifetime::Scoped => {
                let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
                if stack.len() <= 1 {
                    return Err(ResolutionError::scope_violation(format!(
                        "scoped service `{identifier}` requested outside any scope"
                    )));
                }
                Ok(stack[stack.len() - 1].get(identifier))
            }
            Lifetime::Transient => Ok(None),
        }
    }

    /// Store per lifetime: singletons into the root, scoped into the top,
    /// transients nowhere.
    pub fn put(&self, identifier: &str, instance: Instance, lifetime: Lifetime) -> Result<()> {
        match lifetime {
            Lifetime::Singleton => {
                let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
                stack[0].put(identifier, instance);
                Ok(())
            }
            Lifetime::Scoped => {
                let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
                if stack.len() <= 1 {
                    return Err(ResolutionError::scope_violation(format!(
                        "scoped service `{identifier}` resolved outside any scope"
                    )));
                }
                stack[stack.len() - 1].put(identifier, instance);
                Ok(())
            }
            Lifetime::Transient | Lifetime::Instance => Ok(()),
        }
    }

    /// Register a terminator run for every scoped instance on scope end.
    pub fn with_terminator<F>(&self, terminator: F)
    where
        F: Fn(&str, &Instance) + Send + Sync + 'static,
    {
        self.terminators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(terminator));
    }

    /// Per-identifier lock serializing the first build of a shared instance.
    pub fn build_lock(&self, identifier: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.build_locks
                .entry(identifier.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop every stored singleton.
    pub fn clear_root(&self) {
        let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
        stack[0].clear();
    }
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeManager")
            .field("depth", &self.depth())
            .finish()
    }
}

/// RAII wrapper: ends the scope on drop, on every exit path.
pub struct ScopeGuard {
    manager: Arc<ScopeManager>,
    id: ScopeId,
    ended: bool,
}

impl ScopeGuard {
    pub(crate) fn open(manager: Arc<ScopeManager>) -> Self {
        let id = manager.begin_scope();
        Self {
            manager,
            id,
            ended: false,
        }
    }

    #[inline]
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// End the scope eagerly instead of on drop.
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        self.manager.end_scope()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self.manager.end_scope();
        }
    }
}
