//! Process-wide registry resolving "the database context for this thread".
//!
//! The registry is built once on the main thread and owns the main context.
//! Worker threads create their own context and register it; lookups from a
//! worker scan the registered entries for one owned by the calling thread.
//! Entries are weak: the registry never keeps a context alive.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::ThreadId;

use keel_types::ThreadAffinity;

use crate::connection::DbRuntimeSettings;
use crate::context::{Context, ContextHandle};
use crate::error::DbError;

struct RegistryEntry {
    owner: ThreadId,
    context: Weak<Mutex<Context>>,
}

/// Resolves database contexts by thread identity.
pub struct ContextRegistry {
    main_thread: ThreadId,
    main: ContextHandle,
    affinity: ThreadAffinity,
    entries: RwLock<Vec<RegistryEntry>>,
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("main_thread", &self.main_thread)
            .field("affinity", &self.affinity)
            .field("registered", &self.len())
            .finish()
    }
}

impl ContextRegistry {
    /// Creates a registry whose main thread is the calling thread.
    ///
    /// `main` becomes the context returned to the main thread.
    pub fn new(main: Context, affinity: ThreadAffinity) -> Self {
        Self {
            main_thread: std::thread::current().id(),
            main: ContextHandle::new(main),
            affinity,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Returns the main thread's context.
    pub fn main(&self) -> &ContextHandle {
        &self.main
    }

    /// Returns the thread the registry was created on.
    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    /// Returns `true` when called from the main thread.
    pub fn is_main_thread(&self) -> bool {
        std::thread::current().id() == self.main_thread
    }

    /// Returns the policy applied to unregistered threads.
    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    /// Number of registered contexts that are still alive.
    pub fn len(&self) -> usize {
        self.read_entries()
            .iter()
            .filter(|entry| entry.context.strong_count() > 0)
            .count()
    }

    /// Returns `true` if no live context is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `context` as the context of the thread that owns it.
    ///
    /// The caller is expected to register from the owning thread; the owner
    /// is not checked against the calling thread.
    pub fn register_thread_context(&self, context: &ContextHandle) {
        let mut entries = self.write_entries();
        entries.retain(|entry| entry.context.strong_count() > 0);
        entries.push(RegistryEntry {
            owner: context.owner(),
            context: context.downgrade(),
        });
        tracing::debug!(thread = ?context.owner(), "registered thread database context");
    }

    /// Removes every context registered for the calling thread.
    ///
    /// Returns the number of entries removed.
    pub fn deregister_thread_contexts(&self) -> usize {
        let current = std::thread::current().id();
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|entry| entry.owner != current);
        before - entries.len()
    }

    /// Removes `context` (and any dead entries) from the registry.
    pub(crate) fn deregister_context(&self, context: &ContextHandle) {
        let target = context.downgrade();
        let mut entries = self.write_entries();
        entries.retain(|entry| entry.context.strong_count() > 0 && !entry.context.ptr_eq(&target));
    }

    /// Returns the context for the calling thread.
    ///
    /// The main thread always gets the main context. Other threads get the
    /// context they registered.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NoThreadContext` if a non-main thread has no live
    /// registered context and the policy is [`ThreadAffinity::Strict`]. With
    /// [`ThreadAffinity::FallbackToMain`] the main context is returned
    /// instead. Either way a warning is logged.
    pub fn global(&self) -> Result<ContextHandle, DbError> {
        let current = std::thread::current().id();
        if current == self.main_thread {
            return Ok(self.main.clone());
        }

        {
            let entries = self.read_entries();
            for entry in entries.iter().filter(|entry| entry.owner == current) {
                if let Some(inner) = entry.context.upgrade() {
                    return Ok(ContextHandle::from_parts(entry.owner, inner));
                }
            }
        }

        tracing::warn!(
            thread = ?current,
            policy = self.affinity.as_str(),
            "a non-main thread is requesting the global database connection context"
        );

        match self.affinity {
            ThreadAffinity::Strict => Err(DbError::NoThreadContext { thread: current }),
            ThreadAffinity::FallbackToMain => Ok(self.main.clone()),
        }
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, Vec<RegistryEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // Entries are plain ids and weak references; a panic while
                // holding the lock cannot leave them half-written.
                tracing::error!("context registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, Vec<RegistryEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("context registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// A worker thread's registered context.
///
/// Created and dropped on the same thread: construction opens a context for
/// the calling thread and registers it, drop deregisters and closes it.
#[derive(Debug)]
pub struct ThreadContext {
    handle: ContextHandle,
    registry: Arc<ContextRegistry>,
    // Tied to the creating thread.
    _not_send: PhantomData<*const ()>,
}

impl ThreadContext {
    /// Opens a context on `path` for the calling thread and registers it.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Open` if the connections cannot be opened; nothing
    /// is registered in that case.
    pub fn open(
        registry: &Arc<ContextRegistry>,
        path: impl AsRef<Path>,
        settings: DbRuntimeSettings,
    ) -> Result<Self, DbError> {
        let context = Context::with_path(path, settings)?;
        Ok(Self::register(registry, context))
    }

    /// Registers an already constructed context.
    ///
    /// `context` should have been created on the calling thread, otherwise
    /// lookups from this thread will not find it.
    pub fn register(registry: &Arc<ContextRegistry>, context: Context) -> Self {
        let handle = ContextHandle::new(context);
        registry.register_thread_context(&handle);
        Self {
            handle,
            registry: Arc::clone(registry),
            _not_send: PhantomData,
        }
    }

    /// Returns the shared handle to the context.
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.registry.deregister_context(&self.handle);
        match self.handle.lock() {
            // close() logs its own failures.
            Ok(mut context) => {
                let _ = context.close();
            }
            Err(e) => tracing::error!(error = %e, "could not close thread database context"),
        }
    }
}
