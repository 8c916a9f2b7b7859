//! Lazily constructed, reference-counted engine factory
//!
//! The engine factory, its worker thread and the audio device are expensive
//! and must exist at most once per registry. The first [`acquire`] builds
//! them; every [`FactoryHandle`] counts as one holder; the release of the
//! last holder tears everything down and returns the registry to
//! [`RegistryState::Uninitialized`], ready to build a fresh generation.
//!
//! [`acquire`]: ConnectionFactoryRegistry::acquire

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use callback_queue::{Guarded, Released};
use parking_lot::Condvar;
use rtc_engine::{AudioDevice, EngineFactory, EngineProvider};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::worker::{Worker, WorkerHandle};

static GLOBAL: OnceLock<Arc<ConnectionFactoryRegistry>> = OnceLock::new();

/// Lifecycle of the shared factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryState {
    Uninitialized,
    /// Construction in progress outside the lock
    Acquiring,
    Ready,
    /// Teardown in progress outside the lock
    Releasing,
}

impl fmt::Display for RegistryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistryState::Uninitialized => "uninitialized",
            RegistryState::Acquiring => "acquiring",
            RegistryState::Ready => "ready",
            RegistryState::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// The objects one generation of the registry owns
struct Live {
    factory: Arc<dyn EngineFactory>,
    audio_device: Option<Arc<dyn AudioDevice>>,
    worker: Worker,
}

impl Live {
    /// Stop the worker, drop the factory, then stop the audio device
    fn teardown(self) {
        let Live {
            factory,
            audio_device,
            worker,
        } = self;

        worker.shutdown();
        drop(factory);
        if let Some(device) = audio_device {
            device.terminate();
        }
    }
}

struct RegistryInner {
    state: RegistryState,
    holders: usize,
    generation: u64,
    live: Option<Live>,
}

/// Owner of the process-wide `{factory, worker, audio device}` triple
pub struct ConnectionFactoryRegistry {
    provider: Arc<dyn EngineProvider>,
    config: BridgeConfig,
    inner: Guarded<RegistryInner>,
    changed: Condvar,
}

impl ConnectionFactoryRegistry {
    pub fn new(provider: Arc<dyn EngineProvider>, config: BridgeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            provider,
            config,
            inner: Guarded::new(
                "factory-registry",
                RegistryInner {
                    state: RegistryState::Uninitialized,
                    holders: 0,
                    generation: 0,
                    live: None,
                },
            ),
            changed: Condvar::new(),
        }))
    }

    /// Install the process-wide registry
    pub fn install_global(
        provider: Arc<dyn EngineProvider>,
        config: BridgeConfig,
    ) -> Result<Arc<Self>> {
        let registry = Self::new(provider, config)?;
        GLOBAL
            .set(Arc::clone(&registry))
            .map_err(|_| BridgeError::GlobalAlreadyInstalled)?;
        tracing::debug!("global factory registry installed");
        Ok(registry)
    }

    /// The process-wide registry, if installed
    pub fn global() -> Option<Arc<Self>> {
        GLOBAL.get().cloned()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> RegistryState {
        self.inner.lock().state
    }

    /// Number of live handles
    pub fn holders(&self) -> usize {
        self.inner.lock().holders
    }

    /// Number of factories constructed so far
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Get a handle to the shared factory, constructing it if needed
    ///
    /// Concurrent callers during construction or teardown wait for it to
    /// finish; the factory is never built twice at once. A construction
    /// failure leaves the registry uninitialized.
    pub fn acquire(self: &Arc<Self>) -> Result<FactoryHandle> {
        {
            let mut inner = self.inner.lock();
            inner.wait_while(&self.changed, |inner| {
                matches!(inner.state, RegistryState::Acquiring | RegistryState::Releasing)
            });

            if inner.state == RegistryState::Ready {
                if let Some(live) = inner.live.as_ref() {
                    let handle = self.handle_for(live, inner.generation);
                    inner.holders += 1;
                    return Ok(handle);
                }
            }

            inner.state = RegistryState::Acquiring;
        }

        tracing::debug!("constructing engine factory");
        let built = self.construct();

        let mut inner = self.inner.lock();
        let result = match built {
            Ok(live) => {
                inner.generation += 1;
                inner.holders += 1;
                let handle = self.handle_for(&live, inner.generation);
                inner.live = Some(live);
                inner.state = RegistryState::Ready;
                tracing::debug!(generation = inner.generation, "engine factory ready");
                Ok(handle)
            }
            Err(e) => {
                inner.state = RegistryState::Uninitialized;
                tracing::warn!("engine factory construction failed: {}", e);
                Err(e)
            }
        };
        self.changed.notify_all();
        result
    }

    fn handle_for(self: &Arc<Self>, live: &Live, generation: u64) -> FactoryHandle {
        FactoryHandle {
            registry: Arc::clone(self),
            factory: Arc::downgrade(&live.factory),
            worker: live.worker.handle().clone(),
            generation,
            released: false,
        }
    }

    fn construct(&self) -> Result<Live> {
        let audio_device = if self.config.use_audio_device {
            self.provider
                .create_audio_device()
                .map_err(BridgeError::FactoryCreation)?
        } else {
            None
        };

        let factory = match self.provider.create_factory(audio_device.clone()) {
            Ok(factory) => factory,
            Err(e) => {
                if let Some(device) = &audio_device {
                    device.terminate();
                }
                return Err(BridgeError::FactoryCreation(e));
            }
        };

        let worker = match Worker::spawn(&self.config.worker_thread_name) {
            Ok(worker) => worker,
            Err(e) => {
                drop(factory);
                if let Some(device) = &audio_device {
                    device.terminate();
                }
                return Err(e);
            }
        };

        Ok(Live {
            factory,
            audio_device,
            worker,
        })
    }

    fn retain(&self) {
        let mut inner = self.inner.lock();
        debug_assert_eq!(
            inner.state,
            RegistryState::Ready,
            "retain on a registry without a factory"
        );
        inner.holders += 1;
    }

    fn release_one(&self) -> Released {
        let live = {
            let mut inner = self.inner.lock();
            debug_assert!(inner.holders > 0, "factory handle released twice");
            inner.holders = inner.holders.saturating_sub(1);
            if inner.holders > 0 {
                return Released::Alive;
            }
            inner.state = RegistryState::Releasing;
            inner.live.take()
        };

        tracing::debug!("last factory handle released; tearing down");
        if let Some(live) = live {
            live.teardown();
        }

        self.inner.lock().state = RegistryState::Uninitialized;
        self.changed.notify_all();
        Released::Destroyed
    }
}

impl fmt::Debug for ConnectionFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ConnectionFactoryRegistry")
            .field("state", &inner.state)
            .field("holders", &inner.holders)
            .field("generation", &inner.generation)
            .finish()
    }
}

/// One holder's reference to the shared factory
///
/// Cloning acquires another reference; dropping releases it. The registry
/// keeps the only strong reference to the factory, so teardown destroys it
/// before the audio device stops.
pub struct FactoryHandle {
    registry: Arc<ConnectionFactoryRegistry>,
    factory: Weak<dyn EngineFactory>,
    worker: WorkerHandle,
    generation: u64,
    released: bool,
}

impl FactoryHandle {
    /// The shared factory
    ///
    /// Fails with [`BridgeError::Closed`] only if the factory was torn down
    /// while this handle still counted as a holder.
    pub fn factory(&self) -> Result<Arc<dyn EngineFactory>> {
        self.factory.upgrade().ok_or(BridgeError::Closed)
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    /// Generation of the factory this handle refers to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn registry(&self) -> &Arc<ConnectionFactoryRegistry> {
        &self.registry
    }

    /// Release this reference
    ///
    /// Returns [`Released::Destroyed`] when this was the last holder; the
    /// factory, worker and audio device are gone by the time it returns.
    pub fn release(mut self) -> Released {
        self.released = true;
        self.registry.release_one()
    }
}

impl Clone for FactoryHandle {
    fn clone(&self) -> Self {
        self.registry.retain();
        Self {
            registry: Arc::clone(&self.registry),
            factory: Weak::clone(&self.factory),
            worker: self.worker.clone(),
            generation: self.generation,
            released: false,
        }
    }
}

impl Drop for FactoryHandle {
    fn drop(&mut self) {
        if !self.released {
            self.registry.release_one();
        }
    }
}

impl fmt::Debug for FactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryHandle")
            .field("generation", &self.generation)
            .finish()
    }
}
