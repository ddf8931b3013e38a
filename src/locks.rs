//! Coordination between concurrent fetches and sweeps.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    thread,
};

use tracing::warn;

use crate::{errors::GribArchiveErr, models::ArtifactKey};

/// Locks shared by everything that touches one archive during a run.
///
/// * At most one thread works on a given [`ArtifactKey`] at a time, so "check the index, download,
///   insert" happens once per key even when the same key is requested concurrently.
/// * Fetches hold the sweep gate shared, sweeps hold it exclusively, so a sweep never interleaves
///   with a download that is between writing its file and indexing it.
#[derive(Debug, Default)]
pub struct ArchiveLocks {
    in_flight: Mutex<HashSet<ArtifactKey>>,
    released: Condvar,
    sweep_gate: RwLock<()>,
}

/// Held while a key is being worked on. Dropping it lets the next waiter for the key proceed.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a ArchiveLocks,
    key: ArtifactKey,
}

impl ArchiveLocks {
    /// Create a new, unlocked set of locks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no one else is working on `key`, then claim it.
    pub fn claim(&self, key: &ArtifactKey) -> Result<KeyGuard<'_>, GribArchiveErr> {
        let mut in_flight = self.in_flight.lock().map_err(|_| Self::poisoned())?;

        while in_flight.contains(key) {
            in_flight = self.released.wait(in_flight).map_err(|_| Self::poisoned())?;
        }
        in_flight.insert(key.clone());

        Ok(KeyGuard {
            locks: self,
            key: key.clone(),
        })
    }

    /// Shared access, held across one fetch.
    pub fn fetch_gate(&self) -> Result<RwLockReadGuard<'_, ()>, GribArchiveErr> {
        self.sweep_gate.read().map_err(|_| Self::poisoned())
    }

    /// Exclusive access, held across one sweep.
    pub fn sweep_gate(&self) -> Result<RwLockWriteGuard<'_, ()>, GribArchiveErr> {
        self.sweep_gate.write().map_err(|_| Self::poisoned())
    }

    fn poisoned() -> GribArchiveErr {
        GribArchiveErr::LogicError("archive lock poisoned")
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Never panic in drop; a poisoned set still needs the key released.
        let mut in_flight = match self.locks.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&self.key);
        self.locks.released.notify_all();
    }
}

/// A flag to ask running fan-outs to stop taking new work.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask everyone holding a clone of this flag to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Has [`cancel`](Self::cancel) been called?
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel when the process is asked to shut down (SIGINT or SIGTERM, Ctrl-C elsewhere).
    ///
    /// In-flight downloads finish and nothing new starts. A second signal exits at once.
    pub fn cancel_on_shutdown(&self) -> Result<(), GribArchiveErr> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        // Register in the caller so a signal arriving right after this returns is not missed.
        #[cfg(unix)]
        let (mut sigint, mut sigterm) = {
            use tokio::signal::unix::{signal, SignalKind};

            let _enter = runtime.enter();
            (
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
            )
        };

        let flag = self.clone();
        thread::Builder::new()
            .name("shutdown".to_owned())
            .spawn(move || {
                runtime.block_on(async {
                    #[cfg(unix)]
                    {
                        tokio::select! {
                            _ = sigint.recv() => {}
                            _ = sigterm.recv() => {}
                        }
                        warn!("shutdown requested, letting in-flight downloads finish");
                        flag.cancel();

                        tokio::select! {
                            _ = sigint.recv() => {}
                            _ = sigterm.recv() => {}
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        let _ = tokio::signal::ctrl_c().await;
                        warn!("shutdown requested, letting in-flight downloads finish");
                        flag.cancel();

                        let _ = tokio::signal::ctrl_c().await;
                    }
                });

                warn!("second shutdown request, exiting");
                std::process::exit(130);
            })?;

        Ok(())
    }
}
