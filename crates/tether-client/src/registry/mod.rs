//! Process-wide set of clients, one per target machine.
//!
//! [`ClientRegistry`] is an ordinary value: construct one where the process
//! lifetime is managed and pass it around. Each machine key owns its own slot
//! lock, so connecting a client for one machine never blocks lookups for
//! another; the map lock is held only to find or insert a slot.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::client::Client;
use crate::error::ClientError;

const REGISTRY_TARGET: &str = "tether_client::registry";

/// Machine key used when the caller does not name one.
#[must_use]
pub fn default_machine() -> &'static str {
    std::env::consts::ARCH
}

fn machine_key(machine: Option<&str>) -> &str {
    match machine {
        Some(name) => name,
        None => default_machine(),
    }
}

/// Builds the client serving one machine.
pub trait ClientFactory: Send + Sync {
    /// Connects a new client for `machine`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the client cannot be connected.
    fn connect(&self, machine: &str) -> Result<Client, ClientError>;
}

impl<F> ClientFactory for F
where
    F: Fn(&str) -> Result<Client, ClientError> + Send + Sync,
{
    fn connect(&self, machine: &str) -> Result<Client, ClientError> {
        self(machine)
    }
}

type Slot = Mutex<Option<Arc<Client>>>;

/// Lazily connected clients keyed by machine.
pub struct ClientRegistry<F> {
    factory: F,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl<F: ClientFactory> ClientRegistry<F> {
    /// Creates an empty registry connecting clients through `factory`.
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the open client for `machine`, connecting it if needed.
    ///
    /// `None` selects [`default_machine`]. Concurrent callers for one machine
    /// share a single connection attempt; a closed client is replaced.
    ///
    /// # Errors
    ///
    /// Returns the factory's [`ClientError`]; the slot stays empty so a
    /// later call retries.
    pub fn get_or_connect(&self, machine: Option<&str>) -> Result<Arc<Client>, ClientError> {
        let key = machine_key(machine);
        let slot = Arc::clone(self.slots().entry(key.to_owned()).or_default());
        let mut current = lock(&slot);
        if let Some(client) = current.as_ref()
            && !client.is_closed()
        {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(self.factory.connect(key)?);
        debug!(target: REGISTRY_TARGET, machine = key, "connected client");
        *current = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Returns the client for `machine` without connecting one.
    #[must_use]
    pub fn get(&self, machine: Option<&str>) -> Option<Arc<Client>> {
        let key = machine_key(machine);
        let slot = self.slots().get(key).cloned()?;
        let current = lock(&slot);
        current.clone()
    }

    /// Forgets the client for `machine` and hands it to the caller.
    pub fn remove(&self, machine: Option<&str>) -> Option<Arc<Client>> {
        let key = machine_key(machine);
        let slot = self.slots().remove(key)?;
        let mut current = lock(&slot);
        current.take()
    }

    /// Machines with a registered slot.
    #[must_use]
    pub fn machines(&self) -> Vec<String> {
        self.slots().keys().cloned().collect()
    }

    /// Removes and closes every client.
    ///
    /// Returns the machines whose client failed to close, with the failure.
    pub fn close_all(&self, timeout: Option<Duration>) -> Vec<(String, ClientError)> {
        let drained: Vec<(String, Arc<Slot>)> = self.slots().drain().collect();
        let mut failures = Vec::new();
        for (machine, slot) in drained {
            let Some(client) = lock(&slot).take() else {
                continue;
            };
            if let Err(error) = client.close(timeout) {
                warn!(target: REGISTRY_TARGET, machine, %error, "failed to close client");
                failures.push((machine, error));
            }
        }
        failures
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F> fmt::Debug for ClientRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let machines = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ClientRegistry")
            .field("machines", &machines)
            .finish_non_exhaustive()
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Arc<Client>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
