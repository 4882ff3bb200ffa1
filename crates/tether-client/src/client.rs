//! The client facade: one connection, one dispatch thread, many objects.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_config::Config;
use tether_core::{
    DispatchLoop, DispatchLoopManager, HandlerRegistry, ManagerError, NotificationStream,
    RemoteStub,
};
use tether_rpc::{RpcConnection, RpcOptions};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::object::RemoteObject;

const CLIENT_TARGET: &str = "tether_client::client";

pub(crate) struct ClientCore {
    pub(crate) remote: Arc<dyn RemoteStub>,
    pub(crate) registry: Arc<HandlerRegistry>,
    stream: Arc<NotificationStream>,
    manager: DispatchLoopManager,
    closed: AtomicBool,
    outcome: Mutex<Option<i32>>,
}

impl ClientCore {
    pub(crate) fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

/// A connected client driving remote objects over one remote stub.
///
/// Dropping the client closes it with its configured timeout; call
/// [`close`](Self::close) to observe the outcome.
pub struct Client {
    core: Arc<ClientCore>,
    close_timeout: Duration,
}

impl Client {
    /// Waits for the host, then starts the dispatch thread.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] when the host is not ready in time and
    /// [`ClientError::Manager`] when the dispatch thread cannot start.
    pub fn connect(remote: Arc<dyn RemoteStub>, config: &Config) -> Result<Self, ClientError> {
        remote.ready(config.ready_timeout())?;
        let registry = Arc::new(HandlerRegistry::new(Arc::clone(&remote)));
        let stream = Arc::new(NotificationStream::new(
            Arc::clone(&remote),
            config.ack_queue_capacity(),
        ));
        let manager = DispatchLoopManager::new(Arc::new(DispatchLoop::new(
            Arc::clone(&registry),
            Arc::clone(&stream),
        )));
        manager.start()?;
        info!(target: CLIENT_TARGET, "client connected");
        Ok(Self {
            core: Arc::new(ClientCore {
                remote,
                registry,
                stream,
                manager,
                closed: AtomicBool::new(false),
                outcome: Mutex::new(None),
            }),
            close_timeout: config.close_timeout(),
        })
    }

    /// Connects through a framed JSON-RPC pipe pair.
    ///
    /// # Errors
    ///
    /// Returns the same failures as [`connect`](Self::connect), plus
    /// [`ClientError::Remote`] when the pipe reader cannot start.
    pub fn connect_pipes<R, W>(reader: R, writer: W, config: &Config) -> Result<Self, ClientError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let options = RpcOptions::new(config.call_timeout());
        let connection = RpcConnection::new(reader, writer, options)?;
        Self::connect(Arc::new(connection), config)
    }

    /// Creates a remote instance of `class_id` and indexes its members.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] after [`close`](Self::close) and
    /// [`ClientError::Remote`] when creating or describing the instance fails.
    pub fn create(&self, class_id: &str) -> Result<RemoteObject, ClientError> {
        self.core.ensure_open()?;
        let instance = self.core.remote.create(class_id)?;
        let members = match self.core.remote.describe(&instance) {
            Ok(members) => members,
            Err(error) => {
                if let Err(cleanup) = self.core.remote.destroy(&instance) {
                    debug!(
                        target: CLIENT_TARGET,
                        instance = %instance,
                        error = %cleanup,
                        "failed to destroy undescribed instance"
                    );
                }
                return Err(error.into());
            }
        };
        self.core.registry.register_instance(instance.clone());
        debug!(
            target: CLIENT_TARGET,
            class_id,
            instance = %instance,
            members = members.len(),
            "created remote object"
        );
        Ok(RemoteObject::new(
            Arc::clone(&self.core),
            class_id,
            instance,
            members,
        ))
    }

    /// Stops the dispatch thread and ends the event call.
    ///
    /// `None` waits indefinitely. A timed-out close leaves the client open
    /// and may be retried; once closed, every call returns the first outcome.
    /// Called from a notification handler, close marks the client closed and
    /// lets the loop finish after that handler returns; calling it again from
    /// another thread then collects the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Manager`] with the timeout, with
    /// [`ManagerError::StopFromDispatchThread`] when called from a handler, or
    /// with the dispatch loop's terminal failure.
    pub fn close(&self, timeout: Option<Duration>) -> Result<i32, ClientError> {
        if let Some(code) = *self.outcome() {
            return Ok(code);
        }
        let stopped = match self.core.manager.stop(timeout) {
            Err(error @ ManagerError::Timeout { .. }) => {
                warn!(target: CLIENT_TARGET, %error, "client close timed out");
                return Err(error.into());
            }
            Err(error @ ManagerError::StopFromDispatchThread) => {
                self.core.closed.store(true, Ordering::Release);
                info!(target: CLIENT_TARGET, "client close requested from a handler");
                return Err(error.into());
            }
            other => other,
        };
        if !self.core.closed.swap(true, Ordering::AcqRel) {
            if self.core.stream.is_open() {
                self.core.stream.cancel();
            }
            info!(target: CLIENT_TARGET, ok = stopped.is_ok(), "client closed");
        }
        let code = stopped?;
        *self.outcome() = Some(code);
        Ok(code)
    }

    /// Whether [`close`](Self::close) completed or was requested from a
    /// handler.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    /// Registry routing notifications of this client's objects.
    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.core.registry
    }

    /// Dispatch loop serving this client.
    #[must_use]
    pub fn dispatch(&self) -> &DispatchLoop {
        self.core.manager.dispatch()
    }

    fn outcome(&self) -> MutexGuard<'_, Option<i32>> {
        self.core
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("closed", &self.is_closed())
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.core.manager.is_running() {
            return;
        }
        if let Err(error) = self.close(Some(self.close_timeout)) {
            warn!(target: CLIENT_TARGET, %error, "failed to close client on drop");
        }
    }
}
