//! Listen and accept
//!
//! An actor may run at most one listener. The listen socket is a
//! [`DescriptorKind::Listener`](crate::DescriptorKind) descriptor owned by the
//! actor; its accept loop is a local task on the actor's worker that turns
//! every accepted connection into a connection descriptor, also owned by the
//! listening actor, and hands it to the callback.

use crate::context::ActorContext;
use crate::descriptor::DescriptorSpec;
use crate::error::{Result, RuntimeError};
use config::ListenOptions;
use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{DescriptorId, Dict, Value};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A connection handed to the accept callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub descriptor: DescriptorId,
    pub peer: SocketAddr,
}

impl Accepted {
    /// Opaque form for message payloads
    pub fn handle(&self) -> Value {
        Value::opaque(self.descriptor)
    }
}

/// Result of a successful [`ActorContext::listen`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub descriptor: DescriptorId,
    pub local_addr: SocketAddr,
}

/// Listener state kept on the owning actor's entry
pub(crate) struct ListenerSlot {
    descriptor: DescriptorId,
    port: u16,
    local_addr: SocketAddr,
    options: ListenOptions,
    accept_task: JoinHandle<()>,
}

impl ListenerSlot {
    pub(crate) fn descriptor(&self) -> DescriptorId {
        self.descriptor
    }

    /// Stop the accept loop; dropping the task closes the socket
    pub(crate) fn stop(self) {
        self.accept_task.abort();
        debug!(descriptor = %self.descriptor, port = self.port, "Accept loop stopped");
    }
}

impl fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("descriptor", &self.descriptor)
            .field("port", &self.port)
            .field("local_addr", &self.local_addr)
            .field("packet", &self.options.packet())
            .finish()
    }
}

impl ActorContext {
    /// Bind `port` on the configured address and start accepting.
    ///
    /// `options` are merged over the configured `[listen]` defaults. Port 0
    /// binds an ephemeral port; read it back from the returned [`Listener`].
    pub fn listen<F>(&self, port: u16, options: Option<&Dict>, on_accept: F) -> Result<Listener>
    where
        F: FnMut(&ActorContext, Accepted) + 'static,
    {
        if self.entry().listener.lock().is_some() {
            warn!(actor_id = %self.id(), port, "Listener already registered");
            return Err(RuntimeError::duplicate_listener(self.id(), port));
        }

        let config = self.config();
        let options = ListenOptions::build(config.payload_buckets, &config.listen, options)?;

        let address = format!("{}:{}", config.bind_address, port);
        let std_listener = StdTcpListener::bind((config.bind_address.as_str(), port))
            .map_err(|e| RuntimeError::bind(address.as_str(), e))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| RuntimeError::io("failed to configure listen socket", e))?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|e| RuntimeError::io("failed to read listen address", e))?;
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| RuntimeError::io("failed to register listen socket", e))?;

        let descriptor = self
            .core()
            .open_descriptor(DescriptorSpec::listener(self.id(), local_addr))?;

        let mut slot = self.entry().listener.lock();
        if slot.is_some() {
            drop(slot);
            let _ = self.core().release_descriptor(descriptor, Some(self.id()));
            return Err(RuntimeError::duplicate_listener(self.id(), port));
        }
        let accept_task = tokio::task::spawn_local(accept_loop(self.clone(), listener, on_accept));
        *slot = Some(ListenerSlot {
            descriptor,
            port,
            local_addr,
            options,
            accept_task,
        });
        drop(slot);

        info!(
            actor_id = %self.id(),
            descriptor = %descriptor,
            address = %local_addr,
            "Listener bound"
        );
        Ok(Listener {
            descriptor,
            local_addr,
        })
    }

    /// Options of the active listener
    pub fn listen_options(&self) -> Option<Dict> {
        self.entry()
            .listener
            .lock()
            .as_ref()
            .map(|slot| slot.options.as_dict().clone())
    }

    pub fn listener_addr(&self) -> Option<SocketAddr> {
        self.entry().listener.lock().as_ref().map(|slot| slot.local_addr)
    }

    /// Stop accepting and close the listen socket
    pub fn stop_listening(&self) -> Result<()> {
        let slot = self.entry().listener.lock().take();
        let Some(slot) = slot else {
            return Ok(());
        };
        let descriptor = slot.descriptor();
        slot.stop();
        self.core()
            .release_descriptor(descriptor, Some(self.id()))
            .map(|_| ())
    }
}

async fn accept_loop<F>(ctx: ActorContext, listener: TcpListener, mut on_accept: F)
where
    F: FnMut(&ActorContext, Accepted),
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(actor_id = %ctx.id(), error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                warn!(actor_id = %ctx.id(), peer = %peer, error = %e, "Failed to detach accepted stream");
                continue;
            }
        };
        if let Err(e) = stream.set_nonblocking(false) {
            warn!(actor_id = %ctx.id(), peer = %peer, error = %e, "Failed to configure accepted stream");
            continue;
        }

        let descriptor = match ctx
            .core()
            .open_descriptor(DescriptorSpec::connection(ctx.id(), stream))
        {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(actor_id = %ctx.id(), peer = %peer, error = %e, "Dropping accepted connection");
                continue;
            }
        };

        ctx.core().metrics.record_accept();
        debug!(actor_id = %ctx.id(), descriptor = %descriptor, peer = %peer, "Connection accepted");
        on_accept(&ctx, Accepted { descriptor, peer });
    }
}
