//! Runtime handle: connection, namespace, snapshotter choice, lease and
//! cancellation.
//!
//! One handle serves one process; exactly one rewrite is in flight per
//! handle. Every blob and snapshot created during an operation is held
//! by the handle's lease until `close`, so the host garbage collector
//! cannot reap half-written state.

use std::sync::Arc;
use std::time::Duration;

use image_manip_core::options::{RootOptions, DEFAULT_SNAPSHOTTER};
use image_manip_core::{ManipError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::containerd::{ContainerdStore, SysMounter};
use crate::store::{ContentStore, Differ, ImageIndex, Lease, Leaser, Mounter, Snapshotter};

/// Lease lifetime covering a process's operations.
const LEASE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Handle to the host runtime's storage, bundling the capabilities with
/// the ambient namespace, snapshotter name, lease and cancellation.
pub struct Runtime {
    content: Arc<dyn ContentStore>,
    snapshotter: Arc<dyn Snapshotter>,
    differ: Arc<dyn Differ>,
    images: Arc<dyn ImageIndex>,
    leaser: Arc<dyn Leaser>,
    mounter: Arc<dyn Mounter>,
    snapshotter_name: String,
    namespace: String,
    lease: tokio::sync::Mutex<Option<Lease>>,
    cancel: CancellationToken,
}

impl Runtime {
    /// Connect to the host runtime endpoint and take a lease.
    ///
    /// The snapshotter is the configured one, falling back to
    /// `overlayfs`.
    ///
    /// # Errors
    ///
    /// Returns `HostRuntime` when the endpoint is unreachable or the
    /// lease cannot be created.
    pub async fn open(opts: &RootOptions) -> Result<Runtime> {
        let cancel = CancellationToken::new();
        let store = Arc::new(
            ContainerdStore::connect(&opts.containerd_address, &opts.namespace, cancel.clone())
                .await?,
        );

        let snapshotter_name = opts
            .snapshotter
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SNAPSHOTTER.to_string());
        store.set_snapshotter_name(&snapshotter_name);
        debug!(snapshotter = %snapshotter_name, namespace = %opts.namespace, "runtime connected");

        let lease = store.create_lease(LEASE_TTL).await?;
        store.set_lease(&lease)?;

        Ok(Runtime {
            content: store.clone(),
            snapshotter: store.clone(),
            differ: store.clone(),
            images: store.clone(),
            leaser: store.clone(),
            mounter: Arc::new(SysMounter::new()),
            snapshotter_name,
            namespace: opts.namespace.clone(),
            lease: tokio::sync::Mutex::new(Some(lease)),
            cancel,
        })
    }

    /// Build a runtime over explicit capability implementations.
    ///
    /// Used by tests to inject the in-memory fakes; takes no lease.
    #[allow(clippy::too_many_arguments)]
    pub fn with_capabilities(
        content: Arc<dyn ContentStore>,
        snapshotter: Arc<dyn Snapshotter>,
        differ: Arc<dyn Differ>,
        images: Arc<dyn ImageIndex>,
        leaser: Arc<dyn Leaser>,
        mounter: Arc<dyn Mounter>,
        snapshotter_name: &str,
        namespace: &str,
    ) -> Runtime {
        Runtime {
            content,
            snapshotter,
            differ,
            images,
            leaser,
            mounter,
            snapshotter_name: snapshotter_name.to_string(),
            namespace: namespace.to_string(),
            lease: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Release the lease and stop accepting work.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(lease) = self.lease.lock().await.take() {
            if let Err(err) = self.leaser.release(&lease).await {
                warn!(lease = %lease.id, error = %err, "failed to release lease");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Token cancelled by `close` or an external signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fail with `Aborted` once cancellation was requested. Called
    /// between plan steps and layer applications.
    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ManipError::Aborted);
        }
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn snapshotter_name(&self) -> &str {
        &self.snapshotter_name
    }

    pub(crate) fn content(&self) -> &dyn ContentStore {
        self.content.as_ref()
    }

    pub(crate) fn snapshotter(&self) -> &dyn Snapshotter {
        self.snapshotter.as_ref()
    }

    pub(crate) fn differ(&self) -> &dyn Differ {
        self.differ.as_ref()
    }

    pub(crate) fn images(&self) -> &dyn ImageIndex {
        self.images.as_ref()
    }

    pub(crate) fn mounter(&self) -> &dyn Mounter {
        self.mounter.as_ref()
    }
}
