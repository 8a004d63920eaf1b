//! Teardown: snapshot refresh and the bounded destroy reconciliation loop.

use tokio::time::sleep;

use crate::provider::{NodeStatus, ProviderGateway};

use super::{NodeError, NodeLifecycle, NodeState};

impl<G: ProviderGateway> NodeLifecycle<G> {
    /// Re-fetches the instance snapshot from the provider's full listing.
    ///
    /// The full listing is used instead of a targeted get because eventually
    /// consistent providers can 404 a get while the listing still shows the
    /// instance. Lookup is by id when a handle exists, else by name (a failed
    /// create may have provisioned an instance we never got a handle for).
    /// "Not found" clears the handle; only transport errors propagate.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Provider`] when the listing call fails.
    pub async fn refresh(&mut self) -> Result<(), NodeError<G::Error>> {
        if let Some(current) = self.handle.clone() {
            let listing = self
                .gateway
                .list_instances()
                .await
                .map_err(NodeError::Provider)?;
            self.handle = listing.into_iter().find(|inst| inst.id == current.id);
        } else if let Some(name) = self.name.clone() {
            let listing = self
                .gateway
                .list_instances()
                .await
                .map_err(NodeError::Provider)?;
            self.handle = listing.into_iter().find(|inst| inst.name == name);
        }
        Ok(())
    }

    /// Destroys the instance and polls until it is gone or terminated.
    ///
    /// Safely callable from any state. Cloud deletes frequently report
    /// spurious failures while still succeeding asynchronously, so the
    /// delete call's error is captured, not raised; it only becomes the
    /// cause of a [`NodeError::TerminationTimeout`] if termination also
    /// never materialises within the poll budget.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NoResource`] when there is nothing to destroy,
    /// [`NodeError::Provider`] when a refresh poll fails at the transport
    /// level, and [`NodeError::TerminationTimeout`] when the budget is
    /// exhausted.
    pub async fn destroy(&mut self) -> Result<(), NodeError<G::Error>> {
        if self.handle.is_none() {
            self.refresh().await?;
            if self.handle.is_none() {
                tracing::info!("no node to destroy");
                return Err(NodeError::NoResource);
            }
        }

        let Some(current) = self.handle.clone() else {
            return Err(NodeError::NoResource);
        };
        self.state = NodeState::Destroying;
        tracing::info!(node = %current.name, id = %current.id, "destroying node");

        let pending_destroy_error = self.gateway.delete_instance(&current).await.err();
        if let Some(err) = &pending_destroy_error {
            tracing::warn!(node = %current.name, error = %err, "delete call failed; polling for termination anyway");
        }

        let policy = self.destroy_policy;
        for _ in 0..policy.max_polls {
            self.refresh().await?;
            match &self.handle {
                None => return self.finish_destroy().await,
                Some(observed) if observed.status == NodeStatus::Terminated => {
                    return self.finish_destroy().await;
                }
                Some(observed) => {
                    tracing::debug!(node = %current.name, status = ?observed.status, "waiting for termination");
                }
            }
            sleep(policy.interval).await;
        }

        // Last-known handle is retained for caller diagnosis.
        self.state = NodeState::Error;
        Err(NodeError::TerminationTimeout {
            name: current.name,
            attempts: policy.max_polls,
            source: pending_destroy_error,
        })
    }

    async fn finish_destroy(&mut self) -> Result<(), NodeError<G::Error>> {
        self.handle = None;
        self.ip_address = None;
        self.state = NodeState::Terminated;
        self.post_destroy().await
    }

    /// Profile cleanup hook: a key pair this lifecycle generated and
    /// imported is deleted again once the instance is gone.
    async fn post_destroy(&mut self) -> Result<(), NodeError<G::Error>> {
        if let Some(key_name) = self.imported_key_pair.take() {
            tracing::debug!(key_pair = %key_name, "deleting imported key pair");
            self.gateway
                .delete_key_pair(&key_name)
                .await
                .map_err(NodeError::Provider)?;
        }
        Ok(())
    }
}
