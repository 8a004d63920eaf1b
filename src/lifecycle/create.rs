//! Node creation: uniqueness guard, resolution, profile hooks, wait.

use crate::keys::KeyPair;
use crate::provider::{CreateParams, ImageRef, ProviderGateway, SizeRef};

use super::{ImageSource, KeyDeliveryProfile, NodeError, NodeLifecycle, NodeState, SizeSource};

impl<G: ProviderGateway> NodeLifecycle<G> {
    /// Provisions the instance and blocks until the provider reports it
    /// running.
    ///
    /// The name is resolved once and checked against the provider's full
    /// listing before any create call is issued, so a collision never leaves
    /// partial state behind. Image and size identifiers are resolved
    /// explicitly here and memoised into the spec.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Configuration`] when called out of the
    /// `Uncreated` state or when resolution fails,
    /// [`NodeError::DuplicateInstance`] on a name collision, and
    /// [`NodeError::Provider`] for transport failures, which are surfaced
    /// verbatim and never retried here.
    pub async fn create(&mut self) -> Result<(), NodeError<G::Error>> {
        if self.state != NodeState::Uncreated {
            return Err(NodeError::Configuration(format!(
                "create is only valid from the Uncreated state (currently {:?})",
                self.state
            )));
        }

        self.state = NodeState::Creating;
        match self.try_create().await {
            Ok(()) => {
                self.state = NodeState::Running;
                Ok(())
            }
            Err(err) => {
                self.state = NodeState::Error;
                Err(err)
            }
        }
    }

    async fn try_create(&mut self) -> Result<(), NodeError<G::Error>> {
        let name = self.resolve_name()?;

        let existing = self
            .gateway
            .list_instances()
            .await
            .map_err(NodeError::Provider)?;
        if existing.iter().any(|instance| instance.name == name) {
            return Err(NodeError::DuplicateInstance { name });
        }

        self.ensure_key_pair(&name)?;
        let image = self.resolve_image().await?;
        let size = self.resolve_size().await?;

        let mut params = self.spec.params.clone();
        self.prepare_create_params(&mut params).await?;

        tracing::info!(node = %name, size = %size.id, image = %image.id, "creating ephemeral node");
        let handle = self
            .gateway
            .create_instance(&name, &size, &image, &params)
            .await
            .map_err(NodeError::Provider)?;
        self.gateway
            .wait_until_running(std::slice::from_ref(&handle))
            .await
            .map_err(NodeError::Provider)?;

        tracing::info!(node = %name, id = %handle.id, "node is running");
        self.handle = Some(handle);
        Ok(())
    }

    /// Generates a key pair when none was supplied. Supplied pairs keep
    /// their identity for the whole lifecycle.
    fn ensure_key_pair(&mut self, node_name: &str) -> Result<(), NodeError<G::Error>> {
        if self.spec.key_pair.is_none() {
            let pair = KeyPair::generate(node_name, &self.spec.user)?;
            self.spec.key_pair = Some(pair);
        }
        Ok(())
    }

    async fn resolve_image(&mut self) -> Result<ImageRef, NodeError<G::Error>> {
        let source = self.spec.image.clone();
        let resolved = match source {
            ImageSource::Resolved(image) => image,
            ImageSource::Identifier(identifier) => self
                .gateway
                .resolve_image(&identifier)
                .await
                .map_err(NodeError::Provider)?,
        };
        self.spec.image = ImageSource::Resolved(resolved.clone());
        Ok(resolved)
    }

    /// Size identifiers are matched against the provider catalog, first
    /// match by id wins; an unmatched identifier is a configuration error.
    async fn resolve_size(&mut self) -> Result<SizeRef, NodeError<G::Error>> {
        let source = self.spec.size.clone();
        let resolved = match source {
            SizeSource::Resolved(size) => size,
            SizeSource::ProviderDefault => {
                let sizes = self
                    .gateway
                    .list_sizes()
                    .await
                    .map_err(NodeError::Provider)?;
                sizes.into_iter().next().ok_or_else(|| {
                    NodeError::Configuration(String::from("provider size catalog is empty"))
                })?
            }
            SizeSource::Identifier(identifier) => {
                let sizes = self
                    .gateway
                    .list_sizes()
                    .await
                    .map_err(NodeError::Provider)?;
                sizes
                    .into_iter()
                    .find(|size| size.id == identifier)
                    .ok_or_else(|| {
                        NodeError::Configuration(format!(
                            "size '{identifier}' not found in the provider catalog"
                        ))
                    })?
            }
        };
        self.spec.size = SizeSource::Resolved(resolved.clone());
        Ok(resolved)
    }

    /// Required extension point: profiles inject provider-specific
    /// parameters before the create call reaches the gateway.
    async fn prepare_create_params(
        &mut self,
        params: &mut CreateParams,
    ) -> Result<(), NodeError<G::Error>> {
        let key_pair = self.key_pair()?.clone();
        match self.profile {
            KeyDeliveryProfile::MetadataKeys => {
                params.metadata.insert(
                    String::from("ssh-keys"),
                    format!("{}:{}", self.spec.user, key_pair.public_key),
                );
            }
            KeyDeliveryProfile::ImportedKeyPair => {
                self.gateway
                    .import_key_pair(&key_pair.name, &key_pair.public_key)
                    .await
                    .map_err(NodeError::Provider)?;
                params.key_pair_name = Some(key_pair.name.clone());
                if params.delete_root_volume_on_termination.is_none() {
                    params.delete_root_volume_on_termination = Some(true);
                }
                if key_pair.is_generated() {
                    self.imported_key_pair = Some(key_pair.name);
                }
            }
        }
        Ok(())
    }
}
