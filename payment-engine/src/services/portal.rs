//! Public, unauthenticated read access to one client's payment data via a
//! capability token.

use crate::models::{Client, ClientPatch, PublicClientLink};
use crate::services::ids::IdGenerator;
use crate::services::repository::{ClientRepository, PortalLinkRepository};
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct PortalService {
    clients: ClientRepository,
    links: PortalLinkRepository,
    ids: Arc<dyn IdGenerator>,
}

fn tokens_match(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();
    if expected.len() != presented.len() {
        return false;
    }
    expected.ct_eq(presented).into()
}

impl PortalService {
    pub fn new(
        clients: ClientRepository,
        links: PortalLinkRepository,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { clients, links, ids }
    }

    /// Return the client's link, creating it on first use.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub fn create_link(&self, client_id: Uuid) -> Result<PublicClientLink, AppError> {
        let client = self.clients.require(client_id)?;
        if let Some(existing) = self.links.find_by_client(client_id)? {
            return Ok(existing);
        }

        let link = self.links.create(PublicClientLink {
            link_id: self.ids.record_id(),
            client_id,
            public_token: self.ids.access_token(),
            created_at: Utc::now(),
            access_count: 0,
            last_accessed_at: None,
            version: 1,
        })?;

        if let Err(e) = self.clients.update(
            client.id,
            ClientPatch {
                portal_token: Some(Some(link.public_token.clone())),
                ..Default::default()
            },
        ) {
            if let Err(cleanup) = self.links.delete(link.link_id) {
                error!(
                    link_id = %link.link_id,
                    cause = %e,
                    error = %cleanup,
                    "Client write failed and portal link could not be removed; its token stays live"
                );
            } else {
                warn!(link_id = %link.link_id, cause = %e, "Client write failed; portal link removed");
            }
            return Err(e);
        }

        info!(link_id = %link.link_id, "Portal link created");
        Ok(link)
    }

    /// Resolve a public token to its client. Every successful lookup is
    /// counted on the link.
    #[instrument(skip(self, token))]
    pub fn get_client_by_portal_token(&self, token: &str) -> Result<Client, AppError> {
        let link = self
            .links
            .list()?
            .into_iter()
            .find(|l| tokens_match(&l.public_token, token))
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Portal link not found")))?;

        let client = self.clients.get_by_id(link.client_id)?.ok_or_else(|| {
            warn!(link_id = %link.link_id, "Portal link points at a missing client");
            AppError::NotFound(anyhow::anyhow!("Portal link not found"))
        })?;

        self.links.update(link.link_id, |l| {
            l.access_count += 1;
            l.last_accessed_at = Some(Utc::now());
            Ok(())
        })?;

        info!(client_id = %client.id, link_id = %link.link_id, "Portal link accessed");
        Ok(client)
    }

    #[instrument(skip(self), fields(client_id = %client_id))]
    pub fn revoke_link(&self, client_id: Uuid) -> Result<PublicClientLink, AppError> {
        let link = self.links.find_by_client(client_id)?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("No portal link for client {}", client_id))
        })?;
        let link = self.links.delete(link.link_id)?;

        match self.clients.update(
            client_id,
            ClientPatch {
                portal_token: Some(None),
                ..Default::default()
            },
        ) {
            Ok(_) | Err(AppError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!(link_id = %link.link_id, "Portal link revoked");
        Ok(link)
    }
}
