//! Connection protocol (invitee side)
//!
//! A record is created when an invitation is accepted and only moves forward
//! through `update`. Once the record exists its id doubles as the channel for
//! signing, messaging, pings and feature discovery.

use ariesagent_core::{
    AgencyMessage, ConnectionEvent, ConnectionHandle, ConnectionId, ConnectionState, Error,
    FeatureSet, Invitation, MessageStatus, Result,
};
use ariesagent_vcx::VcxLibrary;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Serialize)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub handle: ConnectionHandle,
    pub invitation_id: String,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ConnectionService {
    library: Arc<dyn VcxLibrary>,
    records: DashMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionService {
    pub fn new(library: Arc<dyn VcxLibrary>) -> Self {
        Self {
            library,
            records: DashMap::new(),
        }
    }

    /// Build a connection from an out-of-band invitation and send the request.
    pub async fn accept_invitation(&self, id: &ConnectionId, invitation: &str) -> Result<ConnectionState> {
        if self.records.contains_key(id) {
            return Err(Error::protocol(format!("connection {} already exists", id)));
        }
        let invitation = Invitation::parse(invitation)?;

        let invited = ConnectionState::Initial.transition(&ConnectionEvent::InvitationAccepted)?;
        let handle = self.library.create_connection(&invitation).await?;
        self.library.send_connection_request(handle).await?;
        let state = invited.transition(&ConnectionEvent::RequestSent)?;

        let now = Utc::now();
        self.records.insert(
            id.clone(),
            ConnectionRecord {
                id: id.clone(),
                handle,
                invitation_id: invitation.id.clone(),
                state,
                created_at: now,
                updated_at: now,
            },
        );
        info!("Connection {} accepted invitation {} -> {}", id, invitation.id, state);
        Ok(state)
    }

    /// Poll the inviter once and apply what arrived. No new message is a
    /// successful no-op returning the current state.
    pub async fn update(&self, id: &ConnectionId) -> Result<ConnectionState> {
        let record = self.record(id)?;
        if record.state.is_terminal() {
            return Ok(record.state);
        }
        let Some(message) = self.library.poll_connection(record.handle).await? else {
            debug!("Connection {} has no new messages ({})", id, record.state);
            return Ok(record.state);
        };
        let next = record
            .state
            .transition(&ConnectionEvent::Inbound(message))
            .map_err(|e| {
                warn!("Connection {} rejected update: {}", id, e);
                e
            })?;
        if next != record.state {
            if let Some(mut entry) = self.records.get_mut(id) {
                entry.state = next;
                entry.updated_at = Utc::now();
            }
            info!("Connection {} {} -> {}", id, record.state, next);
        }
        Ok(next)
    }

    pub fn state(&self, id: &ConnectionId) -> Result<ConnectionState> {
        Ok(self.record(id)?.state)
    }

    pub fn handle(&self, id: &ConnectionId) -> Result<ConnectionHandle> {
        Ok(self.record(id)?.handle)
    }

    pub fn record(&self, id: &ConnectionId) -> Result<ConnectionRecord> {
        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::not_found(format!("connection {}", id)))
    }

    pub fn records(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    // -- auxiliary channel operations ---------------------------------------

    pub async fn sign_data(&self, id: &ConnectionId, data: &[u8]) -> Result<Vec<u8>> {
        let handle = self.handle(id)?;
        let signature = self.library.sign_data(handle, data).await?;
        debug!("Connection {} signed {} bytes", id, data.len());
        Ok(signature)
    }

    pub async fn verify_signature(&self, id: &ConnectionId, data: &[u8], signature: &[u8]) -> Result<bool> {
        let handle = self.handle(id)?;
        self.library.verify_signature(handle, data, signature).await
    }

    pub async fn send_message(&self, id: &ConnectionId, message: &str) -> Result<()> {
        let handle = self.handle(id)?;
        self.library.send_message(handle, message).await?;
        info!("Connection {} sent message ({} bytes)", id, message.len());
        Ok(())
    }

    pub async fn send_ping(&self, id: &ConnectionId, comment: Option<&str>) -> Result<()> {
        let handle = self.handle(id)?;
        self.library.send_ping(handle, comment).await
    }

    pub async fn discover_features(&self, id: &ConnectionId) -> Result<FeatureSet> {
        let handle = self.handle(id)?;
        let features = self.library.discover_features(handle).await?;
        info!("Connection {} peer disclosed {} protocols", id, features.protocols.len());
        Ok(features)
    }

    pub async fn fetch_messages(&self, id: &ConnectionId, statuses: &[MessageStatus]) -> Result<Vec<AgencyMessage>> {
        let handle = self.handle(id)?;
        self.library.fetch_messages(handle, statuses).await
    }
}
