//! Device session registry
//!
//! Maps a [`DeviceId`] to the live [`DeviceSession`] for that device. The map
//! is internally synchronized and needs no outer lock.
//!
//! Callers must not destroy a session while holding a reference into the map:
//! destruction runs the deregistration callback, which removes the entry and
//! would contend on the same shard. Use [`SessionRegistry::snapshot`] first.

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::DeviceSession;
use crate::types::DeviceId;

/// Thread-safe registry of device sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<DeviceId, Arc<DeviceSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session for a device.
    pub fn get(&self, device_id: &DeviceId) -> Option<Arc<DeviceSession>> {
        tracing::debug!("getDeviceSession, deviceId: {}", device_id);
        self.sessions.get(device_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Store the session for a device, returning the one it replaced.
    pub fn insert(&self, session: Arc<DeviceSession>) -> Option<Arc<DeviceSession>> {
        tracing::debug!("SetDeviceSession, deviceId: {}", session.device_id());
        self.sessions.insert(session.device_id().clone(), session)
    }

    /// Remove the entry for `device_id` only if it still belongs to `conn_id`.
    ///
    /// A session recreated for the same device after a destroy keeps its entry.
    pub fn remove_if_conn(&self, device_id: &DeviceId, conn_id: &str) -> Option<Arc<DeviceSession>> {
        self.sessions
            .remove_if(device_id, |_, session| session.conn_id() == conn_id)
            .map(|(_, session)| session)
    }

    /// Remove the entry for this exact session, if present.
    pub fn remove_session(&self, session: &Arc<DeviceSession>) -> bool {
        self.sessions
            .remove_if(session.device_id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.sessions.contains_key(device_id)
    }

    /// Clone out every session so they can be acted on without holding the map.
    pub fn snapshot(&self) -> Vec<Arc<DeviceSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Identifiers of all registered devices.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
