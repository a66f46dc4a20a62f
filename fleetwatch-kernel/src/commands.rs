//! User-issued fleet mutations: nickname edits, job configuration edits and
//! manual refresh. Each successful write is followed by an audit record.

use crate::audit::{action, AuditRecorder};
use crate::gateway::{join_path, GatewayError};
use crate::models::{SystemMeta, CONFIGURATIONS, SYSTEMS};
use crate::projections::display_name;
use crate::store::FleetStore;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Clone)]
pub struct FleetCommands {
    store: FleetStore,
    audit: AuditRecorder,
}

impl FleetCommands {
    pub fn new(store: FleetStore, audit: AuditRecorder) -> Self {
        Self { store, audit }
    }

    /// Display name and meta of a known device, from the current snapshot.
    fn known_device(&self, id: &str) -> Result<(String, SystemMeta), CommandError> {
        if id.trim().is_empty() {
            return Err(CommandError::InvalidInput("empty device id".into()));
        }
        let state = self.store.snapshot();
        let record = state
            .systems
            .get(id)
            .ok_or_else(|| CommandError::UnknownDevice(id.to_string()))?;
        let meta = SystemMeta::from_value(record.get("meta"));
        Ok((display_name(&meta, id), meta))
    }

    pub fn set_nickname(&self, user: &str, id: &str, nickname: &str) -> Result<(), CommandError> {
        let (target, meta) = self.known_device(id)?;
        let previous = meta.nickname.unwrap_or_default();

        self.store
            .gateway()
            .write(&join_path(&[SYSTEMS, id, "meta", "nickname"]), Value::from(nickname))?;
        info!("nickname of {id} set to '{nickname}' by {user}");

        self.audit.record(
            user,
            action::UPDATE_NICKNAME,
            &target,
            format!("Changed from {previous} to {nickname}"),
        );
        Ok(())
    }

    /// Creates or replaces `configurations/{id}/{job_id}`.
    pub fn upsert_job(
        &self,
        user: &str,
        id: &str,
        job_id: &str,
        job: Value,
    ) -> Result<(), CommandError> {
        let (target, _) = self.known_device(id)?;
        check_job_id(job_id)?;
        if job.is_null() {
            return Err(CommandError::InvalidInput("job body is empty".into()));
        }

        let exists = self
            .store
            .snapshot()
            .configurations
            .get(id)
            .and_then(|jobs| jobs.get(job_id))
            .is_some();

        self.store
            .gateway()
            .write(&join_path(&[CONFIGURATIONS, id, job_id]), job.clone())?;

        let tag = if exists { action::UPDATE_JOB } else { action::CREATE_JOB };
        info!("{tag} {job_id} on {id} by {user}");
        self.audit.record(user, tag, &target, serde_json::json!({ "job_id": job_id, "job": job }));
        Ok(())
    }

    pub fn remove_job(&self, user: &str, id: &str, job_id: &str) -> Result<(), CommandError> {
        let (target, _) = self.known_device(id)?;
        check_job_id(job_id)?;

        self.store
            .gateway()
            .write(&join_path(&[CONFIGURATIONS, id, job_id]), Value::Null)?;
        info!("job {job_id} removed from {id} by {user}");

        self.audit
            .record(user, action::DELETE_JOB, &target, format!("Removed job {job_id}"));
        Ok(())
    }

    /// Forces the store to re-attach its subscription.
    pub fn request_refresh(&self, user: &str) -> JoinHandle<()> {
        let pending = self.store.refresh();
        self.audit
            .record(user, action::REFRESH_FLEET, "fleet", "Manual refresh");
        pending
    }
}

fn check_job_id(job_id: &str) -> Result<(), CommandError> {
    if job_id.trim().is_empty() || job_id.contains('/') {
        return Err(CommandError::InvalidInput(format!("bad job id '{job_id}'")));
    }
    Ok(())
}
