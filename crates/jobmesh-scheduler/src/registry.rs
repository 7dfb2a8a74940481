//! Job and app configuration registry

use crate::error::Result;
use crate::store::{read_json, scan_json, write_json};
use jobmesh_core::{CloudAppConfiguration, CloudJobConfiguration};
use jobmesh_storage::{KVStore, KeyEncoder};
use std::sync::Arc;
use tracing::info;

/// Persisted job/app configurations, disable flags and framework identity
pub struct ConfigRegistry {
    store: Arc<dyn KVStore>,
}

impl ConfigRegistry {
    pub fn new(store: Arc<dyn KVStore>) -> Self {
        Self { store }
    }

    /// Validate and store a job configuration, replacing any previous one
    pub fn add_job(&self, config: &CloudJobConfiguration) -> Result<()> {
        config.validate()?;
        write_json(
            self.store.as_ref(),
            &KeyEncoder::job_config(&config.job_name),
            config,
        )?;
        info!(job_name = %config.job_name, app_name = %config.app_name, "Registered job configuration");
        Ok(())
    }

    pub fn job(&self, job_name: &str) -> Result<Option<CloudJobConfiguration>> {
        read_json(self.store.as_ref(), &KeyEncoder::job_config(job_name))
    }

    pub fn jobs(&self) -> Result<Vec<CloudJobConfiguration>> {
        scan_json(self.store.as_ref(), KeyEncoder::JOB_CONFIG_PREFIX)
    }

    pub fn remove_job(&self, job_name: &str) -> Result<()> {
        self.store
            .delete(KeyEncoder::job_config(job_name).as_bytes())?;
        info!(job_name = %job_name, "Removed job configuration");
        Ok(())
    }

    pub fn add_app(&self, config: &CloudAppConfiguration) -> Result<()> {
        config.validate()?;
        write_json(
            self.store.as_ref(),
            &KeyEncoder::app_config(&config.app_name),
            config,
        )?;
        info!(app_name = %config.app_name, "Registered app configuration");
        Ok(())
    }

    pub fn app(&self, app_name: &str) -> Result<Option<CloudAppConfiguration>> {
        read_json(self.store.as_ref(), &KeyEncoder::app_config(app_name))
    }

    pub fn apps(&self) -> Result<Vec<CloudAppConfiguration>> {
        scan_json(self.store.as_ref(), KeyEncoder::APP_CONFIG_PREFIX)
    }

    pub fn remove_app(&self, app_name: &str) -> Result<()> {
        self.store
            .delete(KeyEncoder::app_config(app_name).as_bytes())?;
        info!(app_name = %app_name, "Removed app configuration");
        Ok(())
    }

    pub fn disable_job(&self, job_name: &str) -> Result<()> {
        self.store
            .put(KeyEncoder::disabled_job(job_name).as_bytes(), b"1")?;
        Ok(())
    }

    pub fn enable_job(&self, job_name: &str) -> Result<()> {
        self.store
            .delete(KeyEncoder::disabled_job(job_name).as_bytes())?;
        Ok(())
    }

    pub fn is_job_disabled(&self, job_name: &str) -> Result<bool> {
        Ok(self
            .store
            .exists(KeyEncoder::disabled_job(job_name).as_bytes())?)
    }

    pub fn disable_app(&self, app_name: &str) -> Result<()> {
        self.store
            .put(KeyEncoder::disabled_app(app_name).as_bytes(), b"1")?;
        Ok(())
    }

    pub fn enable_app(&self, app_name: &str) -> Result<()> {
        self.store
            .delete(KeyEncoder::disabled_app(app_name).as_bytes())?;
        Ok(())
    }

    pub fn is_app_disabled(&self, app_name: &str) -> Result<bool> {
        Ok(self
            .store
            .exists(KeyEncoder::disabled_app(app_name).as_bytes())?)
    }

    /// Framework id from a previous subscription, if any
    pub fn framework_id(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(KeyEncoder::FRAMEWORK_ID.as_bytes())?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn save_framework_id(&self, framework_id: &str) -> Result<()> {
        self.store
            .put(KeyEncoder::FRAMEWORK_ID.as_bytes(), framework_id.as_bytes())?;
        Ok(())
    }
}
