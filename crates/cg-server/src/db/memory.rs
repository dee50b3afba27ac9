//! In-process [`Store`] backing the handler tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use super::{AppRecord, AppUser, Company, Environment, EnvironmentMeta, Store, User};
use cg_common::{AppError, AppResult};

/// Snapshot of the last configuration persisted for an environment.
#[derive(Debug, Clone)]
pub struct StoredConfiguration {
    pub apps: Vec<AppRecord>,
    pub theme: Option<Value>,
    pub meta: EnvironmentMeta,
}

#[derive(Default)]
struct Tables {
    /// api key hash → environment id
    api_keys: HashMap<String, String>,
    environments: HashMap<String, Environment>,
    companies: HashMap<String, Company>,
    users: HashMap<String, User>,
    app_users: Vec<AppUser>,
    configurations: HashMap<String, StoredConfiguration>,
    fail_writes: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_environment(&self, environment: Environment, api_key_hash: &str) {
        let mut t = self.tables.lock();
        t.api_keys
            .insert(api_key_hash.to_string(), environment.id.clone());
        t.environments.insert(environment.id.clone(), environment);
    }

    pub fn insert_company(&self, company: Company) {
        self.tables.lock().companies.insert(company.id.clone(), company);
    }

    pub fn insert_user(&self, user: User) {
        self.tables.lock().users.insert(user.id.clone(), user);
    }

    pub fn insert_app_user(&self, user: AppUser) {
        self.tables.lock().app_users.push(user);
    }

    /// Make every write fail with an internal error.
    pub fn fail_writes(&self, fail: bool) {
        self.tables.lock().fail_writes = fail;
    }

    pub fn app_users(&self, environment_id: &str, app_route: &str) -> Vec<AppUser> {
        self.tables
            .lock()
            .app_users
            .iter()
            .filter(|u| u.environment_id == environment_id && u.app_route == app_route)
            .cloned()
            .collect()
    }

    pub fn configuration(&self, environment_id: &str) -> Option<StoredConfiguration> {
        self.tables.lock().configurations.get(environment_id).cloned()
    }

    fn check_writable(t: &Tables) -> AppResult<()> {
        if t.fail_writes {
            return Err(AppError::Internal(anyhow::anyhow!("store is read-only")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn environment_by_api_key_hash(&self, hash: &str) -> AppResult<Option<Environment>> {
        let t = self.tables.lock();
        Ok(t.api_keys
            .get(hash)
            .and_then(|id| t.environments.get(id))
            .cloned())
    }

    async fn environment_by_id(&self, id: &str) -> AppResult<Option<Environment>> {
        Ok(self.tables.lock().environments.get(id).cloned())
    }

    async fn environments_by_company(&self, company_id: &str) -> AppResult<Vec<Environment>> {
        let t = self.tables.lock();
        let mut envs: Vec<Environment> = t
            .environments
            .values()
            .filter(|e| e.company_id == company_id)
            .cloned()
            .collect();
        envs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(envs)
    }

    async fn company_by_id(&self, id: &str) -> AppResult<Option<Company>> {
        Ok(self.tables.lock().companies.get(id).cloned())
    }

    async fn user_by_id(&self, id: &str) -> AppResult<Option<User>> {
        Ok(self.tables.lock().users.get(id).cloned())
    }

    async fn app_users_by_route(
        &self,
        environment_id: &str,
        app_route: &str,
    ) -> AppResult<Vec<AppUser>> {
        Ok(self.app_users(environment_id, app_route))
    }

    async fn delete_app_user(&self, id: &str) -> AppResult<()> {
        let mut t = self.tables.lock();
        Self::check_writable(&t)?;
        t.app_users.retain(|u| u.id != id);
        Ok(())
    }

    async fn insert_app_user_from_sdk(
        &self,
        company_id: &str,
        email: &str,
        environment_id: &str,
        app_route: &str,
    ) -> AppResult<()> {
        let mut t = self.tables.lock();
        Self::check_writable(&t)?;
        t.app_users.push(AppUser {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            email: email.to_string(),
            environment_id: environment_id.to_string(),
            app_route: app_route.to_string(),
        });
        Ok(())
    }

    async fn update_configuration(
        &self,
        environment_id: &str,
        apps: &[AppRecord],
        theme: Option<&Value>,
        meta: &EnvironmentMeta,
    ) -> AppResult<()> {
        let mut t = self.tables.lock();
        Self::check_writable(&t)?;
        t.configurations.insert(
            environment_id.to_string(),
            StoredConfiguration {
                apps: apps.to_vec(),
                theme: theme.cloned(),
                meta: meta.clone(),
            },
        );
        Ok(())
    }
}
