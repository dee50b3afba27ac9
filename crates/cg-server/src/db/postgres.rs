//! PostgreSQL-backed [`Store`].

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    AppRecord, AppUser, Company, Environment, EnvironmentKind, EnvironmentMeta, Store, User,
};
use cg_common::AppResult;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ─── Rows ────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct EnvironmentRow {
    id: Uuid,
    company_id: Uuid,
    name: String,
    kind: String,
}

impl From<EnvironmentRow> for Environment {
    fn from(row: EnvironmentRow) -> Self {
        Self {
            id: row.id.to_string(),
            company_id: row.company_id.to_string(),
            name: row.name,
            kind: EnvironmentKind::from_db(&row.kind),
        }
    }
}

#[derive(sqlx::FromRow)]
struct CompanyRow {
    id: Uuid,
    name: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    company_id: Uuid,
    development_environment_id: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct AppUserRow {
    id: Uuid,
    company_id: Uuid,
    email: String,
    environment_id: Uuid,
    app_route: String,
}

impl From<AppUserRow> for AppUser {
    fn from(row: AppUserRow) -> Self {
        Self {
            id: row.id.to_string(),
            company_id: row.company_id.to_string(),
            email: row.email,
            environment_id: row.environment_id.to_string(),
            app_route: row.app_route,
        }
    }
}

const ENVIRONMENT_COLUMNS: &str =
    r#""id", "companyId" AS company_id, "name", "type" AS kind"#;

/// Ids arrive as text from the wire; anything that is not a UUID cannot
/// match a row.
fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

#[async_trait]
impl Store for PgStore {
    async fn environment_by_api_key_hash(&self, hash: &str) -> AppResult<Option<Environment>> {
        let row: Option<EnvironmentRow> = sqlx::query_as(&format!(
            r#"SELECT {ENVIRONMENT_COLUMNS} FROM "environment" WHERE "apiKey" = $1"#
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Environment::from))
    }

    async fn environment_by_id(&self, id: &str) -> AppResult<Option<Environment>> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };

        let row: Option<EnvironmentRow> = sqlx::query_as(&format!(
            r#"SELECT {ENVIRONMENT_COLUMNS} FROM "environment" WHERE "id" = $1"#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Environment::from))
    }

    async fn environments_by_company(&self, company_id: &str) -> AppResult<Vec<Environment>> {
        let Some(company_id) = parse_id(company_id) else {
            return Ok(Vec::new());
        };

        let rows: Vec<EnvironmentRow> = sqlx::query_as(&format!(
            r#"SELECT {ENVIRONMENT_COLUMNS} FROM "environment" WHERE "companyId" = $1 ORDER BY "createdAt""#
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Environment::from).collect())
    }

    async fn company_by_id(&self, id: &str) -> AppResult<Option<Company>> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };

        let row: Option<CompanyRow> =
            sqlx::query_as(r#"SELECT "id", "name" FROM "company" WHERE "id" = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|r| Company {
            id: r.id.to_string(),
            name: r.name,
        }))
    }

    async fn user_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };

        let row: Option<UserRow> = sqlx::query_as(
            r#"SELECT "id", "companyId" AS company_id, "developmentEnvironmentId" AS development_environment_id
               FROM "user" WHERE "id" = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| User {
            id: r.id.to_string(),
            company_id: r.company_id.to_string(),
            development_environment_id: r.development_environment_id.map(|id| id.to_string()),
        }))
    }

    async fn app_users_by_route(
        &self,
        environment_id: &str,
        app_route: &str,
    ) -> AppResult<Vec<AppUser>> {
        let Some(environment_id) = parse_id(environment_id) else {
            return Ok(Vec::new());
        };

        let rows: Vec<AppUserRow> = sqlx::query_as(
            r#"SELECT "id", "companyId" AS company_id, "email", "environmentId" AS environment_id, "appRoute" AS app_route
               FROM "externalAppUser"
               WHERE "environmentId" = $1 AND "appRoute" = $2"#,
        )
        .bind(environment_id)
        .bind(app_route)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AppUser::from).collect())
    }

    async fn delete_app_user(&self, id: &str) -> AppResult<()> {
        let Some(id) = parse_id(id) else {
            return Ok(());
        };

        sqlx::query(r#"DELETE FROM "externalAppUser" WHERE "id" = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn insert_app_user_from_sdk(
        &self,
        company_id: &str,
        email: &str,
        environment_id: &str,
        app_route: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"INSERT INTO "externalAppUser" ("companyId", "email", "environmentId", "appRoute")
               VALUES ($1::uuid, $2, $3::uuid, $4)"#,
        )
        .bind(company_id)
        .bind(email)
        .bind(environment_id)
        .bind(app_route)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_configuration(
        &self,
        environment_id: &str,
        apps: &[AppRecord],
        theme: Option<&Value>,
        meta: &EnvironmentMeta,
    ) -> AppResult<()> {
        sqlx::query(
            r#"UPDATE "environment"
               SET "apps" = $2, "theme" = $3, "data" = $4, "updatedAt" = NOW()
               WHERE "id" = $1::uuid"#,
        )
        .bind(environment_id)
        .bind(Json(apps))
        .bind(theme.map(Json))
        .bind(Json(meta))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
