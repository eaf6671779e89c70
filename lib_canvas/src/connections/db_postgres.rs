//! # PostgreSQL Data Layer
//!
//! A small model registry over a `deadpool-postgres` pool.
//!
//! - `associate()` validates the foreign-key relationships between the
//!   registered models and derives the order tables must be created in.
//! - `sync()` creates every missing table in that order.
//!
//! Nothing is dropped or altered; existing tables are left as they are.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::core::startup::{DataLayer, DataLayerError};

/// A table and its own columns (foreign keys excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub name: &'static str,
    pub columns: Vec<&'static str>,
}

impl Model {
    pub fn new(name: &'static str, columns: &[&'static str]) -> Self {
        Self {
            name,
            columns: columns.to_vec(),
        }
    }
}

/// `from.column` references `to.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub from: &'static str,
    pub column: &'static str,
    pub to: &'static str,
    pub on_delete: &'static str,
}

impl Relationship {
    pub fn new(from: &'static str, column: &'static str, to: &'static str, on_delete: &'static str) -> Self {
        Self {
            from,
            column,
            to,
            on_delete,
        }
    }
}

/// The models of the canvas service.
pub fn canvas_models() -> (Vec<Model>, Vec<Relationship>) {
    let models = vec![
        Model::new(
            "users",
            &[
                "id SERIAL PRIMARY KEY",
                "name VARCHAR(32) NOT NULL UNIQUE",
                "email VARCHAR(64) UNIQUE",
                "password VARCHAR(60)",
                "total_pixels INTEGER NOT NULL DEFAULT 0",
                "daily_total_pixels INTEGER NOT NULL DEFAULT 0",
                "ranking INTEGER",
                "daily_ranking INTEGER",
                "created_at TIMESTAMPTZ NOT NULL DEFAULT now()",
            ],
        ),
        Model::new(
            "factions",
            &[
                "id SERIAL PRIMARY KEY",
                "name VARCHAR(32) NOT NULL UNIQUE",
                "member_count INTEGER NOT NULL DEFAULT 0",
                "created_at TIMESTAMPTZ NOT NULL DEFAULT now()",
            ],
        ),
        Model::new("faction_members", &["id SERIAL PRIMARY KEY", "joined_at TIMESTAMPTZ NOT NULL DEFAULT now()"]),
        Model::new(
            "bans",
            &[
                "id SERIAL PRIMARY KEY",
                "ip VARCHAR(45) NOT NULL UNIQUE",
                "reason VARCHAR(200)",
                "expires_at TIMESTAMPTZ",
            ],
        ),
    ];
    let relationships = vec![
        Relationship::new("factions", "owner_id", "users", "SET NULL"),
        Relationship::new("faction_members", "user_id", "users", "CASCADE"),
        Relationship::new("faction_members", "faction_id", "factions", "CASCADE"),
        Relationship::new("bans", "moderator_id", "users", "SET NULL"),
    ];
    (models, relationships)
}

/// Orders models so every referenced table precedes the tables pointing at it.
/// Ties keep declaration order. Self references are allowed.
pub fn creation_order(models: &[Model], relationships: &[Relationship]) -> Result<Vec<usize>, DataLayerError> {
    let index_of = |name: &str| models.iter().position(|m| m.name == name);

    let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); models.len()];
    for rel in relationships {
        let from = index_of(rel.from)
            .ok_or_else(|| DataLayerError::Relationships(format!("unknown model `{}`", rel.from)))?;
        let to = index_of(rel.to)
            .ok_or_else(|| DataLayerError::Relationships(format!("unknown model `{}`", rel.to)))?;
        if from != to && !depends_on[from].contains(&to) {
            depends_on[from].push(to);
        }
    }

    let mut placed = vec![false; models.len()];
    let mut order = Vec::with_capacity(models.len());
    while order.len() < models.len() {
        let next = (0..models.len()).find(|&i| !placed[i] && depends_on[i].iter().all(|&d| placed[d]));
        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                let stuck: Vec<&str> = (0..models.len()).filter(|&i| !placed[i]).map(|i| models[i].name).collect();
                return Err(DataLayerError::Relationships(format!(
                    "circular references between {}",
                    stuck.join(", ")
                )));
            }
        }
    }
    Ok(order)
}

/// `CREATE TABLE IF NOT EXISTS` statement of a model with its foreign keys.
pub fn ddl(model: &Model, relationships: &[Relationship]) -> String {
    let mut columns: Vec<String> = model.columns.iter().map(|c| c.to_string()).collect();
    columns.extend(
        relationships
            .iter()
            .filter(|rel| rel.from == model.name)
            .map(|rel| format!("{} INTEGER REFERENCES {}(id) ON DELETE {}", rel.column, rel.to, rel.on_delete)),
    );
    format!("CREATE TABLE IF NOT EXISTS {} ({})", model.name, columns.join(", "))
}

/// # Postgres Data Layer
pub struct PgDataLayer {
    pool: Pool,
    models: Vec<Model>,
    relationships: Vec<Relationship>,
    order: Mutex<Option<Vec<usize>>>,
}

impl PgDataLayer {
    /// A data layer over an existing pool.
    pub fn new(pool: Pool, models: Vec<Model>, relationships: Vec<Relationship>) -> Self {
        Self {
            pool,
            models,
            relationships,
            order: Mutex::new(None),
        }
    }

    /// Builds the pool for `database_url` with the canvas models. No
    /// connection is opened until `sync`.
    pub fn connect(database_url: &str) -> Result<Self, DataLayerError> {
        let mut config = DeadpoolConfig::new();
        config.url = Some(database_url.to_owned());
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DataLayerError::Unavailable(Box::new(e)))?;
        let (models, relationships) = canvas_models();
        Ok(Self::new(pool, models, relationships))
    }

    /// The shared pool, for the services built on the same database.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }
}

#[async_trait]
impl DataLayer for PgDataLayer {
    fn associate(&self) -> Result<(), DataLayerError> {
        let order = creation_order(&self.models, &self.relationships)?;
        debug!(
            order = ?order.iter().map(|&i| self.models[i].name).collect::<Vec<_>>(),
            "models associated"
        );
        *self.order.lock().unwrap_or_else(PoisonError::into_inner) = Some(order);
        Ok(())
    }

    async fn sync(&self) -> Result<(), DataLayerError> {
        let order = self
            .order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| DataLayerError::Relationships(String::from("sync called before associate")))?;

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DataLayerError::Unavailable(Box::new(e)))?;

        for index in order {
            let model = &self.models[index];
            client
                .batch_execute(&ddl(model, &self.relationships))
                .await
                .map_err(|e| DataLayerError::Sync {
                    model: model.name.to_owned(),
                    source: Box::new(e),
                })?;
            debug!(model = model.name, "model synced");
        }
        info!(models = self.models.len(), "database synced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(order: &[usize], models: &[Model]) -> Vec<&'static str> {
        order.iter().map(|&i| models[i].name).collect()
    }

    #[test]
    fn test_canvas_models_order() {
        let (models, relationships) = canvas_models();
        let order = creation_order(&models, &relationships).unwrap();
        let order = names(&order, &models);
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();

        assert_eq!(order.len(), models.len());
        assert!(pos("users") < pos("factions"));
        assert!(pos("factions") < pos("faction_members"));
        assert!(pos("users") < pos("bans"));
    }

    #[test]
    fn test_reverse_declaration_is_reordered() {
        let models = vec![Model::new("child", &["id SERIAL PRIMARY KEY"]), Model::new("parent", &["id SERIAL PRIMARY KEY"])];
        let rels = vec![Relationship::new("child", "parent_id", "parent", "CASCADE")];
        let order = creation_order(&models, &rels).unwrap();
        assert_eq!(names(&order, &models), vec!["parent", "child"]);
    }

    #[test]
    fn test_self_reference_is_allowed() {
        let models = vec![Model::new("users", &["id SERIAL PRIMARY KEY"])];
        let rels = vec![Relationship::new("users", "invited_by", "users", "SET NULL")];
        assert_eq!(creation_order(&models, &rels).unwrap(), vec![0]);
    }

    #[test]
    fn test_cycles_and_unknown_models_rejected() {
        let models = vec![Model::new("a", &[]), Model::new("b", &[])];
        let cycle = vec![
            Relationship::new("a", "b_id", "b", "CASCADE"),
            Relationship::new("b", "a_id", "a", "CASCADE"),
        ];
        let err = creation_order(&models, &cycle).unwrap_err();
        assert!(err.to_string().contains("circular references between a, b"), "{err}");

        let unknown = vec![Relationship::new("a", "x_id", "x", "CASCADE")];
        let err = creation_order(&models, &unknown).unwrap_err();
        assert!(matches!(err, DataLayerError::Relationships(msg) if msg.contains("`x`")));
    }

    #[test]
    fn test_ddl_includes_foreign_keys() {
        let (models, relationships) = canvas_models();
        let members = models.iter().find(|m| m.name == "faction_members").unwrap();
        let sql = ddl(members, &relationships);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS faction_members ("));
        assert!(sql.contains("user_id INTEGER REFERENCES users(id) ON DELETE CASCADE"));
        assert!(sql.contains("faction_id INTEGER REFERENCES factions(id) ON DELETE CASCADE"));
    }

    #[tokio::test]
    async fn test_sync_requires_associate_and_reports_unreachable_database() {
        let data = PgDataLayer::connect("postgres://canvas@127.0.0.1:1/canvas").unwrap();

        let err = data.sync().await.unwrap_err();
        assert!(matches!(err, DataLayerError::Relationships(_)));

        data.associate().unwrap();
        let err = data.sync().await.unwrap_err();
        assert!(matches!(err, DataLayerError::Unavailable(_)), "{err:?}");
    }
}
