use futures::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    pool::PoolOptions,
    sqlite::{Sqlite, SqliteConnectOptions},
    ConnectOptions, Pool, QueryBuilder, Row,
};
use std::{
    collections::BTreeSet,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::MapperError,
    properties::{
        normalize_name, Ack, Entity, EntityCode, EntityId, Level, LevelId, VariationSource,
    },
    store::{MemoryStore, ReferenceDataset, ReferenceStore},
};

pub const REFERENCE_DB: &str = "lgd_reference.db";

/// Rows per multi-value INSERT. Five binds per row keeps us well under
/// [SQLITE_LIMIT_VARIABLE_NUMBER].
const INSERT_CHUNK: usize = 1000;

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

/// Deepest ancestor chain [SqliteStore::parents_of] will walk before declaring a cycle.
const MAX_HIERARCHY_DEPTH: i64 = 64;

const ENTITY_COLUMNS: &str = "e.id, e.code, e.name, e.level_id";

/// [ReferenceStore] backed by a SQLite directory database.
#[derive(Debug, Clone)]
pub struct SqliteStore(pub Pool<Sqlite>);

impl SqliteStore {
    /// Open (creating and migrating if needed) the database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<SqliteStore, MapperError> {
        Ok(SqliteStore(db_init(db_path).await?))
    }

    /// Write `dataset` into the database in one transaction. The dataset is validated the
    /// same way [MemoryStore::from_dataset] validates it; rows with an existing key are
    /// updated in place.
    #[tracing::instrument(skip_all)]
    pub async fn load(&self, dataset: &ReferenceDataset) -> Result<(), MapperError> {
        MemoryStore::from_dataset(dataset.clone())?;
        let known = dataset.entities.iter().map(|e| e.id).collect::<BTreeSet<_>>();

        let mut tx = self.0.begin().await?;
        for chunk in dataset.levels.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO level (id, name, rank) ");
            qb.push_values(chunk, |mut b, level| {
                b.push_bind(i64::from(level.id))
                    .push_bind(level.name.clone())
                    .push_bind(i64::from(level.rank));
            });
            qb.push(" ON CONFLICT(id) DO UPDATE SET name = excluded.name, rank = excluded.rank");
            qb.build().execute(&mut *tx).await?;
        }

        for chunk in dataset.entities.chunks(INSERT_CHUNK) {
            let rows = chunk
                .iter()
                .map(|e| Ok((sql_int(e.id, "entity id")?, sql_int(e.code, "entity code")?, e)))
                .collect::<Result<Vec<_>, MapperError>>()?;
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO entity (id, code, name, name_norm, level_id) ",
            );
            qb.push_values(rows, |mut b, (id, code, entity)| {
                b.push_bind(id)
                    .push_bind(code)
                    .push_bind(entity.name.clone())
                    .push_bind(normalize_name(&entity.name))
                    .push_bind(i64::from(entity.level_id));
            });
            qb.push(
                " ON CONFLICT(id) DO UPDATE SET code = excluded.code, name = excluded.name, \
                 name_norm = excluded.name_norm, level_id = excluded.level_id",
            );
            qb.build().execute(&mut *tx).await?;
        }

        for chunk in dataset.edges.chunks(INSERT_CHUNK) {
            let rows = chunk
                .iter()
                .map(|edge| {
                    Ok((
                        sql_int(edge.parent, "parent id")?,
                        sql_int(edge.child, "child id")?,
                    ))
                })
                .collect::<Result<Vec<_>, MapperError>>()?;
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO admin_hierarchy (entity_id, child_id) ",
            );
            qb.push_values(rows, |mut b, (parent, child)| {
                b.push_bind(parent).push_bind(child);
            });
            qb.push(" ON CONFLICT(child_id) DO UPDATE SET entity_id = excluded.entity_id");
            qb.build().execute(&mut *tx).await?;
        }

        let variations = dataset
            .variations
            .iter()
            .filter(|v| known.contains(&v.entity_id))
            .collect::<Vec<_>>();
        for chunk in variations.chunks(INSERT_CHUNK) {
            let rows = chunk
                .iter()
                .map(|v| Ok((sql_int(v.entity_id, "variation entity id")?, *v)))
                .collect::<Result<Vec<_>, MapperError>>()?;
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT OR IGNORE INTO variation (entity_id, name, name_norm, source) ",
            );
            qb.push_values(rows, |mut b, (entity_id, variation)| {
                b.push_bind(entity_id)
                    .push_bind(variation.name.clone())
                    .push_bind(normalize_name(&variation.name))
                    .push_bind(source_tag(variation.source));
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::info!(
            "[SqliteStore] loaded {} levels, {} entities, {} edges, {} variations",
            dataset.levels.len(),
            dataset.entities.len(),
            dataset.edges.len(),
            variations.len()
        );
        Ok(())
    }

    pub async fn entity_count(&self) -> Result<usize, MapperError> {
        let row = sqlx::query("SELECT COUNT(*) FROM entity")
            .fetch_one(&self.0)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub async fn entity_by_code(&self, code: EntityCode) -> Result<Option<Entity>, MapperError> {
        let entity = sqlx::query_as::<_, Entity>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entity e WHERE e.code = ? ORDER BY e.id LIMIT 1"
        ))
        .bind(sql_int(code, "entity code")?)
        .fetch_optional(&self.0)
        .await?;
        Ok(entity)
    }

    /// Finish a query whose WHERE clause is already open with the shared level and parent
    /// filters. `qb` must join `admin_hierarchy h` on the child side.
    async fn filtered_entities(
        &self,
        mut qb: QueryBuilder<'_, Sqlite>,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Entity>, MapperError> {
        if let Some(level_id) = level_id {
            qb.push(" AND e.level_id = ").push_bind(i64::from(level_id));
        }
        if let Some(parent_id) = parent_id {
            qb.push(" AND h.entity_id = ")
                .push_bind(sql_int(parent_id, "parent id")?);
        }
        qb.push(" ORDER BY e.id");
        let query = qb.build_query_as::<Entity>();
        let entities = query.fetch_all(&self.0).await.map_err(|e| {
            tracing::error!("[SqliteStore] entity query failed: {e}");
            e
        })?;
        Ok(entities)
    }
}

impl ReferenceStore for SqliteStore {
    #[tracing::instrument(skip(self))]
    async fn list_levels(&self) -> Result<Vec<Level>, MapperError> {
        let levels =
            sqlx::query_as::<_, Level>("SELECT id, name, rank FROM level ORDER BY rank, id")
                .fetch_all(&self.0)
                .await?;
        Ok(levels.into_iter().filter(|l| !l.is_root()).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn exact_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
    ) -> Result<Vec<Entity>, MapperError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ENTITY_COLUMNS} FROM entity e \
             LEFT JOIN admin_hierarchy h ON h.child_id = e.id \
             WHERE e.name_norm = "
        ));
        qb.push_bind(normalize_name(name));
        self.filtered_entities(qb, level_id, parent_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn variation_match(
        &self,
        name: &str,
        level_id: Option<LevelId>,
        parent_id: Option<EntityId>,
        source: VariationSource,
    ) -> Result<Vec<Entity>, MapperError> {
        let needle = normalize_name(name);
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ENTITY_COLUMNS} FROM entity e \
             LEFT JOIN admin_hierarchy h ON h.child_id = e.id \
             WHERE e.id IN (SELECT entity_id FROM variation WHERE name_norm = "
        ));
        qb.push_bind(needle.clone())
            .push(" AND source = ")
            .push_bind(source_tag(source));
        if source == VariationSource::Community {
            qb.push(" UNION SELECT entity_id FROM discovered_variation WHERE name_norm = ")
                .push_bind(needle);
        }
        qb.push(")");
        self.filtered_entities(qb, level_id, parent_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn children_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        let children = sqlx::query_as::<_, Entity>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entity e \
             JOIN admin_hierarchy h ON h.child_id = e.id \
             WHERE h.entity_id = ? ORDER BY e.id"
        ))
        .bind(sql_int(entity_id, "entity id")?)
        .fetch_all(&self.0)
        .await?;
        Ok(children)
    }

    #[tracing::instrument(skip(self))]
    async fn parents_of(&self, entity_id: EntityId) -> Result<Vec<Entity>, MapperError> {
        let chain = sqlx::query_as::<_, Entity>(&format!(
            "WITH RECURSIVE chain(id, depth) AS ( \
                 SELECT entity_id, 1 FROM admin_hierarchy WHERE child_id = ?1 \
                 UNION ALL \
                 SELECT h.entity_id, c.depth + 1 FROM admin_hierarchy h \
                 JOIN chain c ON h.child_id = c.id WHERE c.depth < ?2 \
             ) \
             SELECT {ENTITY_COLUMNS} FROM chain c JOIN entity e ON e.id = c.id \
             ORDER BY c.depth DESC"
        ))
        .bind(sql_int(entity_id, "entity id")?)
        .bind(MAX_HIERARCHY_DEPTH)
        .fetch_all(&self.0)
        .await?;

        let mut seen = BTreeSet::from([entity_id]);
        for entity in &chain {
            if !seen.insert(entity.id) {
                return Err(MapperError::InvalidHierarchy(format!(
                    "reference hierarchy cycles through entity {}",
                    entity.id
                )));
            }
        }
        Ok(chain)
    }

    #[tracing::instrument(skip(self, proposer_email))]
    async fn submit_variation(
        &self,
        name: &str,
        entity_code: EntityCode,
        proposer_email: &str,
    ) -> Result<Ack, MapperError> {
        let Some(entity) = self.entity_by_code(entity_code).await? else {
            return Ok(Ack {
                accepted: false,
                message: format!("no entity with code {entity_code}"),
            });
        };
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let name = name.trim();
        sqlx::query(
            "INSERT INTO discovered_variation \
             (entity_id, name, name_norm, proposer_email, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(sql_int(entity.id, "entity id")?)
        .bind(name)
        .bind(normalize_name(name))
        .bind(proposer_email.trim())
        .bind(created_at)
        .execute(&self.0)
        .await?;
        tracing::info!("[SqliteStore] recorded variation '{name}' for {entity}");
        Ok(Ack {
            accepted: true,
            message: format!("variation '{name}' recorded for {entity}"),
        })
    }
}

/// SQLite stores signed 64-bit integers; larger ids cannot be persisted.
fn sql_int(value: u64, what: &str) -> Result<i64, MapperError> {
    i64::try_from(value).map_err(|_| {
        MapperError::Serialization(format!("{what} {value} does not fit a SQLite integer"))
    })
}

fn source_tag(source: VariationSource) -> &'static str {
    match source {
        VariationSource::Curated => "curated",
        VariationSource::Community => "community",
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![
        Migration {
            version: 1,
            description: "create_directory_tables",
            sql: "\
            CREATE TABLE level (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
                rank INTEGER NOT NULL); \
            CREATE TABLE entity (id INTEGER PRIMARY KEY, code INTEGER NOT NULL, \
                name TEXT NOT NULL, name_norm TEXT NOT NULL, \
                level_id INTEGER NOT NULL REFERENCES level(id)); \
            CREATE INDEX entity_name_norm ON entity (name_norm); \
            CREATE INDEX entity_code ON entity (code); \
            CREATE TABLE admin_hierarchy (entity_id INTEGER NOT NULL REFERENCES entity(id), \
                child_id INTEGER NOT NULL UNIQUE REFERENCES entity(id)); \
            CREATE INDEX admin_hierarchy_parent ON admin_hierarchy (entity_id); \
            CREATE TABLE variation (entity_id INTEGER NOT NULL REFERENCES entity(id), \
                name TEXT NOT NULL, name_norm TEXT NOT NULL, source TEXT NOT NULL, \
                UNIQUE(entity_id, name_norm, source)); \
            CREATE INDEX variation_name_norm ON variation (name_norm);",
            kind: MigrationType::ReversibleUp,
        },
        Migration {
            version: 2,
            description: "create_discovered_variations",
            sql: "\
            CREATE TABLE discovered_variation (entity_id INTEGER NOT NULL REFERENCES entity(id), \
                name TEXT NOT NULL, name_norm TEXT NOT NULL, proposer_email TEXT NOT NULL, \
                created_at INTEGER NOT NULL); \
            CREATE INDEX discovered_variation_name_norm ON discovered_variation (name_norm);",
            kind: MigrationType::ReversibleUp,
        },
    ])
}

pub async fn db_init(db_path: &Path) -> Result<Pool<Sqlite>, MapperError> {
    tracing::debug!("Initializing reference db from file: {:?}", db_path);
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(false)
        .foreign_keys(true)
        .create_if_missing(true)
        .disable_statement_logging();
    let pool = PoolOptions::<Sqlite>::new().connect_with(options).await?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    let entity_count = sqlx::query("SELECT COUNT(*) FROM entity")
        .fetch_one(&pool)
        .await?;
    let edge_count = sqlx::query("SELECT COUNT(*) FROM admin_hierarchy")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tEntity count:\t{:?} \n \
         \tHierarchy edge count:\t{:?}",
        entity_count.try_get::<i64, usize>(0)?,
        edge_count.try_get::<i64, usize>(0)?
    );

    Ok(pool)
}
