//! PostgreSQL implementation of PackageStore
//!
//! Version creation runs in a single transaction serialized per
//! (owner, module, version) by a transaction-scoped advisory lock, with the
//! `module_versions_module_version_key` unique constraint as a backstop.
//! A second advisory lock per owner, always taken after the version lock,
//! serializes quota accounting across different versions and modules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modreg_core::{
    Checksum, Creator, FileRecord, HashAlgorithm, ModuleId, ModuleName, OwnerScope, Property,
    PropertyKind, QuotaLimits, QuotaUsage, VersionDraft, VersionId, VersionRecord, VersionString,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::blob::{BlobStore, BlobStream};
use crate::error::{DbError, DbResult};
use crate::repository::{quota_lock_key, version_lock_key, CreateOutcome, FileUpload, PackageStore};

const VERSION_COLUMNS: &str = r#"
    v.id, v.module_id, m.owner, m.name AS module, v.version, v.creator,
    v.is_internal, v.created_at
"#;

/// PostgreSQL implementation of PackageStore
#[derive(Clone)]
pub struct PostgresPackageStore {
    pool: PgPool,
    blobs: Arc<dyn BlobStore>,
}

impl PostgresPackageStore {
    /// Create a new PostgreSQL package store writing content to `blobs`
    pub fn new(pool: PgPool, blobs: Arc<dyn BlobStore>) -> Self {
        Self { pool, blobs }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Take a lock on `key` held until the transaction ends
    async fn advisory_lock(tx: &mut Transaction<'_, Postgres>, key: &str) -> DbResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn quota_usage(
        tx: &mut Transaction<'_, Postgres>,
        owner: &OwnerScope,
    ) -> DbResult<QuotaUsage> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*)
                   FROM module_versions v
                   JOIN modules m ON m.id = v.module_id
                  WHERE m.owner = $1) AS version_count,
                (SELECT COALESCE(SUM(f.size), 0)::BIGINT
                   FROM module_files f
                   JOIN module_versions v ON v.id = f.version_id
                   JOIN modules m ON m.id = v.module_id
                  WHERE m.owner = $1) AS total_size
            "#,
        )
        .bind(owner.as_str())
        .fetch_one(&mut **tx)
        .await?;

        let version_count: i64 = row.try_get("version_count")?;
        let total_size: i64 = row.try_get("total_size")?;

        Ok(QuotaUsage {
            version_count: version_count.max(0) as u64,
            total_size: total_size.max(0) as u64,
        })
    }

    async fn get_or_create_module(
        tx: &mut Transaction<'_, Postgres>,
        draft: &VersionDraft,
    ) -> DbResult<ModuleId> {
        sqlx::query(
            r#"
            INSERT INTO modules (id, owner, name, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner, name) DO NOTHING
            "#,
        )
        .bind(ModuleId::new().to_string())
        .bind(draft.owner.as_str())
        .bind(draft.module.as_str())
        .bind(draft.created_at)
        .execute(&mut **tx)
        .await?;

        let id: String =
            sqlx::query_scalar("SELECT id FROM modules WHERE owner = $1 AND name = $2")
                .bind(draft.owner.as_str())
                .bind(draft.module.as_str())
                .fetch_one(&mut **tx)
                .await?;

        ModuleId::from_str(&id).map_err(DbError::from)
    }
}

#[async_trait]
impl PackageStore for PostgresPackageStore {
    #[instrument(skip(self), fields(owner = %owner, module = %module))]
    async fn find_versions(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
    ) -> DbResult<Vec<VersionRecord>> {
        debug!("Listing module versions");

        let sql = format!(
            r#"
            SELECT {VERSION_COLUMNS}
            FROM module_versions v
            JOIN modules m ON m.id = v.module_id
            WHERE m.owner = $1 AND m.name = $2 AND v.is_internal = FALSE
            ORDER BY v.created_at ASC, v.id ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(owner.as_str())
            .bind(module.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_version).collect()
    }

    #[instrument(skip(self), fields(owner = %owner, module = %module))]
    async fn find_version(
        &self,
        owner: &OwnerScope,
        module: &ModuleName,
        version: &str,
    ) -> DbResult<Option<VersionRecord>> {
        debug!("Finding module version");

        let sql = format!(
            r#"
            SELECT {VERSION_COLUMNS}
            FROM module_versions v
            JOIN modules m ON m.id = v.module_id
            WHERE m.owner = $1 AND m.name = $2 AND v.version = $3 AND v.is_internal = FALSE
            "#
        );

        let row = sqlx::query(&sql)
            .bind(owner.as_str())
            .bind(module.as_str())
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_version).transpose()
    }

    #[instrument(skip(self), fields(version_id = %version_id, kind = %kind))]
    async fn get_properties(
        &self,
        version_id: &VersionId,
        kind: PropertyKind,
    ) -> DbResult<Vec<Property>> {
        let rows = sqlx::query(
            r#"
            SELECT version_id, name, value
            FROM version_properties
            WHERE version_id = $1 AND name = $2
            ORDER BY id ASC
            "#,
        )
        .bind(version_id.to_string())
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_property).collect()
    }

    #[instrument(skip(self), fields(version_id = %version_id))]
    async fn get_files(&self, version_id: &VersionId) -> DbResult<Vec<FileRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, version_id, name, size, sha256, sha3_256, blake3,
                   blob_key, is_lead, created_at
            FROM module_files
            WHERE version_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(version_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_file).collect()
    }

    #[instrument(skip(self, file), fields(file_id = %file.id, blob_key = %file.blob_key))]
    async fn open_file_stream(&self, file: &FileRecord) -> DbResult<BlobStream> {
        self.blobs
            .open(&file.blob_key)
            .await?
            .ok_or_else(|| {
                DbError::NotFound(format!("Blob {} for file {}", file.blob_key, file.id))
            })
    }

    #[instrument(
        skip(self, draft, upload, limits),
        fields(
            owner = %draft.owner,
            module = %draft.module,
            version = %draft.version,
            size = upload.size
        )
    )]
    async fn create_version(
        &self,
        draft: VersionDraft,
        upload: FileUpload,
        limits: &QuotaLimits,
    ) -> DbResult<CreateOutcome> {
        debug!("Creating module version");

        let mut tx = self.pool.begin().await?;

        let lock_key = version_lock_key(&draft.owner, &draft.module, &draft.version);
        Self::advisory_lock(&mut tx, &lock_key).await?;

        let duplicate: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM module_versions v
                JOIN modules m ON m.id = v.module_id
                WHERE m.owner = $1 AND m.name = $2 AND v.version = $3
            )
            "#,
        )
        .bind(draft.owner.as_str())
        .bind(draft.module.as_str())
        .bind(draft.version.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if duplicate {
            debug!("Version already exists");
            return Ok(CreateOutcome::Conflict);
        }

        Self::advisory_lock(&mut tx, &quota_lock_key(&draft.owner)).await?;
        let usage = Self::quota_usage(&mut tx, &draft.owner).await?;
        if let Err(dimension) = limits.check(usage, upload.size) {
            debug!(dimension = %dimension.as_str(), "Quota exceeded");
            return Ok(CreateOutcome::QuotaExceeded(dimension));
        }

        let module_id = Self::get_or_create_module(&mut tx, &draft).await?;

        let record = VersionRecord {
            id: VersionId::new(),
            module_id,
            owner: draft.owner.clone(),
            module: draft.module.clone(),
            version: draft.version.clone(),
            creator: draft.creator.clone(),
            is_internal: draft.is_internal,
            created_at: draft.created_at,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO module_versions (id, module_id, version, creator, is_internal, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.module_id.to_string())
        .bind(record.version.as_str())
        .bind(record.creator.as_str())
        .bind(record.is_internal)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await;

        match inserted.map_err(DbError::from) {
            Ok(_) => {}
            Err(e) if e.is_unique_violation() => {
                warn!("Unique constraint rejected version after lock");
                return Ok(CreateOutcome::Conflict);
            }
            Err(e) => return Err(e),
        }

        sqlx::query(
            r#"
            INSERT INTO version_properties (version_id, name, value)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(record.id.to_string())
        .bind(PropertyKind::Descriptor.as_str())
        .bind(&draft.descriptor)
        .execute(&mut *tx)
        .await?;

        let file = FileRecord::lead(
            record.id,
            draft.lead_file_name(),
            upload.size,
            &upload.digests,
            draft.created_at,
        );

        sqlx::query(
            r#"
            INSERT INTO module_files (
                id, version_id, name, size, sha256, sha3_256, blake3,
                blob_key, is_lead, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(file.id.to_string())
        .bind(file.version_id.to_string())
        .bind(&file.name)
        .bind(i64::try_from(file.size).map_err(|_| {
            DbError::InvalidData(format!("File size {} out of range", file.size))
        })?)
        .bind(file.sha256.value())
        .bind(file.sha3_256.value())
        .bind(file.blake3.value())
        .bind(&file.blob_key)
        .bind(file.is_lead)
        .bind(file.created_at)
        .execute(&mut *tx)
        .await?;

        // Content goes in last so that a failed blob write rolls back every row
        self.blobs
            .put(&file.blob_key, upload.content, upload.size)
            .await?;

        tx.commit().await?;

        debug!(version_id = %record.id, "Module version created");
        Ok(CreateOutcome::Created(record))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> DbResult<T>
where
    T: FromStr<Err = modreg_core::RegistryError>,
{
    let value: String = row.try_get(column)?;
    T::from_str(&value).map_err(|e| DbError::InvalidData(format!("{}: {}", column, e)))
}

fn parse_checksum(row: &PgRow, column: &str, algorithm: HashAlgorithm) -> DbResult<Checksum> {
    let value: String = row.try_get(column)?;
    Checksum::new(algorithm, value).map_err(|e| DbError::InvalidData(format!("{}: {}", column, e)))
}

fn row_to_version(row: &PgRow) -> DbResult<VersionRecord> {
    let owner: String = row.try_get("owner")?;
    let module: String = row.try_get("module")?;
    let version: String = row.try_get("version")?;
    let creator: String = row.try_get("creator")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(VersionRecord {
        id: parse_column(row, "id")?,
        module_id: parse_column(row, "module_id")?,
        owner: OwnerScope::parse(owner)?,
        module: ModuleName::parse(module)?,
        version: VersionString::parse(version)?,
        creator: Creator::new(creator),
        is_internal: row.try_get("is_internal")?,
        created_at,
    })
}

fn row_to_property(row: &PgRow) -> DbResult<Property> {
    Ok(Property {
        version_id: parse_column(row, "version_id")?,
        kind: parse_column(row, "name")?,
        value: row.try_get("value")?,
    })
}

fn row_to_file(row: &PgRow) -> DbResult<FileRecord> {
    let size: i64 = row.try_get("size")?;

    Ok(FileRecord {
        id: parse_column(row, "id")?,
        version_id: parse_column(row, "version_id")?,
        name: row.try_get("name")?,
        size: u64::try_from(size)
            .map_err(|_| DbError::InvalidData(format!("Negative file size: {}", size)))?,
        sha256: parse_checksum(row, "sha256", HashAlgorithm::SHA256)?,
        sha3_256: parse_checksum(row, "sha3_256", HashAlgorithm::SHA3_256)?,
        blake3: parse_checksum(row, "blake3", HashAlgorithm::BLAKE3)?,
        blob_key: row.try_get("blob_key")?,
        is_lead: row.try_get("is_lead")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    //! These tests need a PostgreSQL database named by `DATABASE_URL`.
    //! Run them with `cargo test -p modreg-db -- --ignored`.

    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::pool::{create_pool, PoolConfig};
    use crate::DEFAULT_DATABASE_URL_ENV;
    use chrono::TimeZone;
    use futures::future::join_all;
    use modreg_core::{ContentDigests, QuotaDimension};
    use std::io::{Cursor, Read};

    /// Blob store whose writes always fail
    struct FailingBlobStore;

    #[async_trait]
    impl BlobStore for FailingBlobStore {
        async fn put(
            &self,
            key: &str,
            _content: Box<dyn Read + Send>,
            _expected_size: u64,
        ) -> DbResult<u64> {
            Err(DbError::Blob(format!("Disk full while writing {}", key)))
        }

        async fn open(&self, _key: &str) -> DbResult<Option<BlobStream>> {
            Ok(None)
        }
    }

    async fn connect() -> PgPool {
        let url = std::env::var(DEFAULT_DATABASE_URL_ENV)
            .expect("DATABASE_URL must point at a test database");
        create_pool(&PoolConfig::new(url).max_connections(20))
            .await
            .expect("Failed to connect to test database")
    }

    async fn store() -> PostgresPackageStore {
        PostgresPackageStore::new(connect().await, Arc::new(MemoryBlobStore::new()))
    }

    /// Owner scope no other test run shares
    fn fresh_owner() -> OwnerScope {
        OwnerScope::parse(format!("test-{}", ModuleId::new()).to_lowercase()).unwrap()
    }

    fn draft(owner: &OwnerScope, module: &str, version: &str) -> VersionDraft {
        VersionDraft {
            owner: owner.clone(),
            module: ModuleName::parse(module).unwrap(),
            version: VersionString::parse(version).unwrap(),
            creator: Creator::new("alice"),
            descriptor: format!("module {}\n", module),
            is_internal: false,
            created_at: Utc.timestamp_opt(100, 0).unwrap(),
        }
    }

    fn upload(bytes: &[u8]) -> FileUpload {
        let checksum = |algorithm: HashAlgorithm, fill: &str| {
            Checksum::new(algorithm, fill.repeat(64)).unwrap()
        };
        FileUpload {
            content: Box::new(Cursor::new(bytes.to_vec())),
            size: bytes.len() as u64,
            digests: ContentDigests {
                sha256: checksum(HashAlgorithm::SHA256, "a"),
                sha3_256: checksum(HashAlgorithm::SHA3_256, "b"),
                blake3: checksum(HashAlgorithm::BLAKE3, "c"),
            },
        }
    }

    async fn owner_row_count(pool: &PgPool, table: &str, owner: &OwnerScope) -> i64 {
        let join = match table {
            "modules" => "",
            "module_versions" => "JOIN module_versions t ON t.module_id = m.id",
            "version_properties" => {
                "JOIN module_versions v ON v.module_id = m.id \
                 JOIN version_properties t ON t.version_id = v.id"
            }
            "module_files" => {
                "JOIN module_versions v ON v.module_id = m.id \
                 JOIN module_files t ON t.version_id = v.id"
            }
            other => panic!("unknown table {}", other),
        };
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM modules m {} WHERE m.owner = $1",
            join
        ))
        .bind(owner.as_str())
        .fetch_one(pool)
        .await
        .unwrap()
    }

    fn count_created(outcomes: &[DbResult<CreateOutcome>]) -> usize {
        outcomes
            .iter()
            .filter(|o| matches!(o, Ok(CreateOutcome::Created(_))))
            .count()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_create_reuses_module_and_reads_back() {
        let store = store().await;
        let owner = fresh_owner();
        let limits = QuotaLimits::unlimited();

        let first = store
            .create_version(draft(&owner, "widget", "v1.0.0"), upload(b"one"), &limits)
            .await
            .unwrap();
        let second = store
            .create_version(draft(&owner, "widget", "v1.1.0"), upload(b"two"), &limits)
            .await
            .unwrap();
        let (first, second) = match (first, second) {
            (CreateOutcome::Created(a), CreateOutcome::Created(b)) => (a, b),
            other => panic!("expected two Created outcomes, got {:?}", other),
        };
        assert_eq!(first.module_id, second.module_id);
        assert_eq!(owner_row_count(store.pool(), "modules", &owner).await, 1);

        let module = ModuleName::parse("widget").unwrap();
        let found = store
            .find_version(&owner, &module, "v1.1.0")
            .await
            .unwrap();
        assert_eq!(found, Some(second.clone()));

        let files = store.get_files(&second.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "v1.1.0.zip");
        assert_eq!(files[0].size, 3);

        let props = store
            .get_properties(&second.id, PropertyKind::Descriptor)
            .await
            .unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].value, "module widget\n");
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_same_key_creates_once() {
        let store = store().await;
        let owner = fresh_owner();
        let limits = QuotaLimits::unlimited();

        let outcomes = join_all((0..8).map(|_| {
            store.create_version(draft(&owner, "widget", "v1.0.0"), upload(b"same"), &limits)
        }))
        .await;

        assert_eq!(count_created(&outcomes), 1);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Ok(CreateOutcome::Created(_)) | Ok(CreateOutcome::Conflict))));
        assert_eq!(owner_row_count(store.pool(), "module_versions", &owner).await, 1);
        assert_eq!(owner_row_count(store.pool(), "module_files", &owner).await, 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_different_keys_respect_version_quota() {
        let store = store().await;
        let owner = fresh_owner();
        let limits = QuotaLimits {
            max_version_count: Some(1),
            ..Default::default()
        };

        let outcomes = join_all((0..8).map(|i| {
            let module = format!("widget{}", i % 2);
            let version = format!("v1.{}.0", i);
            store.create_version(draft(&owner, &module, &version), upload(b"zip"), &limits)
        }))
        .await;

        assert_eq!(count_created(&outcomes), 1);
        assert!(outcomes.iter().all(|o| matches!(
            o,
            Ok(CreateOutcome::Created(_))
                | Ok(CreateOutcome::QuotaExceeded(QuotaDimension::VersionCount))
        )));
        assert_eq!(owner_row_count(store.pool(), "module_versions", &owner).await, 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_failed_blob_write_leaves_no_rows() {
        let store = PostgresPackageStore::new(connect().await, Arc::new(FailingBlobStore));
        let owner = fresh_owner();

        let result = store
            .create_version(
                draft(&owner, "widget", "v1.0.0"),
                upload(b"lost"),
                &QuotaLimits::unlimited(),
            )
            .await;
        assert!(matches!(result, Err(DbError::Blob(_))));

        let module = ModuleName::parse("widget").unwrap();
        assert!(store.find_versions(&owner, &module).await.unwrap().is_empty());
        for table in ["modules", "module_versions", "version_properties", "module_files"] {
            assert_eq!(owner_row_count(store.pool(), table, &owner).await, 0, "{}", table);
        }
    }
}
