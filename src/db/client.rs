use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::db::models::*;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

const COLLECTION_COLUMNS: &str = r#"
    id, name, owner, creation_date, import_method, source_job, source_catalog,
    source_backend_import, notes, pattern, locked, publicly_shared,
    s3_bucket_name, s3_folder_name, s3_access_key_id, s3_secret_access_key,
    s3_file_extensions, s3_recursive, gdrive_code, gdrive_folder_name,
    gdrive_file_extensions, gdrive_recursive, import_status,
    number_of_images, images_total_size, number_importing_images,
    number_of_import_errors, number_of_metadata_files, metadata_files_total_size
"#;

const COUNTER_COLUMNS: &str = r#"
    number_of_images, images_total_size, number_importing_images,
    number_of_import_errors, number_of_metadata_files, metadata_files_total_size
"#;

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Collections table. Counters are only written through apply_counter_delta
        // and set_counters, never by update_collection.
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                owner TEXT NOT NULL,
                creation_date TEXT NOT NULL,
                import_method TEXT NOT NULL,
                source_job TEXT UNIQUE,
                source_catalog TEXT,
                source_backend_import TEXT,
                notes TEXT,
                pattern TEXT,
                locked BOOLEAN NOT NULL DEFAULT FALSE,
                publicly_shared BOOLEAN NOT NULL DEFAULT FALSE,
                s3_bucket_name TEXT,
                s3_folder_name TEXT,
                s3_access_key_id TEXT,
                s3_secret_access_key TEXT,
                s3_file_extensions TEXT,
                s3_recursive BOOLEAN NOT NULL DEFAULT FALSE,
                gdrive_code TEXT,
                gdrive_folder_name TEXT,
                gdrive_file_extensions TEXT,
                gdrive_recursive BOOLEAN NOT NULL DEFAULT FALSE,
                import_status TEXT NOT NULL DEFAULT '{}',
                number_of_images INTEGER NOT NULL DEFAULT 0,
                images_total_size INTEGER NOT NULL DEFAULT 0,
                number_importing_images INTEGER NOT NULL DEFAULT 0,
                number_of_import_errors INTEGER NOT NULL DEFAULT 0,
                number_of_metadata_files INTEGER NOT NULL DEFAULT 0,
                metadata_files_total_size INTEGER NOT NULL DEFAULT 0
            )
            "#,
            IMPORT_STATUS_READY
        ))
        .execute(&self.pool)
        .await?;

        // Images table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                collection_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                original_file_name TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                importing BOOLEAN NOT NULL DEFAULT TRUE,
                import_error BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL,
                FOREIGN KEY (collection_id) REFERENCES collections (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Metadata files table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata_files (
                id TEXT PRIMARY KEY,
                collection_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (collection_id) REFERENCES collections (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_images_collection_id ON images (collection_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metadata_files_collection_id ON metadata_files (collection_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new collection
    pub async fn insert_collection(&self, collection: &DbCollection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO collections (
                id, name, owner, creation_date, import_method, source_job, source_catalog,
                source_backend_import, notes, pattern, locked, publicly_shared,
                s3_bucket_name, s3_folder_name, s3_access_key_id, s3_secret_access_key,
                s3_file_extensions, s3_recursive, gdrive_code, gdrive_folder_name,
                gdrive_file_extensions, gdrive_recursive, import_status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&collection.id)
        .bind(&collection.name)
        .bind(&collection.owner)
        .bind(collection.creation_date.to_rfc3339())
        .bind(collection.import_method)
        .bind(&collection.source_job)
        .bind(&collection.source_catalog)
        .bind(&collection.source_backend_import)
        .bind(&collection.notes)
        .bind(&collection.pattern)
        .bind(collection.locked)
        .bind(collection.publicly_shared)
        .bind(&collection.s3_bucket_name)
        .bind(&collection.s3_folder_name)
        .bind(&collection.s3_access_key_id)
        .bind(&collection.s3_secret_access_key)
        .bind(&collection.s3_file_extensions)
        .bind(collection.s3_recursive)
        .bind(&collection.gdrive_code)
        .bind(&collection.gdrive_folder_name)
        .bind(&collection.gdrive_file_extensions)
        .bind(collection.gdrive_recursive)
        .bind(collection.import_status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the mutable fields of a collection
    ///
    /// Immutable fields and cached counters are never written here.
    pub async fn update_collection(&self, collection: &DbCollection) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE collections SET
                name = ?, notes = ?, pattern = ?, locked = ?, publicly_shared = ?,
                source_backend_import = ?,
                s3_bucket_name = ?, s3_folder_name = ?, s3_access_key_id = ?,
                s3_secret_access_key = ?, s3_file_extensions = ?, s3_recursive = ?,
                gdrive_code = ?, gdrive_folder_name = ?, gdrive_file_extensions = ?,
                gdrive_recursive = ?
            WHERE id = ?
            "#,
        )
        .bind(&collection.name)
        .bind(&collection.notes)
        .bind(&collection.pattern)
        .bind(collection.locked)
        .bind(collection.publicly_shared)
        .bind(&collection.source_backend_import)
        .bind(&collection.s3_bucket_name)
        .bind(&collection.s3_folder_name)
        .bind(&collection.s3_access_key_id)
        .bind(&collection.s3_secret_access_key)
        .bind(&collection.s3_file_extensions)
        .bind(collection.s3_recursive)
        .bind(&collection.gdrive_code)
        .bind(&collection.gdrive_folder_name)
        .bind(&collection.gdrive_file_extensions)
        .bind(collection.gdrive_recursive)
        .bind(&collection.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Update collection import status
    pub async fn update_collection_status(
        &self,
        collection_id: &str,
        status: ImportStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE collections SET import_status = ? WHERE id = ?")
            .bind(status)
            .bind(collection_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get a collection by ID
    pub async fn get_collection_by_id(
        &self,
        collection_id: &str,
    ) -> Result<Option<DbCollection>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM collections WHERE id = ?",
            COLLECTION_COLUMNS
        ))
        .bind(collection_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| collection_from_row(&row)).transpose()
    }

    /// Get the collection produced by a pipeline job
    pub async fn get_collection_by_source_job(
        &self,
        job_id: &str,
    ) -> Result<Option<DbCollection>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM collections WHERE source_job = ?",
            COLLECTION_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| collection_from_row(&row)).transpose()
    }

    /// Get all collections, newest first
    pub async fn get_collections(&self) -> Result<Vec<DbCollection>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM collections ORDER BY creation_date DESC, name",
            COLLECTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(collection_from_row).collect()
    }

    /// Check whether a name is already taken, optionally ignoring one collection
    pub async fn collection_name_exists(
        &self,
        name: &str,
        excluding_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM collections WHERE name = ? AND (? IS NULL OR id != ?)",
        )
        .bind(name)
        .bind(excluding_id)
        .bind(excluding_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Delete a collection record. Returns false if it did not exist.
    pub async fn delete_collection(&self, collection_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(collection_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert a new image
    pub async fn insert_image(&self, image: &DbImage) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO images (
                id, collection_id, file_name, original_file_name, size_bytes,
                importing, import_error, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.id)
        .bind(&image.collection_id)
        .bind(&image.file_name)
        .bind(&image.original_file_name)
        .bind(image.size_bytes)
        .bind(image.importing)
        .bind(image.import_error)
        .bind(image.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a single image by ID
    pub async fn get_image_by_id(&self, image_id: &str) -> Result<Option<DbImage>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM images WHERE id = ?")
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| image_from_row(&row)).transpose()
    }

    /// Get all images of a collection in registration order
    pub async fn get_images_for_collection(
        &self,
        collection_id: &str,
    ) -> Result<Vec<DbImage>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM images WHERE collection_id = ? ORDER BY created_at, rowid",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(image_from_row).collect()
    }

    /// Record the size of an image once its bytes are known
    pub async fn update_image_size(
        &self,
        image_id: &str,
        size_bytes: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE images SET size_bytes = ? WHERE id = ?")
            .bind(size_bytes)
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clear the importing flag of an image, setting its error flag.
    ///
    /// Only applies to images still importing, so a second call for the same
    /// image is a no-op. Returns whether the image transitioned.
    pub async fn finish_image_import(
        &self,
        image_id: &str,
        import_error: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE images SET importing = FALSE, import_error = ? WHERE id = ? AND importing = TRUE",
        )
        .bind(import_error)
        .bind(image_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all images of a collection
    pub async fn delete_images_for_collection(
        &self,
        collection_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM images WHERE collection_id = ?")
            .bind(collection_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Insert a metadata file
    pub async fn insert_metadata_file(&self, file: &DbMetadataFile) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO metadata_files (id, collection_id, file_name, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.collection_id)
        .bind(&file.file_name)
        .bind(file.size_bytes)
        .bind(file.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all metadata files of a collection
    pub async fn get_metadata_files_for_collection(
        &self,
        collection_id: &str,
    ) -> Result<Vec<DbMetadataFile>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM metadata_files WHERE collection_id = ? ORDER BY created_at, rowid",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DbMetadataFile {
                    id: row.try_get("id")?,
                    collection_id: row.try_get("collection_id")?,
                    file_name: row.try_get("file_name")?,
                    size_bytes: row.try_get("size_bytes")?,
                    created_at: parse_timestamp(row, "created_at")?,
                })
            })
            .collect()
    }

    /// Delete all metadata files of a collection
    pub async fn delete_metadata_files_for_collection(
        &self,
        collection_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM metadata_files WHERE collection_id = ?")
            .bind(collection_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Atomically add a delta to the cached counters of a collection.
    ///
    /// The increment is a single UPDATE statement; the resulting counters are
    /// read back inside the same transaction. Returns None if the collection
    /// does not exist (deleted mid-import).
    pub async fn apply_counter_delta(
        &self,
        collection_id: &str,
        delta: &CounterDelta,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE collections SET
                number_of_images = number_of_images + ?,
                images_total_size = images_total_size + ?,
                number_importing_images = number_importing_images + ?,
                number_of_import_errors = number_of_import_errors + ?,
                number_of_metadata_files = number_of_metadata_files + ?,
                metadata_files_total_size = metadata_files_total_size + ?
            WHERE id = ?
            "#,
        )
        .bind(delta.images)
        .bind(delta.images_size)
        .bind(delta.importing)
        .bind(delta.import_errors)
        .bind(delta.metadata_files)
        .bind(delta.metadata_size)
        .bind(collection_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM collections WHERE id = ?",
            COUNTER_COLUMNS
        ))
        .bind(collection_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(counters_from_row(&row)?))
    }

    /// Read the cached counters of a collection
    pub async fn get_counters(
        &self,
        collection_id: &str,
    ) -> Result<Option<CollectionCounters>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM collections WHERE id = ?",
            COUNTER_COLUMNS
        ))
        .bind(collection_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| counters_from_row(&row)).transpose()
    }

    /// Compute counters from the images and metadata_files tables
    pub async fn compute_counters(
        &self,
        collection_id: &str,
    ) -> Result<CollectionCounters, sqlx::Error> {
        let images = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS number_of_images,
                COALESCE(SUM(size_bytes), 0) AS images_total_size,
                COALESCE(SUM(CASE WHEN importing THEN 1 ELSE 0 END), 0) AS number_importing_images,
                COALESCE(SUM(CASE WHEN import_error THEN 1 ELSE 0 END), 0) AS number_of_import_errors
            FROM images WHERE collection_id = ?
            "#,
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;

        let metadata = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS number_of_metadata_files,
                COALESCE(SUM(size_bytes), 0) AS metadata_files_total_size
            FROM metadata_files WHERE collection_id = ?
            "#,
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CollectionCounters {
            number_of_images: images.try_get("number_of_images")?,
            images_total_size: images.try_get("images_total_size")?,
            number_importing_images: images.try_get("number_importing_images")?,
            number_of_import_errors: images.try_get("number_of_import_errors")?,
            number_of_metadata_files: metadata.try_get("number_of_metadata_files")?,
            metadata_files_total_size: metadata.try_get("metadata_files_total_size")?,
        })
    }

    /// Overwrite the cached counters of a collection
    pub async fn set_counters(
        &self,
        collection_id: &str,
        counters: &CollectionCounters,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE collections SET
                number_of_images = ?, images_total_size = ?, number_importing_images = ?,
                number_of_import_errors = ?, number_of_metadata_files = ?,
                metadata_files_total_size = ?
            WHERE id = ?
            "#,
        )
        .bind(counters.number_of_images)
        .bind(counters.images_total_size)
        .bind(counters.number_importing_images)
        .bind(counters.number_of_import_errors)
        .bind(counters.number_of_metadata_files)
        .bind(counters.metadata_files_total_size)
        .bind(collection_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

fn counters_from_row(row: &SqliteRow) -> Result<CollectionCounters, sqlx::Error> {
    Ok(CollectionCounters {
        number_of_images: row.try_get("number_of_images")?,
        images_total_size: row.try_get("images_total_size")?,
        number_importing_images: row.try_get("number_importing_images")?,
        number_of_import_errors: row.try_get("number_of_import_errors")?,
        number_of_metadata_files: row.try_get("number_of_metadata_files")?,
        metadata_files_total_size: row.try_get("metadata_files_total_size")?,
    })
}

fn collection_from_row(row: &SqliteRow) -> Result<DbCollection, sqlx::Error> {
    Ok(DbCollection {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner: row.try_get("owner")?,
        creation_date: parse_timestamp(row, "creation_date")?,
        import_method: row.try_get("import_method")?,
        source_job: row.try_get("source_job")?,
        source_catalog: row.try_get("source_catalog")?,
        source_backend_import: row.try_get("source_backend_import")?,
        notes: row.try_get("notes")?,
        pattern: row.try_get("pattern")?,
        locked: row.try_get("locked")?,
        publicly_shared: row.try_get("publicly_shared")?,
        s3_bucket_name: row.try_get("s3_bucket_name")?,
        s3_folder_name: row.try_get("s3_folder_name")?,
        s3_access_key_id: row.try_get("s3_access_key_id")?,
        s3_secret_access_key: row.try_get("s3_secret_access_key")?,
        s3_file_extensions: row.try_get("s3_file_extensions")?,
        s3_recursive: row.try_get("s3_recursive")?,
        gdrive_code: row.try_get("gdrive_code")?,
        gdrive_folder_name: row.try_get("gdrive_folder_name")?,
        gdrive_file_extensions: row.try_get("gdrive_file_extensions")?,
        gdrive_recursive: row.try_get("gdrive_recursive")?,
        import_status: row.try_get("import_status")?,
        counters: counters_from_row(row)?,
    })
}

fn image_from_row(row: &SqliteRow) -> Result<DbImage, sqlx::Error> {
    Ok(DbImage {
        id: row.try_get("id")?,
        collection_id: row.try_get("collection_id")?,
        file_name: row.try_get("file_name")?,
        original_file_name: row.try_get("original_file_name")?,
        size_bytes: row.try_get("size_bytes")?,
        importing: row.try_get("importing")?,
        import_error: row.try_get("import_error")?,
        created_at: parse_timestamp(row, "created_at")?,
    })
}
