use crate::db::{CollectionCounters, DbCollection, ImportMethod, ImportStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

/// A collection as requested by a client, before validation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionDraft {
    pub name: String,
    /// Defaults to UPLOADED
    pub import_method: Option<ImportMethod>,
    pub source_job: Option<String>,
    pub source_catalog: Option<String>,
    pub source_backend_import: Option<String>,
    pub notes: Option<String>,
    pub pattern: Option<String>,
    pub locked: bool,
    pub publicly_shared: bool,

    pub s3_bucket_name: Option<String>,
    pub s3_folder_name: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_file_extensions: Option<String>,
    pub s3_recursive: bool,

    pub gdrive_code: Option<String>,
    pub gdrive_folder_name: Option<String>,
    pub gdrive_file_extensions: Option<String>,
    pub gdrive_recursive: bool,
}

impl CollectionDraft {
    pub fn named(name: &str) -> Self {
        CollectionDraft {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Collection holding the images produced by one output of a pipeline job
    pub fn from_job(job_id: &str, job_name: &str, output_name: &str) -> Self {
        CollectionDraft {
            name: format!("{}-{}", job_name, output_name),
            import_method: Some(ImportMethod::Job),
            source_job: Some(job_id.to_string()),
            locked: true,
            ..Default::default()
        }
    }

    /// Collection cloned from a catalog entry
    pub fn from_catalog(name: &str, catalog_id: &str) -> Self {
        CollectionDraft {
            name: name.to_string(),
            import_method: Some(ImportMethod::Catalog),
            source_catalog: Some(catalog_id.to_string()),
            locked: true,
            ..Default::default()
        }
    }

    pub(crate) fn into_collection(self, owner: &str, now: DateTime<Utc>) -> DbCollection {
        let import_method = self.import_method.unwrap_or(ImportMethod::Uploaded);
        let import_status = if import_method.uses_connector() {
            ImportStatus::Importing
        } else {
            ImportStatus::Ready
        };

        DbCollection {
            id: Uuid::new_v4().to_string(),
            name: self.name.trim().to_string(),
            owner: owner.to_string(),
            creation_date: now,
            import_method,
            source_job: self.source_job,
            source_catalog: self.source_catalog,
            source_backend_import: self.source_backend_import,
            notes: self.notes,
            pattern: self.pattern,
            locked: self.locked || import_method == ImportMethod::Catalog,
            publicly_shared: self.publicly_shared,
            s3_bucket_name: self.s3_bucket_name,
            s3_folder_name: self.s3_folder_name,
            s3_access_key_id: self.s3_access_key_id,
            s3_secret_access_key: self.s3_secret_access_key,
            s3_file_extensions: self.s3_file_extensions,
            s3_recursive: self.s3_recursive,
            gdrive_code: self.gdrive_code,
            gdrive_folder_name: self.gdrive_folder_name,
            gdrive_file_extensions: self.gdrive_file_extensions,
            gdrive_recursive: self.gdrive_recursive,
            import_status,
            counters: CollectionCounters::default(),
        }
    }
}

/// Requested changes to a collection.
///
/// `None` leaves a field as it is. Immutable fields are accepted here so that
/// attempts to change them can be rejected explicitly.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionPatch {
    pub name: Option<String>,
    pub notes: Option<String>,
    pub pattern: Option<String>,
    pub locked: Option<bool>,
    pub publicly_shared: Option<bool>,

    pub owner: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub import_method: Option<ImportMethod>,
    pub source_job: Option<String>,
    pub source_catalog: Option<String>,

    pub source_backend_import: Option<String>,
    pub s3_bucket_name: Option<String>,
    pub s3_folder_name: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_file_extensions: Option<String>,
    pub s3_recursive: Option<bool>,
    pub gdrive_code: Option<String>,
    pub gdrive_folder_name: Option<String>,
    pub gdrive_file_extensions: Option<String>,
    pub gdrive_recursive: Option<bool>,
}

impl CollectionPatch {
    pub fn lock() -> Self {
        CollectionPatch {
            locked: Some(true),
            ..Default::default()
        }
    }

    pub fn rename(name: &str) -> Self {
        CollectionPatch {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// The complete new state this patch asks for
    pub fn apply_to(&self, old: &DbCollection) -> DbCollection {
        fn pick<T: Clone>(patch: &Option<T>, old: &T) -> T {
            patch.clone().unwrap_or_else(|| old.clone())
        }
        fn pick_opt<T: Clone>(patch: &Option<T>, old: &Option<T>) -> Option<T> {
            patch.clone().or_else(|| old.clone())
        }

        DbCollection {
            id: old.id.clone(),
            name: self
                .name
                .as_deref()
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| old.name.clone()),
            owner: pick(&self.owner, &old.owner),
            creation_date: pick(&self.creation_date, &old.creation_date),
            import_method: pick(&self.import_method, &old.import_method),
            source_job: pick_opt(&self.source_job, &old.source_job),
            source_catalog: pick_opt(&self.source_catalog, &old.source_catalog),
            source_backend_import: pick_opt(
                &self.source_backend_import,
                &old.source_backend_import,
            ),
            notes: pick_opt(&self.notes, &old.notes),
            pattern: pick_opt(&self.pattern, &old.pattern),
            locked: pick(&self.locked, &old.locked),
            publicly_shared: pick(&self.publicly_shared, &old.publicly_shared),
            s3_bucket_name: pick_opt(&self.s3_bucket_name, &old.s3_bucket_name),
            s3_folder_name: pick_opt(&self.s3_folder_name, &old.s3_folder_name),
            s3_access_key_id: pick_opt(&self.s3_access_key_id, &old.s3_access_key_id),
            s3_secret_access_key: pick_opt(
                &self.s3_secret_access_key,
                &old.s3_secret_access_key,
            ),
            s3_file_extensions: pick_opt(&self.s3_file_extensions, &old.s3_file_extensions),
            s3_recursive: pick(&self.s3_recursive, &old.s3_recursive),
            gdrive_code: pick_opt(&self.gdrive_code, &old.gdrive_code),
            gdrive_folder_name: pick_opt(&self.gdrive_folder_name, &old.gdrive_folder_name),
            gdrive_file_extensions: pick_opt(
                &self.gdrive_file_extensions,
                &old.gdrive_file_extensions,
            ),
            gdrive_recursive: pick(&self.gdrive_recursive, &old.gdrive_recursive),
            import_status: old.import_status,
            counters: old.counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_job_names_and_locks() {
        let draft = CollectionDraft::from_job("job-42", "stitching", "output");
        assert_eq!(draft.name, "stitching-output");
        assert_eq!(draft.source_job.as_deref(), Some("job-42"));
        assert!(draft.locked);

        let collection = draft.into_collection("alice", Utc::now());
        assert_eq!(collection.import_method, ImportMethod::Job);
        assert_eq!(collection.import_status, ImportStatus::Ready);
    }

    #[test]
    fn test_catalog_is_always_locked_and_default_method_is_uploaded() {
        let mut draft = CollectionDraft::from_catalog("catalog copy", "cat-1");
        draft.locked = false;
        assert!(draft.into_collection("alice", Utc::now()).locked);

        let uploaded = CollectionDraft::named("  plate 1 ").into_collection("bob", Utc::now());
        assert_eq!(uploaded.import_method, ImportMethod::Uploaded);
        assert_eq!(uploaded.name, "plate 1");
        assert_eq!(uploaded.owner, "bob");
        assert!(!uploaded.locked);
    }

    #[test]
    fn test_connector_collections_start_importing() {
        let draft = CollectionDraft {
            import_method: Some(ImportMethod::S3Import),
            ..CollectionDraft::named("s3")
        };
        assert_eq!(
            draft.into_collection("alice", Utc::now()).import_status,
            ImportStatus::Importing
        );
    }

    #[test]
    fn test_patch_keeps_untouched_fields() {
        let old = CollectionDraft {
            notes: Some("first run".to_string()),
            ..CollectionDraft::named("plate")
        }
        .into_collection("alice", Utc::now());

        let new = CollectionPatch::rename("plate v2").apply_to(&old);

        assert_eq!(new.name, "plate v2");
        assert_eq!(new.notes, old.notes);
        assert_eq!(new.owner, old.owner);
        assert_eq!(new.creation_date, old.creation_date);
        assert_eq!(new.id, old.id);
    }
}
