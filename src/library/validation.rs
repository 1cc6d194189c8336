// Pure checks behind the lifecycle gates. Anything that needs the database
// (name uniqueness, source resolution, counter snapshots) lives in the manager.

use crate::db::{DbCollection, ImportMethod, ImportStatus};
use crate::library::CollectionError;

fn invalid(message: &str) -> CollectionError {
    CollectionError::Validation(message.to_string())
}

/// Source parameters a collection needs before its import can be launched
pub fn check_source_parameters(collection: &DbCollection) -> Result<(), CollectionError> {
    match collection.import_method {
        ImportMethod::BackendImport => {
            if is_blank(&collection.source_backend_import) {
                return Err(invalid("Backend import source folder is empty."));
            }
        }
        ImportMethod::S3Import => {
            if collection.s3_folder_name.is_none() {
                return Err(invalid("Folder path is empty"));
            }
        }
        ImportMethod::GdriveImport => {
            let folder = collection.gdrive_folder_name.as_deref().unwrap_or("");
            if folder.is_empty() {
                return Err(invalid("Folder path is empty"));
            }
            if folder.contains('\\') {
                return Err(invalid(
                    "The folder path should not contain escape characters '\\'. Use '/' as a delimiter.",
                ));
            }
        }
        ImportMethod::Job => {
            if is_blank(&collection.source_job) {
                return Err(invalid("A job collection needs a source job."));
            }
        }
        ImportMethod::Catalog => {
            if is_blank(&collection.source_catalog) {
                return Err(invalid("A catalog collection needs a source catalog."));
            }
        }
        ImportMethod::Uploaded => {}
    }
    Ok(())
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Checks on a draft that do not depend on other collections
pub fn check_new_collection(collection: &DbCollection) -> Result<(), CollectionError> {
    if collection.name.is_empty() {
        return Err(invalid("Collection name is required."));
    }
    if collection.publicly_shared && !collection.locked {
        return Err(invalid(
            "Can not set an unlocked collection to public, please lock collection first.",
        ));
    }
    check_source_parameters(collection)
}

/// Public sharing only goes false -> true, and only on an already locked collection
pub fn check_sharing(old: &DbCollection, new: &DbCollection) -> Result<(), CollectionError> {
    if old.publicly_shared && !new.publicly_shared {
        return Err(invalid("Can not set a public collection to private."));
    }
    if !old.publicly_shared && new.publicly_shared && !old.locked {
        return Err(invalid(
            "Can not set an unlocked collection to public, please lock collection first.",
        ));
    }
    Ok(())
}

/// `owner`, `creation_date`, `import_method`, `source_catalog` and `source_job`
/// are fixed at creation
pub fn check_immutable_fields(
    old: &DbCollection,
    new: &DbCollection,
) -> Result<(), CollectionError> {
    if new.owner != old.owner {
        return Err(invalid("Can not change owner."));
    }
    if new.creation_date != old.creation_date {
        return Err(invalid("Can not change creation date."));
    }
    if new.import_method != old.import_method {
        return Err(invalid("Can not change import method."));
    }
    if new.source_catalog != old.source_catalog {
        return Err(invalid("Can not change source catalog."));
    }
    if new.source_job != old.source_job {
        return Err(invalid("Can not change source job."));
    }
    Ok(())
}

/// Whether the update locks the collection. Unlocking is never allowed.
pub fn check_lock_transition(
    old: &DbCollection,
    new: &DbCollection,
) -> Result<bool, CollectionError> {
    match (old.locked, new.locked) {
        (true, false) => Err(invalid("Can not unlock images collection.")),
        (false, true) => Ok(true),
        _ => Ok(false),
    }
}

/// A collection can only be locked once nothing is importing and nothing failed
pub fn check_lockable(collection: &DbCollection) -> Result<(), CollectionError> {
    if collection.import_status == ImportStatus::Importing
        || collection.counters.number_importing_images > 0
    {
        return Err(invalid(
            "Can not lock images collection while images are still importing.",
        ));
    }
    if collection.counters.number_of_import_errors > 0 {
        return Err(invalid("Can not lock images collection with import errors."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{CollectionDraft, CollectionPatch};
    use chrono::Utc;

    fn collection(draft: CollectionDraft) -> DbCollection {
        draft.into_collection("alice", Utc::now())
    }

    fn gdrive(folder: &str) -> DbCollection {
        collection(CollectionDraft {
            import_method: Some(ImportMethod::GdriveImport),
            gdrive_folder_name: Some(folder.to_string()),
            ..CollectionDraft::named("drive")
        })
    }

    #[test]
    fn test_gdrive_folder_must_use_forward_slashes() {
        let err = check_new_collection(&gdrive("a\\b")).unwrap_err();
        assert!(err.to_string().contains("escape characters"));
        assert!(check_new_collection(&gdrive("")).is_err());
        assert!(check_new_collection(&gdrive("/experiments/run1")).is_ok());
    }

    #[test]
    fn test_s3_requires_folder() {
        let mut s3 = collection(CollectionDraft {
            import_method: Some(ImportMethod::S3Import),
            ..CollectionDraft::named("s3")
        });
        assert_eq!(
            check_new_collection(&s3).unwrap_err().to_string(),
            "Folder path is empty"
        );
        s3.s3_folder_name = Some("/data/".to_string());
        assert!(check_new_collection(&s3).is_ok());
    }

    #[test]
    fn test_public_requires_lock_and_is_monotonic() {
        let old = collection(CollectionDraft::named("plate"));
        let public = CollectionPatch {
            publicly_shared: Some(true),
            ..Default::default()
        };
        assert!(check_sharing(&old, &public.apply_to(&old)).is_err());

        let mut locked_public = old.clone();
        locked_public.locked = true;
        locked_public.publicly_shared = true;
        let private = CollectionPatch {
            publicly_shared: Some(false),
            ..Default::default()
        };
        let err = check_sharing(&locked_public, &private.apply_to(&locked_public)).unwrap_err();
        assert_eq!(err.to_string(), "Can not set a public collection to private.");
    }

    #[test]
    fn test_immutable_fields() {
        let old = collection(CollectionDraft::named("plate"));
        let patches = [
            CollectionPatch {
                owner: Some("mallory".to_string()),
                ..Default::default()
            },
            CollectionPatch {
                creation_date: Some(Utc::now() + chrono::Duration::days(1)),
                ..Default::default()
            },
            CollectionPatch {
                import_method: Some(ImportMethod::Catalog),
                ..Default::default()
            },
            CollectionPatch {
                source_catalog: Some("cat".to_string()),
                ..Default::default()
            },
            CollectionPatch {
                source_job: Some("job".to_string()),
                ..Default::default()
            },
        ];

        for patch in patches {
            assert!(check_immutable_fields(&old, &patch.apply_to(&old)).is_err());
        }

        let unchanged = CollectionPatch {
            owner: Some("alice".to_string()),
            ..CollectionPatch::rename("renamed")
        };
        assert!(check_immutable_fields(&old, &unchanged.apply_to(&old)).is_ok());
    }

    #[test]
    fn test_lock_transitions() {
        let unlocked = collection(CollectionDraft::named("plate"));
        let locked = CollectionPatch::lock().apply_to(&unlocked);

        assert!(check_lock_transition(&unlocked, &locked).unwrap());
        assert!(!check_lock_transition(&locked, &locked).unwrap());
        assert!(check_lock_transition(&locked, &unlocked).is_err());
    }

    #[test]
    fn test_lockable_requires_quiet_collection() {
        let mut c = collection(CollectionDraft::named("plate"));
        assert!(check_lockable(&c).is_ok());

        c.counters.number_importing_images = 1;
        assert!(check_lockable(&c).is_err());

        c.counters.number_importing_images = 0;
        c.counters.number_of_import_errors = 2;
        assert!(check_lockable(&c).is_err());
    }
}
