use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_S3_REGION: &str = "us-east-1";

/// Application configuration
/// In debug builds: a `.env` file is loaded first if present
/// Every setting can be overridden from the environment
#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite database holding collections, images and metadata files
    pub database_path: PathBuf,
    /// Stable per-collection folders for finalized images
    pub collections_folder: PathBuf,
    /// Temporary folders used by direct uploads
    pub upload_tmp_folder: PathBuf,
    /// Staging area for in-flight downloads from import sources
    pub temp_folder: PathBuf,
    /// Root for relative BACKEND_IMPORT paths (absolute paths are used as-is when unset)
    pub local_import_root: Option<PathBuf>,
    /// Region used for per-collection S3 clients
    pub s3_region: String,
    /// Custom endpoint for S3-compatible services (MinIO etc.)
    pub s3_endpoint_url: Option<String>,
    /// Folder containing the Google Drive OAuth client secrets and the per-user token store
    pub gdrive_folder: PathBuf,
}

impl Config {
    /// Load configuration from the environment
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Dev mode activated - loaded .env file");
            }
        }

        Self::from_env()
    }

    fn from_env() -> Self {
        let defaults = Self::for_root(&default_data_dir());

        let path_var = |name: &str, fallback: PathBuf| {
            std::env::var(name).map(PathBuf::from).unwrap_or(fallback)
        };

        let config = Self {
            database_path: path_var("COLLECTIONS_DATABASE_PATH", defaults.database_path),
            collections_folder: path_var("COLLECTIONS_FOLDER", defaults.collections_folder),
            upload_tmp_folder: path_var(
                "COLLECTIONS_UPLOAD_TMP_FOLDER",
                defaults.upload_tmp_folder,
            ),
            temp_folder: path_var("COLLECTIONS_TEMP_FOLDER", defaults.temp_folder),
            local_import_root: std::env::var("COLLECTIONS_LOCAL_IMPORT_ROOT")
                .ok()
                .map(PathBuf::from),
            s3_region: std::env::var("COLLECTIONS_S3_REGION").unwrap_or(defaults.s3_region),
            s3_endpoint_url: std::env::var("COLLECTIONS_S3_ENDPOINT_URL").ok(),
            gdrive_folder: path_var("COLLECTIONS_GDRIVE_FOLDER", defaults.gdrive_folder),
        };

        info!("Database: {}", config.database_path.display());
        info!("Collections folder: {}", config.collections_folder.display());

        config
    }

    /// Configuration with every folder under a single root
    pub fn for_root(root: &Path) -> Self {
        Self {
            database_path: root.join("collections.db"),
            collections_folder: root.join("collections"),
            upload_tmp_folder: root.join("uploads-tmp"),
            temp_folder: root.join("temp"),
            local_import_root: None,
            s3_region: DEFAULT_S3_REGION.to_string(),
            s3_endpoint_url: None,
            gdrive_folder: root.join("gdrive"),
        }
    }

    /// Google OAuth client secrets file
    pub fn gdrive_credentials_path(&self) -> PathBuf {
        self.gdrive_folder.join("credentials.json")
    }

    /// Directory of stored per-user Google tokens
    pub fn gdrive_tokens_dir(&self) -> PathBuf {
        self.gdrive_folder.join("tokens")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("image-collections"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_root_places_everything_under_root() {
        let config = Config::for_root(Path::new("/srv/data"));
        assert_eq!(config.database_path, PathBuf::from("/srv/data/collections.db"));
        assert_eq!(
            config.gdrive_tokens_dir(),
            PathBuf::from("/srv/data/gdrive/tokens")
        );
        assert_eq!(config.s3_region, "us-east-1");
        assert!(config.local_import_root.is_none());
    }
}
