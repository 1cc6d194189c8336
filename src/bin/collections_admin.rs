use image_collections::access::Caller;
use image_collections::config::Config;
use image_collections::connectors::DefaultConnectorFactory;
use image_collections::db::{DbCollection, ImportMethod};
use image_collections::import::PassthroughPipeline;
use image_collections::library::{CollectionDraft, CollectionError, CollectionManager};
use image_collections::storage::CollectionStorage;
use std::env;
use std::sync::Arc;
use tracing::{error, info};

const ADMIN_USER: &str = "admin";

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let config = Config::load();
    let manager = match CollectionManager::open(
        &config,
        Arc::new(DefaultConnectorFactory::new(config.clone())),
        Arc::new(PassthroughPipeline::new(CollectionStorage::new(&config))),
        tokio::runtime::Handle::current(),
    )
    .await
    {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to open collections store: {}", e);
            std::process::exit(1);
        }
    };

    let caller = Caller::admin(ADMIN_USER);
    let result = match (args[1].as_str(), &args[2..]) {
        ("list", []) => list(&manager, &caller).await,
        ("show", [id]) => show(&manager, &caller, id).await,
        ("delete", [id]) => delete(&manager, &caller, id).await,
        ("import-local", [name, path]) => import_local(&manager, &caller, name, path).await,
        _ => {
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(if e.is_client_error() { 1 } else { 2 });
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} list", program);
    eprintln!("  {} show <collection-id>", program);
    eprintln!("  {} delete <collection-id>", program);
    eprintln!("  {} import-local <name> <folder>", program);
    eprintln!();
    eprintln!("Storage locations come from COLLECTIONS_* environment variables.");
}

fn summary_line(collection: &DbCollection) -> String {
    format!(
        "{}  {:<30} {:<15} {:?} images={} errors={}{}{}",
        collection.id,
        collection.name,
        collection.import_method.as_str(),
        collection.state(),
        collection.counters.number_of_images,
        collection.counters.number_of_import_errors,
        if collection.locked { " locked" } else { "" },
        if collection.publicly_shared { " public" } else { "" },
    )
}

async fn list(manager: &CollectionManager, caller: &Caller) -> Result<(), CollectionError> {
    let collections = manager.list_collections(caller).await?;
    for collection in &collections {
        println!("{}", summary_line(collection));
    }
    info!("{} collections", collections.len());
    Ok(())
}

async fn show(manager: &CollectionManager, caller: &Caller, id: &str) -> Result<(), CollectionError> {
    let collection = manager.get_collection(caller, id).await?;
    let rendered = serde_json::to_string_pretty(&collection)
        .map_err(|e| CollectionError::Validation(e.to_string()))?;
    println!("{}", rendered);

    for image in manager.list_images(caller, id).await? {
        let status = match (image.importing, image.import_error) {
            (true, _) => "importing",
            (false, true) => "error",
            (false, false) => "ok",
        };
        println!("  {:<10} {:>12}  {}", status, image.size_bytes, image.file_name);
    }
    Ok(())
}

async fn delete(manager: &CollectionManager, caller: &Caller, id: &str) -> Result<(), CollectionError> {
    let report = manager.delete_collection(caller, id).await?;
    for folder in &report.failed {
        println!("Could not remove {}", folder.display());
    }
    println!("Deleted {}", id);
    Ok(())
}

async fn import_local(
    manager: &CollectionManager,
    caller: &Caller,
    name: &str,
    path: &str,
) -> Result<(), CollectionError> {
    let draft = CollectionDraft {
        import_method: Some(ImportMethod::BackendImport),
        source_backend_import: Some(path.to_string()),
        ..CollectionDraft::named(name)
    };
    let collection = manager.create_collection(caller, draft).await?;
    info!("Created collection {}, importing from {}", collection.id, path);

    if let Some(result) = manager.imports().wait(&collection.id).await {
        let summary = result?;
        println!(
            "{}: {} imported, {} failed",
            collection.id, summary.imported, summary.failed
        );
    }
    Ok(())
}
