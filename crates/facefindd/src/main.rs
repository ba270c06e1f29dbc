use anyhow::{Context, Result};
use facefind_core::{FaceExtractor, GalleryStore, ModelGate};
use facefind_store::{FsObjectStorage, IngestionQueue, ObjectStorage, SqliteGalleryStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod camera;
mod config;
mod dbus_interface;
mod engine;
mod extractor;

use config::{BusKind, Config};
use dbus_interface::{FaceFindService, SERVICE_NAME, SERVICE_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facefindd starting");

    let config = Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        db = %config.db_path.display(),
        storage = %config.storage_root.display(),
        bus = ?config.bus,
        threshold = config.match_threshold,
        descriptor_len = config.descriptor_len,
        unresolved = ?config.unresolved_policy,
        "configuration loaded"
    );

    let store: Arc<dyn GalleryStore> = Arc::new(
        SqliteGalleryStore::open(&config.db_path, config.default_pricing())
            .await
            .with_context(|| format!("failed to open gallery at {}", config.db_path.display()))?,
    );
    let storage: Arc<dyn ObjectStorage> = Arc::new(FsObjectStorage::new(&config.storage_root));
    let ingest = Arc::new(
        IngestionQueue::new(store.clone(), storage).with_retention(config.upload_history),
    );

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let conn = builder.build().await.context("failed to connect to D-Bus")?;

    let extractor: Arc<dyn FaceExtractor> = Arc::new(
        extractor::DbusExtractor::connect(&conn, &config.extractor_service)
            .await
            .context("failed to create extractor proxy")?,
    );
    // Loads in the background; search stays gated until it settles.
    let model = ModelGate::spawn_load(extractor.clone());

    let camera = camera::KioskCamera::from_config(&config.camera_device, config.warmup_frames);
    let engine = engine::spawn_engine(camera, extractor, model, config.match_config(), store.clone())
        .context("failed to spawn engine thread")?;

    let service = FaceFindService::new(engine, store, ingest, config.default_pricing());
    conn.object_server()
        .at(SERVICE_PATH, service)
        .await
        .context("failed to register gallery interface")?;
    conn.request_name(SERVICE_NAME)
        .await
        .with_context(|| format!("failed to acquire bus name {SERVICE_NAME}"))?;

    tracing::info!(name = SERVICE_NAME, path = SERVICE_PATH, "facefindd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facefindd shutting down");

    Ok(())
}
