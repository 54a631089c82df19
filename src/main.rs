//! Mirror daemon entry point: exposes a local directory through the best
//! available mount provider until interrupted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fuse_vfs_adapter::config::Config;
use fuse_vfs_adapter::mirror::MirrorFs;
use fuse_vfs_adapter::mount::{select_provider, MountCapability};

/// Print usage information
fn print_usage() {
    eprintln!("Usage: fuse-vfs-adapter <config.yaml>");
    eprintln!();
    eprintln!("fuse-vfs-adapter - mirrors a local directory through a FUSE mount");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("fuse-vfs-adapter starting");
    info!("Loaded configuration from {:?}", config_path);

    // Capabilities the configuration actually needs
    let mut required = vec![MountCapability::MountFlags];
    if config.mount.read_only {
        required.push(MountCapability::ReadOnly);
    }
    if config.mount.port.is_some() {
        required.push(MountCapability::Port);
    }

    let provider = select_provider(&required)?;
    info!("Using mount provider: {}", provider.display_name());

    let mirror = Arc::new(MirrorFs::new(config.source.clone())?);

    // Create mount point directory if it doesn't exist
    if !config.mount.mount_point.exists() {
        std::fs::create_dir_all(&config.mount.mount_point)?;
    }

    let mut builder = provider.for_file_system(mirror);
    builder.set_mount_point(&config.mount.mount_point)?;
    let flags = match &config.mount.mount_flags {
        Some(flags) => flags.clone(),
        None => provider.default_mount_flags(&config.mount.volume_name),
    };
    builder.set_mount_flags(&flags)?;
    if config.mount.read_only {
        builder.set_read_only(true)?;
    }
    if let Some(port) = config.mount.port {
        builder.set_port(port)?;
    }

    let volume = builder.mount()?;
    info!("Mounted successfully to: {:?}", volume.mount_point());

    // Wait for shutdown signal
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    info!("Press Ctrl+C to unmount and exit");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    info!("Shutting down");
    match volume.release() {
        Ok(()) => info!("Unmounted, exiting"),
        Err(e) => error!("Failed to release mount: {e}"),
    }

    Ok(())
}
