use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

use crate::settings::SandtoolSettings;

/// Log path: `SANDSTONE_LOG` > `~/.sandstone/sandtool.log` > stderr fallback.
pub fn init_tracing(verbose: bool) {
    let log_path = std::env::var_os("SANDSTONE_LOG")
        .map(PathBuf::from)
        .or_else(|| {
            SandtoolSettings::settings_dir()
                .ok()
                .map(|d| d.join("sandtool.log"))
        });

    let log_file = log_path.as_deref().and_then(|path| {
        path.parent()
            .and_then(|parent| std::fs::create_dir_all(parent).ok())
            .and_then(|_| OpenOptions::new().create(true).append(true).open(path).ok())
    });

    let stderr_level = if verbose { Level::DEBUG } else { Level::INFO };
    let layer: Box<dyn Layer<_> + Send + Sync> = match log_file {
        Some(file) => tracing_subscriber::fmt::layer()
            .with_writer(file)
            .pretty()
            .with_ansi(false)
            .with_filter(LevelFilter::from_level(Level::DEBUG))
            .boxed(),
        None => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .pretty()
            .with_ansi(false)
            .with_filter(LevelFilter::from_level(stderr_level))
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).init()
}
