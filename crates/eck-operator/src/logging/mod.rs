use std::path::Path;

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
};

pub mod controller;
pub mod k8s_events;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitFileAppender {
        source: InitError,
        directory: std::path::PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Initializes `tracing` logging with the filter taken from the environment
/// variable `env`, for example `ECK_OPERATOR_LOG`.
///
/// Without the variable the maximum log level is INFO. If `log_directory` is
/// given, log output is additionally written there as JSON, rotated daily, into
/// files prefixed with `app_name`.
pub fn initialize_logging(
    env: &str,
    app_name: &str,
    log_directory: Option<&Path>,
) -> Result<(), Error> {
    let filter = EnvFilter::try_from_env(env)
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let file_layer = log_directory
        .map(|directory| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(app_name)
                .filename_suffix("tracing-rs.json")
                .max_log_files(6)
                .build(directory)
                .context(InitFileAppenderSnafu { directory })
                .map(|appender| {
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(appender)
                        .boxed()
                })
        })
        .transpose()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // need to delay logging until after tracing is initialized
    match log_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }
    Ok(())
}
