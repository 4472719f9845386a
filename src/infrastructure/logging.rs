use crate::infrastructure::error::InfraError;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "bridge.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    /// JSON-lines file output goes here when set.
    pub log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, log_dir: Option<PathBuf>) -> Self {
        Self {
            level: level.into(),
            log_dir,
        }
    }
}

/// Append-only writer shared by every event of the file layer.
#[derive(Clone)]
pub struct JsonLinesWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl JsonLinesWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }
}

impl Write for JsonLinesWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        let written = guard.write(buf)?;
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?
            .flush()
    }
}

impl<'a> MakeWriter<'a> for JsonLinesWriter {
    type Writer = JsonLinesWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs the global subscriber. Returns the log file path when file output is enabled.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<PathBuf>, InfraError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_writer(io::stderr)
        .with_filter(env_filter(&config.level));

    let (file_layer, log_path) = match &config.log_dir {
        Some(dir) => {
            let path = dir.join(LOG_FILE_NAME);
            let writer = JsonLinesWriter::open(&path)?;
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(writer)
                .with_filter(env_filter(&config.level));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("logging already initialized: {error}")))?;

    tracing::info!(
        level = %config.level,
        log_path = ?log_path.as_ref().map(|path| path.display().to_string()),
        "logging initialized"
    );
    Ok(log_path)
}
