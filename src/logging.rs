//! Logger setup for the binaries, and scoped silencing.
use crate::error::{ReportError, Result};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} - {m}{n}";

/// Initialise `log4rs` from a YAML/JSON config file, or log to stderr at
/// `level` if none is given.
///
/// # Errors
/// If the file cannot be read or a logger is already installed
pub fn init(config_file: Option<&Path>, level: LevelFilter) -> Result<()> {
    if let Some(path) = config_file {
        return log4rs::init_file(path, Default::default()).map_err(|e| {
            ReportError::InvalidConfig(format!("log config {}: {}", path.display(), e))
        });
    }
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| ReportError::InvalidConfig(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| ReportError::InvalidConfig(e.to_string()))?;
    Ok(())
}

/// Lowers the global log level, and optionally gags stderr, until dropped.
pub struct Silence {
    previous: LevelFilter,
    _stderr: Option<shh::ShhStderr>,
}

impl Silence {
    pub fn new(level: LevelFilter) -> Self {
        let previous = log::max_level();
        log::set_max_level(level.min(previous));
        Self {
            previous,
            _stderr: None,
        }
    }

    /// Also swallow anything written straight to stderr
    ///
    /// # Errors
    /// If stderr cannot be redirected
    pub fn with_stderr(mut self) -> Result<Self> {
        self._stderr = Some(shh::stderr()?);
        Ok(self)
    }
}

impl Drop for Silence {
    fn drop(&mut self) {
        log::set_max_level(self.previous);
    }
}
