use chrono::{DateTime, Local};
use env_logger::{Builder, Env, Target};
use log::{warn, Level};
use std::io::{self, Write};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};

use crate::config::LoggingConfig;

pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// `2024-01-01 12:00:00,123 [INFO] message`
pub fn format_line(time: &DateTime<Local>, level: Level, message: &str) -> String {
    format!("{} [{}] {}", time.format(LOG_TIME_FORMAT), level, message)
}

/// Daily-rotated log file keeping the configured number of old files.
pub fn file_appender(config: &LoggingConfig) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(config.keep_files.max(1))
        .build(&config.directory)
}

/// Copies every formatted record to the console and, when available, the log file.
pub struct TeeWriter<W: Write> {
    console: io::Stdout,
    file: Option<W>,
}

impl<W: Write> TeeWriter<W> {
    pub fn new(file: Option<W>) -> Self {
        Self {
            console: io::stdout(),
            file,
        }
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // console errors are ignored
        let _ = self.console.write_all(buf);
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Installs the global logger. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), log::SetLoggerError> {
    let (file, file_error) = match file_appender(config) {
        Ok(appender) => (Some(appender), None),
        Err(e) => (None, Some(e)),
    };

    Builder::from_env(Env::default().default_filter_or(config.level.as_str()))
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                format_line(&Local::now(), record.level(), &record.args().to_string())
            )
        })
        .target(Target::Pipe(Box::new(TeeWriter::new(file))))
        .try_init()?;

    if let Some(e) = file_error {
        warn!(
            "Log file in '{}' unavailable, logging to console only: {}",
            config.directory, e
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_line_format() {
        let time = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(
            format_line(&time, Level::Warn, "485 Read Error"),
            "2024-03-05 07:08:09,042 [WARN] 485 Read Error"
        );
    }

    #[test]
    fn test_tee_writes_to_rolling_file() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            directory: dir.path().display().to_string(),
            file_prefix: "spm1_test".to_string(),
            ..LoggingConfig::default()
        };

        let mut tee = TeeWriter::new(Some(file_appender(&config).unwrap()));
        tee.write_all(b"first line\n").unwrap();
        tee.flush().unwrap();
        drop(tee);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("spm1_test"));
        assert!(name.ends_with(".log"));
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "first line\n");
    }

    #[test]
    fn test_tee_without_file_still_accepts_writes() {
        let mut tee: TeeWriter<Vec<u8>> = TeeWriter::new(None);
        assert_eq!(tee.write(b"console only\n").unwrap(), 13);
        tee.flush().unwrap();
    }
}
