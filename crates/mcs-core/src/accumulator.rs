//! Measurement sinks fed by the sampling engines.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{ErrorInfo, McError};

/// Receives one observable value per completed measurement window.
pub trait Accumulator<T> {
    /// Records a single measurement.
    fn accumulate(&mut self, value: T) -> Result<(), McError>;
}

impl<T> Accumulator<T> for Vec<T> {
    fn accumulate(&mut self, value: T) -> Result<(), McError> {
        self.push(value);
        Ok(())
    }
}

/// Default number of values buffered by a [`FileAccumulator`] before flushing.
pub const DEFAULT_CACHE_SIZE: usize = 20;

/// File-backed accumulator with a bounded write-back cache.
///
/// Values are stored one JSON document per line. The file is truncated when
/// the accumulator is created, appended to whenever the cache fills up and
/// once more when the accumulator is dropped.
#[derive(Debug)]
pub struct FileAccumulator<T: Serialize> {
    path: PathBuf,
    cache: Vec<T>,
    cache_size: usize,
}

impl<T: Serialize> FileAccumulator<T> {
    /// Creates (or truncates) the backing file with the default cache size.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, McError> {
        Self::with_cache_size(path, DEFAULT_CACHE_SIZE)
    }

    /// Creates (or truncates) the backing file with an explicit cache size.
    pub fn with_cache_size(path: impl AsRef<Path>, cache_size: usize) -> Result<Self, McError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| McError::io("accumulator-mkdir", err, parent))?;
        }
        File::create(&path).map_err(|err| McError::io("accumulator-create", err, &path))?;
        Ok(Self {
            path,
            cache: Vec::with_capacity(cache_size.max(1)),
            cache_size: cache_size.max(1),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of values currently held in memory.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Appends all cached values to the backing file.
    pub fn flush(&mut self) -> Result<(), McError> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|err| McError::io("accumulator-open", err, &self.path))?;
        for value in &self.cache {
            let line = serde_json::to_string(value).map_err(|err| {
                McError::Serde(
                    ErrorInfo::new("accumulator-serialize", err.to_string())
                        .with_context("path", self.path.display().to_string()),
                )
            })?;
            writeln!(file, "{line}")
                .map_err(|err| McError::io("accumulator-write", err, &self.path))?;
        }
        self.cache.clear();
        Ok(())
    }
}

impl<T: Serialize + DeserializeOwned + Clone> FileAccumulator<T> {
    /// Returns every value recorded so far: the file contents followed by the cache.
    pub fn data(&self) -> Result<Vec<T>, McError> {
        let file =
            File::open(&self.path).map_err(|err| McError::io("accumulator-open", err, &self.path))?;
        let mut values = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| McError::io("accumulator-read", err, &self.path))?;
            if line.trim().is_empty() {
                continue;
            }
            let value = serde_json::from_str(&line).map_err(|err| {
                McError::Serde(
                    ErrorInfo::new("accumulator-parse", err.to_string())
                        .with_context("path", self.path.display().to_string())
                        .with_context("line", (index + 1).to_string()),
                )
            })?;
            values.push(value);
        }
        values.extend(self.cache.iter().cloned());
        Ok(values)
    }
}

impl<T: Serialize> Accumulator<T> for FileAccumulator<T> {
    fn accumulate(&mut self, value: T) -> Result<(), McError> {
        self.cache.push(value);
        if self.cache.len() >= self.cache_size {
            self.flush()?;
        }
        Ok(())
    }
}

impl<T: Serialize> Drop for FileAccumulator<T> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::warn!("dropping {} unflushed measurements: {err}", self.cache.len());
        }
    }
}
