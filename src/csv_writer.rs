use anyhow::{Context, Result, anyhow};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Incremental CSV writer owning one output file for the lifetime of a
/// batch. The file is created on `init` with its header row; records are
/// appended as blocks are scanned and flushed on `close`.
pub struct CsvFileWriter {
    path: PathBuf,
    header: Vec<&'static str>,
    writer: Option<csv::Writer<File>>,
}

impl CsvFileWriter {
    pub fn new(path: PathBuf, header: Vec<&'static str>) -> Self {
        CsvFileWriter {
            path,
            header,
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn init(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }

        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("cannot open {}", self.path.display()))?;
        writer.write_record(&self.header)?;
        self.writer = Some(writer);
        debug!("Opened output file {}", self.path.display());
        Ok(())
    }

    pub fn write_records<I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("writer not initialized"))?;
        for row in rows {
            writer.write_record(&row)?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CsvHealth {
    pub row_count: u64,
    pub columns: usize,
    pub can_be_uploaded: bool,
}

/// Validate an output file before upload: it must parse, carry a non-empty
/// header, and hold at least one data row. Anything else is reported as
/// not uploadable rather than an error.
pub fn check_health(path: &Path) -> CsvHealth {
    let mut health = CsvHealth::default();

    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Cannot read {} for validation: {}", path.display(), e);
            return health;
        }
    };

    match reader.headers() {
        Ok(headers) => health.columns = headers.len(),
        Err(e) => {
            warn!("Cannot read header of {}: {}", path.display(), e);
            return health;
        }
    }

    for record in reader.records() {
        match record {
            Ok(_) => health.row_count += 1,
            Err(e) => {
                warn!("Corrupt record in {}: {}", path.display(), e);
                return health;
            }
        }
    }

    health.can_be_uploaded = health.row_count > 0 && health.columns > 0;
    health
}
