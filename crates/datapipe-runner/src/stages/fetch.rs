//! Fetch stage: page through the API and write one pivoted table per indicator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use datapipe_api_client::ApiClient;
use datapipe_core::policy::YEAR_RANGE;
use datapipe_core::{IndicatorSpec, IndicatorTable, RawRecord, StageKind, YearRange};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{RunContext, Stage};
use crate::error::{FetchError, StageError};

/// Pages of one indicator fetched at the same time unless configured.
pub const DEFAULT_PAGE_CONCURRENCY: usize = 4;

/// Produces the per-indicator CSV tables.
pub struct Fetcher {
    client: ApiClient,
    indicators: Vec<IndicatorSpec>,
    years: YearRange,
    max_concurrent_pages: usize,
}

impl Fetcher {
    pub fn new(client: ApiClient, indicators: Vec<IndicatorSpec>) -> Self {
        Self {
            client,
            indicators,
            years: YEAR_RANGE,
            max_concurrent_pages: DEFAULT_PAGE_CONCURRENCY,
        }
    }

    /// Builder method to bound concurrent page requests per indicator.
    pub fn with_max_concurrent_pages(mut self, limit: usize) -> Self {
        self.max_concurrent_pages = limit.max(1);
        self
    }

    pub fn indicators(&self) -> &[IndicatorSpec] {
        &self.indicators
    }

    /// Fetch, pivot, write, and verify the table for one indicator.
    pub async fn fetch_indicator(&self, spec: &IndicatorSpec) -> Result<PathBuf, FetchError> {
        let records = self.collect_records(&spec.code).await?;
        let fetched = records.len();
        let table = IndicatorTable::pivot(&spec.code, records, self.years);

        if table.overwritten_cells() > 0 {
            warn!(
                indicator = %spec.code,
                overwritten = table.overwritten_cells(),
                "Duplicate entity/year rows, keeping the last one seen"
            );
        }
        if table.is_empty() {
            return Err(FetchError::EmptyTable {
                code: spec.code.clone(),
                years: self.years,
            });
        }

        write_table(&table, &spec.output_path).await?;
        verify_table(&table, &spec.output_path).await?;

        info!(
            indicator = %spec.code,
            fetched_rows = fetched,
            entities = table.row_count(),
            path = %spec.output_path.display(),
            "Data successfully fetched from API"
        );
        Ok(spec.output_path.clone())
    }

    /// Every row of every page, in page order then row order.
    ///
    /// Pages are fetched concurrently; each task hands back its own rows and
    /// the merge happens only after all tasks finish, so the order (and with
    /// it the duplicate-cell outcome) does not depend on response timing.
    async fn collect_records(&self, code: &str) -> Result<Vec<RawRecord>, FetchError> {
        let api_err = |source| FetchError::Api {
            code: code.to_string(),
            source,
        };

        let meta = self.client.page_count(code).await.map_err(api_err)?;
        debug!(indicator = %code, pages = meta.pages, "Fetching pages");

        let permits = Arc::new(Semaphore::new(self.max_concurrent_pages));
        let mut tasks = JoinSet::new();
        for page in 1..=meta.pages {
            let client = self.client.clone();
            let code = code.to_string();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (page, client.fetch_page(&code, page).await)
            });
        }

        let mut pages = Vec::with_capacity(meta.pages as usize);
        while let Some(joined) = tasks.join_next().await {
            let (page, rows) = joined.map_err(|e| FetchError::PageTask {
                code: code.to_string(),
                reason: e.to_string(),
            })?;
            pages.push((page, rows.map_err(api_err)?));
        }

        pages.sort_by_key(|(page, _)| *page);
        Ok(pages.into_iter().flat_map(|(_, rows)| rows).collect())
    }
}

fn encode_table(table: &IndicatorTable) -> Result<Vec<u8>, csv::Error> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(table.header())?;
    for record in table.records() {
        wtr.write_record(&record)?;
    }
    wtr.into_inner().map_err(|e| e.into_error().into())
}

async fn write_table(table: &IndicatorTable, path: &Path) -> Result<(), FetchError> {
    let io_err = |source| FetchError::Io {
        code: table.code().to_string(),
        path: path.to_path_buf(),
        source,
    };

    let bytes = encode_table(table).map_err(|source| FetchError::Csv {
        code: table.code().to_string(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, bytes).await.map_err(io_err)
}

/// Read the file back: the header must match the table and there must be data.
async fn verify_table(table: &IndicatorTable, path: &Path) -> Result<(), FetchError> {
    let code = table.code().to_string();
    let bytes = tokio::fs::read(path).await.map_err(|source| FetchError::Io {
        code: code.clone(),
        path: path.to_path_buf(),
        source,
    })?;
    let csv_err = |source| FetchError::Csv {
        code: code.clone(),
        source,
    };

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let header: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();
    if header != table.header() {
        return Err(FetchError::Verify {
            code: code.clone(),
            path: path.to_path_buf(),
            reason: format!("unexpected columns {:?}", header),
        });
    }

    let mut rows = 0;
    for record in reader.records() {
        record.map_err(csv_err)?;
        rows += 1;
    }
    if rows == 0 {
        return Err(FetchError::Verify {
            code,
            path: path.to_path_buf(),
            reason: "no data rows".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Stage for Fetcher {
    type Input = ();
    type Output = Vec<PathBuf>;

    fn kind(&self) -> StageKind {
        StageKind::Fetch
    }

    async fn run(&self, _ctx: &RunContext, _input: &()) -> Result<Vec<PathBuf>, StageError> {
        let mut written = Vec::with_capacity(self.indicators.len());
        for spec in &self.indicators {
            written.push(self.fetch_indicator(spec).await?);
        }
        Ok(written)
    }
}
