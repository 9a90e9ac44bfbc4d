//! Parsing of `[meta, rows]` response bodies.

use datapipe_core::RawRecord;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ClientError;

/// Paging metadata from the first element of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    /// Page this body answers.
    pub page: u32,
    /// Total number of pages for the query.
    pub pages: u32,
    /// Total number of rows across all pages.
    pub total: u64,
}

#[derive(Deserialize)]
struct ApiRow {
    country: NamedRef,
    countryiso3code: String,
    date: String,
    value: Option<f64>,
}

#[derive(Deserialize)]
struct NamedRef {
    value: String,
}

/// Numbers in the metadata object arrive either as JSON numbers or strings.
fn number(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn split(body: &Value) -> Result<(&Value, &Value), ClientError> {
    let parts = body
        .as_array()
        .ok_or_else(|| ClientError::Shape("body is not a JSON array".to_string()))?;

    match parts.as_slice() {
        [meta, rows] => Ok((meta, rows)),
        [only] if only.get("message").is_some() => Err(ClientError::Shape(format!(
            "API reported an error: {}",
            only["message"]
        ))),
        other => Err(ClientError::Shape(format!(
            "expected [meta, rows], got {} elements",
            other.len()
        ))),
    }
}

/// Parse the metadata element of a response body.
pub fn parse_meta(body: &Value) -> Result<PageMeta, ClientError> {
    let (meta, _) = split(body)?;
    if !meta.is_object() {
        return Err(ClientError::Shape("metadata is not an object".to_string()));
    }

    let pages = meta
        .get("pages")
        .and_then(number)
        .ok_or_else(|| ClientError::Shape("metadata has no page count".to_string()))?;

    let page = meta.get("page").and_then(number).unwrap_or(0);
    Ok(PageMeta {
        page: u32::try_from(page)
            .map_err(|_| ClientError::Shape(format!("page number {page} out of range")))?,
        pages: u32::try_from(pages)
            .map_err(|_| ClientError::Shape(format!("page count {pages} out of range")))?,
        total: meta.get("total").and_then(number).unwrap_or(0),
    })
}

/// Parse and normalize the data rows of a response body.
pub fn parse_rows(body: &Value) -> Result<Vec<RawRecord>, ClientError> {
    let (_, rows) = split(body)?;
    let rows = rows
        .as_array()
        .ok_or_else(|| ClientError::Shape("data rows are not an array".to_string()))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let row = ApiRow::deserialize(row)
                .map_err(|e| ClientError::Shape(format!("row {}: {}", i, e)))?;
            let year = row.date.trim().parse::<i32>().map_err(|_| {
                ClientError::Shape(format!("row {}: non-numeric year {:?}", i, row.date))
            })?;
            Ok(RawRecord::new(
                row.country.value,
                row.countryiso3code,
                year,
                row.value,
            ))
        })
        .collect()
}
