use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};

use crate::error::{RagError, Result};
use crate::models::Review;

const REQUIRED_COLUMNS: [&str; 4] = ["title", "date", "rating", "review"];

struct ColumnMap {
    title: usize,
    date: usize,
    rating: usize,
    review: usize,
    id: Option<usize>,
    extra: Vec<(usize, String)>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |name: &str| names.iter().position(|n| n == name);

        for column in REQUIRED_COLUMNS {
            if find(column).is_none() {
                return Err(RagError::DataLoad(format!("missing required column '{}'", column)));
            }
        }

        let known: HashSet<&str> = REQUIRED_COLUMNS.iter().copied().chain(["id"]).collect();
        let extra = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !known.contains(names[*i].as_str()))
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect();

        // Presence of every required column was checked above.
        Ok(Self {
            title: find("title").unwrap_or_default(),
            date: find("date").unwrap_or_default(),
            rating: find("rating").unwrap_or_default(),
            review: find("review").unwrap_or_default(),
            id: find("id"),
            extra,
        })
    }
}

/// Load reviews from a CSV file with `title`, `date`, `rating` and `review`
/// columns. An optional `id` column is used as the review id, otherwise the
/// 0-based row number is. Unknown columns are kept as metadata.
pub fn load_reviews(path: &Path) -> Result<Vec<Review>> {
    if !path.is_file() {
        return Err(RagError::DataLoad(format!("dataset not found: {}", path.display())));
    }

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| RagError::DataLoad(format!("{}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| RagError::DataLoad(format!("{}: {}", path.display(), e)))?
        .clone();
    let columns = ColumnMap::from_headers(&headers)?;

    let mut reviews = Vec::new();
    let mut seen_ids = HashSet::new();

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| RagError::DataLoad(format!("row {}: {}", row, e)))?;
        let review = parse_row(row, &record, &columns)?;
        if !seen_ids.insert(review.id.clone()) {
            return Err(RagError::DataLoad(format!(
                "duplicate review id '{}' at row {}",
                review.id, row
            )));
        }
        reviews.push(review);
    }

    if reviews.is_empty() {
        return Err(RagError::DataLoad(format!("dataset has no rows: {}", path.display())));
    }

    tracing::info!("Loaded {} reviews from {}", reviews.len(), path.display());
    Ok(reviews)
}

fn parse_row(row: usize, record: &StringRecord, columns: &ColumnMap) -> Result<Review> {
    let cell = |idx: usize| record.get(idx).unwrap_or("");

    let text = cell(columns.review);
    if text.is_empty() {
        return Err(RagError::DataLoad(format!("row {}: empty 'review' value", row)));
    }

    let id = match columns.id {
        Some(idx) if !cell(idx).is_empty() => cell(idx).to_string(),
        Some(_) => return Err(RagError::DataLoad(format!("row {}: empty 'id' value", row))),
        None => row.to_string(),
    };

    let rating = match cell(columns.rating) {
        "" => None,
        raw => Some(raw.parse::<f32>().map_err(|_| {
            RagError::DataLoad(format!("row {}: invalid rating '{}'", row, raw))
        })?),
    };

    let date = match cell(columns.date) {
        "" => None,
        raw => Some(parse_date(raw).ok_or_else(|| {
            RagError::DataLoad(format!("row {}: invalid date '{}'", row, raw))
        })?),
    };

    let metadata: BTreeMap<String, String> = columns
        .extra
        .iter()
        .map(|(idx, name)| (name.clone(), cell(*idx).to_string()))
        .collect();

    Ok(Review {
        id,
        title: cell(columns.title).to_string(),
        text: text.to_string(),
        rating,
        date,
        metadata,
    })
}

fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
