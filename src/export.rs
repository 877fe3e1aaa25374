//! Export of price batches
//!
//! Writers for concrete file formats live outside this crate. This module
//! fixes what they receive: the file name, the flattened and sorted rows and
//! the formatting used when rows are rendered as text.

use crate::types::{PricePoint, Website};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static UNSAFE_FILE_CHARS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[:;,!@#$%^&*()]").ok());

/// Output file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Csv,
    /// Spreadsheet; cannot hold timezone-aware dates
    Xlsx,
}

impl ExportFormat {
    pub fn ext(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

/// Remove characters that are unsafe in file names
pub fn sanitize_file_part(part: &str) -> String {
    match UNSAFE_FILE_CHARS.as_ref() {
        Some(re) => re.replace_all(part, "").into_owned(),
        None => part
            .chars()
            .filter(|c| !":;,!@#$%^&*()".contains(*c))
            .collect(),
    }
}

/// `{output_path}/{website}_{function}_{date}.{ext}`
///
/// `function` names the batch (`current_coins`, `hist_marketchart`, ...) and
/// `date` is any textual date; both are sanitized.
pub fn export_path(
    output_path: &Path,
    website: Website,
    function: &str,
    date: &str,
    format: ExportFormat,
) -> PathBuf {
    let stem = sanitize_file_part(&format!("{}_{}_{}", website.name(), function, date));
    output_path.join(format!("{}.{}", stem, format.ext()))
}

/// Date column of an export row
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportDate {
    Aware(DateTime<Utc>),
    Naive(NaiveDateTime),
}

impl std::fmt::Display for ExportDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportDate::Aware(date) => write!(f, "{}", date.format("%Y-%m-%d %H:%M:%S%:z")),
            ExportDate::Naive(date) => write!(f, "{}", date.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Flattened price point, one column per field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub date: ExportDate,
    #[serde(rename = "coin.siteid")]
    pub coin_site_id: String,
    #[serde(rename = "coin.name")]
    pub coin_name: String,
    #[serde(rename = "coin.symbol")]
    pub coin_symbol: String,
    #[serde(rename = "coin.chain")]
    pub coin_chain: String,
    #[serde(rename = "coin.base")]
    pub coin_base: String,
    #[serde(rename = "curr")]
    pub currency: String,
    pub exchange: String,
    pub price: f64,
    pub volume: f64,
    pub active: bool,
    pub error: String,
}

impl ExportRow {
    /// Column names in row order
    pub const COLUMNS: [&'static str; 12] = [
        "date",
        "coin.siteid",
        "coin.name",
        "coin.symbol",
        "coin.chain",
        "coin.base",
        "curr",
        "exchange",
        "price",
        "volume",
        "active",
        "error",
    ];

    pub fn from_point(point: &PricePoint, format: ExportFormat) -> Self {
        let date = match format {
            ExportFormat::Csv => ExportDate::Aware(point.timestamp),
            ExportFormat::Xlsx => ExportDate::Naive(point.timestamp.naive_utc()),
        };
        Self {
            date,
            coin_site_id: point.coin.site_id.clone(),
            coin_name: point.coin.name.clone(),
            coin_symbol: point.coin.symbol.clone(),
            coin_chain: point.coin.chain.clone().unwrap_or_default(),
            coin_base: point.coin.base.clone().unwrap_or_default(),
            currency: point.currency.clone(),
            exchange: point.venue.clone().unwrap_or_default(),
            price: point.price,
            volume: point.volume,
            active: point.active,
            error: point.error.clone().unwrap_or_default(),
        }
    }

    /// Cells rendered with `format`, in [`COLUMNS`](Self::COLUMNS) order
    pub fn cells(&self, format: &TableFormat) -> Vec<String> {
        vec![
            self.date.to_string(),
            self.coin_site_id.clone(),
            self.coin_name.clone(),
            self.coin_symbol.clone(),
            self.coin_chain.clone(),
            self.coin_base.clone(),
            self.currency.clone(),
            self.exchange.clone(),
            format.format_number(self.price),
            format.format_number(self.volume),
            self.active.to_string(),
            self.error.clone(),
        ]
        .into_iter()
        .map(|cell| format.truncate(&cell))
        .collect()
    }
}

/// Rows for `prices`, sorted case-insensitively by coin name then currency
pub fn export_rows(prices: &[PricePoint], format: ExportFormat) -> Vec<ExportRow> {
    let mut rows: Vec<ExportRow> = prices
        .iter()
        .map(|p| ExportRow::from_point(p, format))
        .collect();
    rows.sort_by_cached_key(|row| (row.coin_name.to_lowercase(), row.currency.to_lowercase()));
    rows
}

/// Text formatting of exported or printed rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFormat {
    /// Longer cells are cut and end in `...`
    pub max_colwidth: usize,
    /// Digits after the point in scientific notation
    pub precision: usize,
}

impl Default for TableFormat {
    fn default() -> Self {
        Self {
            max_colwidth: 25,
            precision: 6,
        }
    }
}

impl TableFormat {
    /// Scientific notation with a signed two-digit exponent, e.g. `1.234500e+04`
    pub fn format_number(&self, value: f64) -> String {
        if value.is_nan() {
            return "NaN".to_string();
        }
        if value.is_infinite() {
            return if value > 0.0 { "inf" } else { "-inf" }.to_string();
        }
        let formatted = format!("{:.*e}", self.precision, value);
        match formatted.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => formatted,
        }
    }

    pub fn truncate(&self, cell: &str) -> String {
        if cell.chars().count() <= self.max_colwidth {
            return cell.to_string();
        }
        let keep = self.max_colwidth.saturating_sub(3);
        let mut out: String = cell.chars().take(keep).collect();
        out.push_str("...");
        out
    }

    /// Render rows as a left-aligned text table with a header line
    pub fn render(&self, rows: &[ExportRow]) -> String {
        let header: Vec<String> = ExportRow::COLUMNS.iter().map(|c| c.to_string()).collect();
        let body: Vec<Vec<String>> = rows.iter().map(|r| r.cells(self)).collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for cells in &body {
            for (width, cell) in widths.iter_mut().zip(cells) {
                *width = (*width).max(cell.chars().count());
            }
        }

        std::iter::once(&header)
            .chain(body.iter())
            .map(|cells| {
                cells
                    .iter()
                    .zip(&widths)
                    .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                    .collect::<Vec<_>>()
                    .join("  ")
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Destination of exported price batches
#[async_trait]
pub trait PriceSink: Send + Sync {
    /// Write `rows` to `path`, creating parent directories as needed
    async fn write_rows(
        &self,
        path: &Path,
        format: ExportFormat,
        rows: &[ExportRow],
    ) -> std::io::Result<()>;
}

/// Sort, flatten and hand `prices` to `sink`
///
/// Returns the written path, or `None` when there was nothing to write.
pub async fn export_prices(
    sink: &dyn PriceSink,
    prices: &[PricePoint],
    output_path: &Path,
    website: Website,
    function: &str,
    date: &str,
    format: ExportFormat,
) -> std::io::Result<Option<PathBuf>> {
    if prices.is_empty() {
        tracing::info!(website = %website, function, "Empty price batch, nothing to export");
        return Ok(None);
    }

    let path = export_path(output_path, website, function, date, format);
    let rows = export_rows(prices, format);
    sink.write_rows(&path, format, &rows).await?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Price batch exported");
    Ok(Some(path))
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Sink keeping every written batch in memory
    #[derive(Debug, Default)]
    pub struct MemorySink {
        pub written: Mutex<Vec<(PathBuf, ExportFormat, Vec<ExportRow>)>>,
    }

    #[async_trait]
    impl PriceSink for MemorySink {
        async fn write_rows(
            &self,
            path: &Path,
            format: ExportFormat,
            rows: &[ExportRow],
        ) -> std::io::Result<()> {
            self.written
                .lock()
                .unwrap()
                .push((path.to_path_buf(), format, rows.to_vec()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MemorySink;
    use super::*;
    use crate::types::CoinRef;
    use chrono::TimeZone;

    fn point(name: &str, currency: &str) -> PricePoint {
        PricePoint::resolved(
            Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).unwrap(),
            CoinRef::new(name.to_lowercase()).with_name(name),
            currency,
            12345.0,
            0.5,
        )
    }

    #[test]
    fn path_is_built_and_sanitized() {
        let path = export_path(
            Path::new("out"),
            Website::CoinGecko,
            "hist_marketchart",
            "2022-05-01 12:00:00",
            ExportFormat::Xlsx,
        );
        assert_eq!(
            path,
            Path::new("out").join("coingecko_hist_marketchart_2022-05-01 120000.xlsx")
        );
        assert_eq!(sanitize_file_part("a(b)c;d,e!f@g#h$i%j^k&l*m"), "abcdefghijklm");
    }

    #[test]
    fn rows_sorted_by_name_then_currency() {
        let prices = vec![
            point("ethereum", "usd"),
            point("Bitcoin", "usd"),
            point("bitcoin", "EUR"),
        ];
        let rows = export_rows(&prices, ExportFormat::Csv);
        let keys: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.coin_name.as_str(), r.currency.as_str()))
            .collect();
        assert_eq!(keys, vec![("bitcoin", "EUR"), ("Bitcoin", "usd"), ("ethereum", "usd")]);
    }

    #[test]
    fn timezone_stripped_for_spreadsheet_only() {
        let prices = [point("bitcoin", "usd")];
        let csv = &export_rows(&prices, ExportFormat::Csv)[0];
        let xlsx = &export_rows(&prices, ExportFormat::Xlsx)[0];
        assert_eq!(csv.date.to_string(), "2022-05-01 12:00:00+00:00");
        assert_eq!(xlsx.date.to_string(), "2022-05-01 12:00:00");
    }

    #[test]
    fn numbers_and_cells_follow_table_format() {
        let format = TableFormat::default();
        assert_eq!(format.format_number(12345.0), "1.234500e+04");
        assert_eq!(format.format_number(0.00012), "1.200000e-04");
        assert_eq!(format.format_number(f64::NAN), "NaN");

        let long = "a".repeat(30);
        let cut = format.truncate(&long);
        assert_eq!(cut.len(), 25);
        assert!(cut.ends_with("..."));
        assert_eq!(format.truncate("short"), "short");
    }

    #[test]
    fn render_has_header_and_one_line_per_row() {
        let rows = export_rows(
            &[point("bitcoin", "usd"), point("ethereum", "eur")],
            ExportFormat::Csv,
        );
        let table = TableFormat::default().render(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("date"));
        assert!(lines[1].contains("bitcoin"));
        assert!(lines[1].contains("1.234500e+04"));
    }

    #[tokio::test]
    async fn export_skips_empty_batches() {
        let sink = MemorySink::default();
        let written = export_prices(
            &sink,
            &[],
            Path::new("out"),
            Website::Alcor,
            "current_coins",
            "2022-05-01",
            ExportFormat::Csv,
        )
        .await
        .unwrap();
        assert!(written.is_none());
        assert!(sink.written.lock().unwrap().is_empty());

        let written = export_prices(
            &sink,
            &[point("bitcoin", "usd")],
            Path::new("out"),
            Website::Alcor,
            "current_coins",
            "2022-05-01",
            ExportFormat::Csv,
        )
        .await
        .unwrap();
        assert_eq!(written, Some(Path::new("out").join("alcor_current_coins_2022-05-01.csv")));
        assert_eq!(sink.written.lock().unwrap()[0].2.len(), 1);
    }
}
