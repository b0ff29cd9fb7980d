use chrono::NaiveDate;

use filing_spine_core::{AppError, AppResult};

/// **CIK Utilities**
///
/// SEC Central Index Keys are numeric, up to 10 digits; endpoints and the
/// filesystem layout use the zero-padded form.

/// Pad a CIK to 10 digits with leading zeros
pub fn pad_cik(cik: &str) -> String {
    format!("{:0>10}", cik)
}

/// Remove leading zeros from a CIK
pub fn unpad_cik(cik: &str) -> String {
    let trimmed = cik.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Validate CIK format
pub fn is_valid_cik(cik: &str) -> bool {
    !cik.is_empty() && cik.len() <= 10 && cik.chars().all(|c| c.is_ascii_digit())
}

/// **Accession Number Utilities**
///
/// Accessions arrive as `NNNNNNNNNN-NN-NNNNNN` or dashless; the dashless
/// form is canonical everywhere in the store and on disk.

/// Normalize an accession number to the canonical dashless form
pub fn normalize_accession(accession: &str) -> AppResult<String> {
    let dashless: String = accession.chars().filter(|c| *c != '-').collect();
    if dashless.len() != 18 || !dashless.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(format!(
            "invalid accession number: {}",
            accession
        )));
    }
    Ok(dashless)
}

/// Format a dashless accession back to the dashed display form
pub fn dashed_accession(dashless: &str) -> AppResult<String> {
    if dashless.len() != 18 || !dashless.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(format!(
            "invalid dashless accession: {}",
            dashless
        )));
    }
    Ok(format!(
        "{}-{}-{}",
        &dashless[..10],
        &dashless[10..12],
        &dashless[12..]
    ))
}

/// Feed-independent natural key for a filing record
pub fn filing_natural_key(accession: &str) -> AppResult<String> {
    Ok(format!("sec:filing:{}", normalize_accession(accession)?))
}

/// **Date Utilities**

/// Parse a date string in the formats SEC sources emit
pub fn parse_sec_date(date_str: &str) -> AppResult<NaiveDate> {
    let formats = ["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y"];

    for format in &formats {
        if let Ok(date) = NaiveDate::parse_from_str(date_str, format) {
            return Ok(date);
        }
    }

    Err(AppError::InvalidDateFormat(format!(
        "unable to parse date: {}",
        date_str
    )))
}

/// **URL Construction Utilities**

pub const EDGAR_ARCHIVES_URL: &str = "https://www.sec.gov/Archives";
pub const EDGAR_DATA_URL: &str = "https://data.sec.gov";
pub const EDGAR_CURRENT_FEED_URL: &str =
    "https://www.sec.gov/cgi-bin/browse-edgar?action=getcurrent&type=&company=&dateb=&owner=include&count=100&output=atom";
pub const EDGAR_FULL_INDEX_URL: &str = "https://www.sec.gov/Archives/edgar/full-index";
pub const EDGAR_DAILY_INDEX_URL: &str = "https://www.sec.gov/Archives/edgar/daily-index";
pub const COMPANY_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers_exchange.json";

/// Company submissions endpoint, keyed by padded CIK
pub fn build_submissions_url(cik: &str) -> String {
    format!("{}/submissions/CIK{}.json", EDGAR_DATA_URL, pad_cik(cik))
}

/// Directory index JSON for one filing
pub fn build_filing_index_url(cik: &str, accession: &str) -> AppResult<String> {
    Ok(format!(
        "{}/edgar/data/{}/{}/index.json",
        EDGAR_ARCHIVES_URL,
        unpad_cik(cik),
        normalize_accession(accession)?
    ))
}

/// URL of one document inside a filing
pub fn build_document_url(cik: &str, accession: &str, filename: &str) -> AppResult<String> {
    Ok(format!(
        "{}/edgar/data/{}/{}/{}",
        EDGAR_ARCHIVES_URL,
        unpad_cik(cik),
        normalize_accession(accession)?,
        filename
    ))
}

/// Daily master index for a business day
pub fn build_daily_index_url(date: NaiveDate) -> String {
    let quarter = (date.format("%m").to_string().parse::<u32>().unwrap_or(1) + 2) / 3;
    format!(
        "{}/{}/QTR{}/master.{}.idx",
        EDGAR_DAILY_INDEX_URL,
        date.format("%Y"),
        quarter,
        date.format("%Y%m%d")
    )
}

/// Quarterly master index
pub fn build_full_index_url(year: i32, quarter: u32) -> String {
    format!("{}/{}/QTR{}/master.idx", EDGAR_FULL_INDEX_URL, year, quarter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_and_unpad_cik() {
        assert_eq!(pad_cik("320193"), "0000320193");
        assert_eq!(pad_cik("0000320193"), "0000320193");
        assert_eq!(unpad_cik("0000320193"), "320193");
        assert_eq!(unpad_cik("0000000000"), "0");
    }

    #[test]
    fn test_is_valid_cik() {
        assert!(is_valid_cik("320193"));
        assert!(is_valid_cik("0000320193"));
        assert!(!is_valid_cik(""));
        assert!(!is_valid_cik("abc123"));
        assert!(!is_valid_cik("12345678901"));
    }

    #[test]
    fn test_accession_normalization_both_forms() {
        // REQUIREMENT: Both dashed and dashless accession forms are accepted;
        // the canonical stored form is dashless
        assert_eq!(
            normalize_accession("0000320193-24-000081").unwrap(),
            "000032019324000081"
        );
        assert_eq!(
            normalize_accession("000032019324000081").unwrap(),
            "000032019324000081"
        );
        assert!(normalize_accession("0000320193-24").is_err());
        assert!(normalize_accession("not-an-accession").is_err());

        assert_eq!(
            dashed_accession("000032019324000081").unwrap(),
            "0000320193-24-000081"
        );
    }

    #[test]
    fn test_filing_natural_key_is_feed_independent() {
        // Two feeds carrying the same filing under different formatting
        // produce identical keys
        let from_rss = filing_natural_key("0000320193-24-000081").unwrap();
        let from_index = filing_natural_key("000032019324000081").unwrap();
        assert_eq!(from_rss, from_index);
        assert_eq!(from_rss, "sec:filing:000032019324000081");
    }

    #[test]
    fn test_parse_sec_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 11, 1).unwrap();
        assert_eq!(parse_sec_date("2024-11-01").unwrap(), expected);
        assert_eq!(parse_sec_date("20241101").unwrap(), expected);
        assert_eq!(parse_sec_date("11/01/2024").unwrap(), expected);
        assert!(parse_sec_date("first of November").is_err());
    }

    #[test]
    fn test_url_builders() {
        assert_eq!(
            build_submissions_url("320193"),
            "https://data.sec.gov/submissions/CIK0000320193.json"
        );
        assert_eq!(
            build_filing_index_url("0000320193", "0000320193-24-000081").unwrap(),
            "https://www.sec.gov/Archives/edgar/data/320193/000032019324000081/index.json"
        );
        assert_eq!(
            build_daily_index_url(NaiveDate::from_ymd_opt(2024, 11, 1).unwrap()),
            "https://www.sec.gov/Archives/edgar/daily-index/2024/QTR4/master.20241101.idx"
        );
        assert_eq!(
            build_full_index_url(2024, 3),
            "https://www.sec.gov/Archives/edgar/full-index/2024/QTR3/master.idx"
        );
    }
}
