use std::sync::LazyLock;

use regex::Regex;
use remote::models::{DifficultyFilter, OptionCounts};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid pattern"));

/// Collapses runs of whitespace and trims, so "  casa   grande " searches for "casa grande".
pub fn normalize_search(input: &str) -> String {
    WHITESPACE.replace_all(input.trim(), " ").into_owned()
}

/// Standard rounding to two decimals, `42.857` becomes `42.86`.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole` as a percentage rounded to two decimals, zero when `whole` is zero.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

/// Completion shown above the history listing.
///
/// The denominator depends on the view:
/// - unvoted listing: `unvoted / total`
/// - voted listing, no filter: `voted / total`
/// - voted listing filtered by a classification: `count of that classification / voted`
pub fn completion_percentage(
    counts: &OptionCounts,
    show_unvoted: bool,
    filter: DifficultyFilter,
) -> f64 {
    if show_unvoted {
        return percentage(counts.unvoted, counts.total);
    }

    match filter.classification() {
        None => percentage(counts.voted, counts.total),
        Some(classification) => percentage(counts.count_for(classification), counts.voted),
    }
}

/// Number of pages for `total` rows, never below one.
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    if total == 0 || page_size == 0 {
        return 1;
    }
    let pages = total.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// `page` pulled back into `1..=total_pages(total, page_size)`.
pub fn clamp_page(page: u32, total: u64, page_size: u32) -> u32 {
    page.clamp(1, total_pages(total, page_size))
}
