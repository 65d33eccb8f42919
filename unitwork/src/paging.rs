//! Paged fetches: the page of rows and the total count run as two independent
//! fan-out branches, each on its own session, so neither serializes the other.

use crate::manager::Manager;
use std::collections::HashMap;
use unitwork_core::{DbResult, Row, Statement};

const ITEMS_KEY: &str = "items";
const COUNT_KEY: &str = "count";

/// One page of results plus the total row count across all pages.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Row>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

impl Page {
    /// Total number of pages, with `total` and `per_page` clamped to at
    /// least one.
    pub fn total_pages(&self) -> i64 {
        let total = self.total.max(1);
        let per_page = self.per_page.max(1);
        (total / per_page) + 1
    }
}

/// Fetch one page of `items` together with the `count` total, concurrently.
///
/// `items` is the unpaged row query; LIMIT/OFFSET are appended from `page`
/// (1-based) and `per_page`, both clamped non-negative. `count` must yield a
/// single integer scalar. Fails as a whole if either query fails.
pub async fn fetch_page(
    manager: &Manager,
    items: Statement,
    count: Statement,
    page: i64,
    per_page: i64,
) -> DbResult<Page> {
    let limit = per_page.abs();
    let offset = ((page - 1) * per_page).abs();

    let mut items = items;
    items.sql = format!("{} LIMIT {} OFFSET {}", items.sql, limit, offset);

    let mut queries = HashMap::new();
    queries.insert(ITEMS_KEY.to_string(), items);
    queries.insert(COUNT_KEY.to_string(), count);
    let mut outcomes = manager.run_concurrent(queries).await?;

    let total = outcomes
        .get(COUNT_KEY)
        .and_then(|o| o.scalar_i64())
        .unwrap_or(0);
    let items = outcomes.remove(ITEMS_KEY).map(|o| o.rows).unwrap_or_default();

    Ok(Page {
        items,
        total,
        page,
        per_page,
    })
}
