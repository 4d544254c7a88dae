use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
/// Highest page whose offset still fits in an `i64`.
pub const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
    #[serde(skip)]
    pub offset: i64,
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        Self { page, limit, offset: (page - 1) * limit }
    }

    pub fn push_limit(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" LIMIT ").push_bind(self.limit);
        qb.push(" OFFSET ").push_bind(self.offset);
    }

    pub fn meta(&self, total: i64) -> serde_json::Value {
        serde_json::json!({
            "page": self.page,
            "limit": self.limit,
            "total": total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let page = Page::new(None, None);
        assert_eq!((page.page, page.limit, page.offset), (1, 10, 0));
    }

    #[test]
    fn test_clamps() {
        let page = Page::new(Some(0), Some(1000));
        assert_eq!((page.page, page.limit, page.offset), (1, 100, 0));
        let page = Page::new(Some(3), Some(25));
        assert_eq!(page.offset, 50);
        assert_eq!(Page::new(Some(2), Some(-4)).limit, 1);
    }

    #[test]
    fn test_huge_page_is_capped() {
        let page = Page::new(Some(i64::MAX), Some(10));
        assert_eq!(page.page, MAX_PAGE);
        assert_eq!(page.offset, (MAX_PAGE - 1) * 10);

        let page = Page::new(Some(i64::MAX), Some(MAX_LIMIT));
        assert!(page.offset > 0);
    }

    #[test]
    fn test_meta() {
        let meta = Page::new(Some(2), Some(5)).meta(42);
        assert_eq!(meta, serde_json::json!({"page": 2, "limit": 5, "total": 42}));
    }
}
