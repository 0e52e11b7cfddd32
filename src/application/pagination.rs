//! Offset pagination helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const PAGE_PARAM: &str = "page";
pub const LIMIT_PARAM: &str = "limit";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("invalid page `{0}`")]
    InvalidPage(String),
    #[error("page size must be greater than zero")]
    ZeroPageSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub per_page: u64,
}

impl PageRequest {
    pub fn new(page: u64, per_page: u64) -> Result<Self, PaginationError> {
        if per_page == 0 {
            return Err(PaginationError::ZeroPageSize);
        }
        Ok(Self {
            page: page.max(1),
            per_page,
        })
    }

    /// Read the 1-based page number from a `page` parameter; absent or
    /// null means the first page.
    pub fn from_param(page: Option<&Value>, per_page: u64) -> Result<Self, PaginationError> {
        let page = match page {
            None | Some(Value::Null) => 1,
            Some(Value::Number(number)) => number
                .as_u64()
                .ok_or_else(|| PaginationError::InvalidPage(number.to_string()))?,
            Some(Value::String(text)) => text
                .trim()
                .parse::<u64>()
                .map_err(|_| PaginationError::InvalidPage(text.clone()))?,
            Some(other) => return Err(PaginationError::InvalidPage(other.to_string())),
        };
        Self::new(page, per_page)
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// One page of results with the totals needed to render pagers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub last_page: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let last_page = total.div_ceil(request.per_page).max(1);
        Self {
            items,
            total,
            page: request.page,
            per_page: request.per_page,
            last_page,
        }
    }

    pub fn has_more(&self) -> bool {
        self.page < self.last_page
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn page_param_accepts_numbers_and_numeric_strings() {
        assert_eq!(
            PageRequest::from_param(Some(&json!(3)), 25).expect("number").page,
            3
        );
        assert_eq!(
            PageRequest::from_param(Some(&json!(" 2 ")), 25)
                .expect("string")
                .page,
            2
        );
        assert_eq!(PageRequest::from_param(None, 25).expect("absent").page, 1);
    }

    #[test]
    fn page_zero_is_clamped_to_first_page() {
        let request = PageRequest::from_param(Some(&json!(0)), 10).expect("zero");
        assert_eq!(request.page, 1);
        assert_eq!(request.offset(), 0);
    }

    #[test]
    fn invalid_pages_are_rejected() {
        assert!(matches!(
            PageRequest::from_param(Some(&json!("two")), 10),
            Err(PaginationError::InvalidPage(_))
        ));
        assert!(matches!(
            PageRequest::from_param(Some(&json!(-1)), 10),
            Err(PaginationError::InvalidPage(_))
        ));
        assert_eq!(PageRequest::new(1, 0), Err(PaginationError::ZeroPageSize));
    }

    #[test]
    fn page_metadata_is_derived_from_total() {
        let request = PageRequest::new(2, 10).expect("request");
        assert_eq!(request.offset(), 10);

        let page = Page::new(vec![11, 12], 22, request);
        assert_eq!(page.last_page, 3);
        assert!(page.has_more());

        let empty: Page<i32> = Page::new(Vec::new(), 0, PageRequest::new(1, 10).expect("req"));
        assert_eq!(empty.last_page, 1);
        assert!(!empty.has_more());
    }
}
