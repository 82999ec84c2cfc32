//! Paged queries.

use crate::entity::{EntityFilter, EntitySort};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

pub const MAX_PAGE_SIZE: u32 = 500;

/// A page request with optional filter and ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest<F, S> {
    pub page_number: u32,
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<F>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<S>,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

impl<F, S> PageRequest<F, S> {
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
            filter: None,
            sort: None,
            ascending: true,
        }
    }

    pub fn with_filter(mut self, filter: F) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sorted_by(mut self, sort: S, ascending: bool) -> Self {
        self.sort = Some(sort);
        self.ascending = ascending;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_number == 0 {
            return Err(Error::Validation("page number starts at 1".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// One page of results with the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self, page_size: u32) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(u64::from(page_size))
    }
}

/// Applies a page request to an in-memory collection.
pub fn paginate<E, F, S>(items: Vec<E>, request: &PageRequest<F, S>) -> Result<Page<E>>
where
    F: EntityFilter<E>,
    S: EntitySort<E>,
{
    request.validate()?;
    let mut matching: Vec<E> = match &request.filter {
        Some(filter) => items.into_iter().filter(|e| filter.matches(e)).collect(),
        None => items,
    };
    let sort = request.sort.unwrap_or_default();
    matching.sort_by(|a, b| {
        let ord = sort.compare(a, b);
        if request.ascending { ord } else { ord.reverse() }
    });

    let total_count = matching.len() as u64;
    let items = matching
        .into_iter()
        .skip(request.offset() as usize)
        .take(request.page_size as usize)
        .collect();
    Ok(Page { items, total_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::{Product, ProductFilter, ProductSort};

    fn catalog() -> Vec<Product> {
        (1..=7)
            .map(|i| Product::create(&format!("Item {i}"), None, i * 100, "units").unwrap())
            .collect()
    }

    #[test]
    fn test_paginate_sorts_and_slices() {
        let request: PageRequest<ProductFilter, ProductSort> =
            PageRequest::new(2, 3).sorted_by(ProductSort::UnitPrice, false);
        let page = paginate(catalog(), &request).unwrap();

        assert_eq!(page.total_count, 7);
        let prices: Vec<u64> = page.items.iter().map(|p| p.unit_price_cents()).collect();
        assert_eq!(prices, vec![400, 300, 200]);
        assert_eq!(page.total_pages(3), 3);
    }

    #[test]
    fn test_paginate_applies_filter_before_counting() {
        let request = PageRequest::new(1, 10)
            .with_filter(ProductFilter::price_between(200, 400))
            .sorted_by(ProductSort::UnitPrice, true);
        let page = paginate(catalog(), &request).unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.items.len(), 3);
    }

    #[test]
    fn test_invalid_page_request() {
        let request: PageRequest<ProductFilter, ProductSort> = PageRequest::new(0, 10);
        assert!(paginate(catalog(), &request).is_err());
        let request: PageRequest<ProductFilter, ProductSort> = PageRequest::new(1, 0);
        assert!(request.validate().is_err());
    }
}
