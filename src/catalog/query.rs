//! Catalog filter, sort and pagination request.
//!
//! Parsed from the storefront query string (`filter[name]`, `tags[]`, ...).
//! The Postgres store compiles it to SQL; the in-memory store evaluates
//! [`CatalogQuery::matches`] and [`CatalogQuery::compare`] directly. Both
//! must agree on the semantics below:
//!
//! - title match is a case-insensitive substring
//! - price bounds are inclusive; `min > max` matches nothing
//! - `available` keeps products with stock of at least one
//! - `tags` keeps products carrying any of the listed tags, once each
//! - ties in the sort key fall back to product id ascending

use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::str::FromStr;

use crate::catalog::ProductCard;
use crate::{Result, ShopError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortField {
    Rating,
    #[default]
    Price,
    Reviews,
    Date,
}

impl FromStr for SortField {
    type Err = ShopError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rating" => Ok(Self::Rating),
            "price" => Ok(Self::Price),
            "reviews" => Ok(Self::Reviews),
            "date" => Ok(Self::Date),
            _ => Err(ShopError::Validation(format!("unknown sort field '{s}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    Inc,
    #[default]
    Dec,
}

impl FromStr for SortDirection {
    type Err = ShopError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inc" => Ok(Self::Inc),
            "dec" => Ok(Self::Dec),
            _ => Err(ShopError::Validation(format!("unknown sort type '{s}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self { Self::new(1, Self::DEFAULT_LIMIT) }
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: u32, limit: u32) -> Self {
        Self { page: page.max(1), limit: limit.clamp(1, Self::MAX_LIMIT) }
    }

    pub fn offset(&self) -> u64 { u64::from(self.page - 1) * u64::from(self.limit) }

    pub fn last_page(&self, total: u64) -> u64 { total.div_ceil(u64::from(self.limit)) }

    /// Cuts this page out of an already filtered and sorted list.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let start = usize::try_from(self.offset()).unwrap_or(usize::MAX).min(items.len());
        let end = start.saturating_add(self.limit as usize).min(items.len());
        items[start..end].to_vec()
    }

    pub fn into_page<T>(self, items: Vec<T>, total: u64) -> CatalogPage<T> {
        CatalogPage { items, current_page: self.page, last_page: self.last_page(total) }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage<T> {
    pub items: Vec<T>,
    pub current_page: u32,
    pub last_page: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CatalogQuery {
    pub name: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub free_delivery: bool,
    pub available: bool,
    pub category: Option<i64>,
    pub tags: Vec<i64>,
    pub sort: SortField,
    pub direction: SortDirection,
    pub page: PageRequest,
}

impl CatalogQuery {
    /// Builds a query from raw query-string pairs. Empty values are ignored.
    pub fn from_pairs(pairs: &[(String, String)], default_limit: u32) -> Result<Self> {
        let mut query = Self::default();
        let mut page = 1;
        let mut limit = default_limit;
        for (key, value) in pairs {
            let value = value.trim();
            if value.is_empty() { continue; }
            match key.as_str() {
                "filter[name]" => query.name = Some(value.to_string()),
                "filter[minPrice]" => query.min_price = Some(parse(key, value)?),
                "filter[maxPrice]" => query.max_price = Some(parse(key, value)?),
                "filter[freeDelivery]" => query.free_delivery = parse(key, value)?,
                "filter[available]" => query.available = parse(key, value)?,
                "category" => query.category = Some(parse(key, value)?),
                "tags[]" | "tags" => query.tags.push(parse(key, value)?),
                "sort" => query.sort = value.parse()?,
                "sortType" => query.direction = value.parse()?,
                "currentPage" => page = parse(key, value)?,
                "limit" => limit = parse(key, value)?,
                _ => {}
            }
        }
        query.tags.sort_unstable();
        query.tags.dedup();
        query.page = PageRequest::new(page, limit);
        Ok(query)
    }

    /// True when the price bounds cannot match anything.
    pub fn is_empty_range(&self) -> bool {
        matches!((self.min_price, self.max_price), (Some(min), Some(max)) if min > max)
    }

    /// `ILIKE` pattern for the title filter with wildcards in user input escaped.
    pub fn name_pattern(&self) -> Option<String> {
        self.name.as_ref().map(|name| {
            let escaped = name.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            format!("%{escaped}%")
        })
    }

    pub fn matches(&self, card: &ProductCard) -> bool {
        if let Some(name) = &self.name {
            if !card.title.to_lowercase().contains(&name.to_lowercase()) { return false; }
        }
        if self.min_price.is_some_and(|min| card.price < min) { return false; }
        if self.max_price.is_some_and(|max| card.price > max) { return false; }
        if self.free_delivery && !card.free_delivery { return false; }
        if self.available && card.count < 1 { return false; }
        if self.category.is_some_and(|c| card.category != c) { return false; }
        if !self.tags.is_empty() && !card.tags.iter().any(|t| self.tags.contains(&t.id)) { return false; }
        true
    }

    pub fn compare(&self, a: &ProductCard, b: &ProductCard) -> Ordering {
        let key = match self.sort {
            SortField::Rating => a.rating.cmp(&b.rating),
            SortField::Price => a.price.cmp(&b.price),
            SortField::Reviews => a.reviews.cmp(&b.reviews),
            SortField::Date => a.date.cmp(&b.date),
        };
        let key = match self.direction {
            SortDirection::Inc => key,
            SortDirection::Dec => key.reverse(),
        };
        key.then_with(|| a.id.cmp(&b.id))
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| ShopError::Validation(format!("invalid value '{value}' for {key}")))
}
