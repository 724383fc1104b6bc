//! Basket Aggregate
//!
//! Session-scoped list of `(product, count)` entries. Never persisted.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Basket {
    items: Vec<BasketItem>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BasketItem {
    pub product_id: i64,
    pub count: u32,
}

impl Basket {
    pub fn new() -> Self { Self::default() }

    pub fn items(&self) -> &[BasketItem] { &self.items }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn product_ids(&self) -> Vec<i64> { self.items.iter().map(|i| i.product_id).collect() }

    pub fn count_of(&self, product_id: i64) -> Option<u32> {
        self.items.iter().find(|i| i.product_id == product_id).map(|i| i.count)
    }

    pub fn add(&mut self, product_id: i64, count: i64) -> Result<(), BasketError> {
        let count = positive(count)?;
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            existing.count = existing.count.saturating_add(count);
        } else {
            self.items.push(BasketItem { product_id, count });
        }
        Ok(())
    }

    pub fn remove(&mut self, product_id: i64, count: i64) -> Result<(), BasketError> {
        let count = positive(count)?;
        let item = self.items.iter_mut().find(|i| i.product_id == product_id).ok_or(BasketError::ItemNotFound(product_id))?;
        if item.count <= count {
            self.items.retain(|i| i.product_id != product_id);
        } else {
            item.count -= count;
        }
        Ok(())
    }

    /// Drops checked entries without stock and clamps the rest to the live stock level.
    /// Entries outside `checked` are left alone; a missing stock level counts as zero.
    pub fn reconcile(&mut self, checked: &[i64], stock: &HashMap<i64, i32>) {
        self.items.retain_mut(|item| {
            if !checked.contains(&item.product_id) { return true; }
            let available = stock.get(&item.product_id).copied().unwrap_or(0);
            if available <= 0 { return false; }
            item.count = item.count.min(available as u32);
            true
        });
    }

    pub fn clear(&mut self) { self.items.clear(); }
}

fn positive(count: i64) -> Result<u32, BasketError> {
    match u32::try_from(count) {
        Ok(c) if c > 0 => Ok(c),
        _ => Err(BasketError::InvalidQuantity(count)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BasketError {
    #[error("product {0} is not in the basket")]
    ItemNotFound(i64),
    #[error("count must be a positive integer, got {0}")]
    InvalidQuantity(i64),
}
