//! In-memory store for tests and database-less local runs.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{AccountStore, CatalogStore, ConfirmOutcome, NewReview, OrderStore, ReviewOutcome};
use crate::accounts::{NewUser, Profile, ProfileUpdate, UserAccount};
use crate::catalog::{
    CatalogPage, CatalogQuery, CategoryNode, Image, PageRequest, ProductCard, ProductDetail, Review, SaleCard,
    Specification, SubcategoryNode, Tag,
};
use crate::domain::aggregates::{Confirmation, Order, Product, ProductSale, SaleDraft};
use crate::domain::value_objects::{PasswordHash, PaymentCard};
use crate::{Result, ShopError};

/// Catalog entry used to seed a [`MemoryStore`].
#[derive(Clone, Debug)]
pub struct NewProduct {
    pub subcategory_id: i64,
    pub title: String,
    pub description: String,
    pub full_description: Option<String>,
    pub price: Decimal,
    pub count: i32,
    pub free_delivery: bool,
    pub rating: Decimal,
    pub images: Vec<Image>,
    pub tags: Vec<i64>,
    pub specifications: Vec<Specification>,
}

struct CategoryRecord { title: String, image: Option<Image> }
struct SubcategoryRecord { category_id: i64, title: String, image: Option<Image> }
struct ProductRecord { product: Product, images: Vec<Image>, tags: Vec<i64>, specifications: Vec<Specification> }

#[derive(Default)]
struct State {
    last_id: i64,
    categories: BTreeMap<i64, CategoryRecord>,
    subcategories: BTreeMap<i64, SubcategoryRecord>,
    tags: BTreeMap<i64, String>,
    products: BTreeMap<i64, ProductRecord>,
    reviews: Vec<(i64, Review)>,
    sales: BTreeMap<i64, ProductSale>,
    users: BTreeMap<i64, UserAccount>,
    profiles: BTreeMap<i64, Profile>,
    orders: BTreeMap<i64, Order>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn tag_list(&self, ids: &[i64]) -> Vec<Tag> {
        ids.iter().filter_map(|id| self.tags.get(id).map(|name| Tag { id: *id, name: name.clone() })).collect()
    }

    fn card(&self, id: i64) -> Option<ProductCard> {
        let record = self.products.get(&id)?;
        let p = &record.product;
        Some(ProductCard {
            id: p.id,
            category: p.subcategory_id,
            price: p.price,
            count: p.count,
            date: p.created_at,
            title: p.title.clone(),
            description: p.description.clone(),
            free_delivery: p.free_delivery,
            images: record.images.clone(),
            tags: self.tag_list(&record.tags),
            reviews: self.reviews.iter().filter(|(pid, _)| *pid == id).count() as i64,
            rating: p.rating,
        })
    }

    fn all_cards(&self) -> Vec<ProductCard> {
        self.products.keys().filter_map(|id| self.card(*id)).collect()
    }

    fn category_of(&self, product: &Product) -> Option<i64> {
        self.subcategories.get(&product.subcategory_id).map(|s| s.category_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn add_category(&self, title: &str, image: Option<Image>) -> i64 {
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.categories.insert(id, CategoryRecord { title: title.to_string(), image });
        id
    }

    pub async fn add_subcategory(&self, category_id: i64, title: &str, image: Option<Image>) -> i64 {
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.subcategories.insert(id, SubcategoryRecord { category_id, title: title.to_string(), image });
        id
    }

    pub async fn add_tag(&self, name: &str) -> i64 {
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.tags.insert(id, name.to_string());
        id
    }

    pub async fn add_product(&self, new: NewProduct) -> i64 {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let product = Product {
            id,
            subcategory_id: new.subcategory_id,
            price: new.price,
            count: new.count,
            created_at: Utc::now(),
            title: new.title,
            description: new.description,
            full_description: new.full_description,
            free_delivery: new.free_delivery,
            rating: new.rating,
        };
        state.products.insert(id, ProductRecord { product, images: new.images, tags: new.tags, specifications: new.specifications });
        id
    }

    pub async fn set_staff(&self, user_id: i64, is_staff: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&user_id).ok_or(ShopError::not_found("user", user_id))?;
        user.is_staff = is_staff;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn categories(&self) -> Result<Vec<CategoryNode>> {
        let state = self.state.read().await;
        Ok(state.categories.iter().map(|(id, c)| CategoryNode {
            id: *id,
            title: c.title.clone(),
            image: c.image.clone(),
            subcategories: state.subcategories.iter()
                .filter(|(_, s)| s.category_id == *id)
                .map(|(sid, s)| SubcategoryNode { id: *sid, title: s.title.clone(), image: s.image.clone() })
                .collect(),
        }).collect())
    }

    async fn tags(&self, category: Option<i64>) -> Result<Vec<Tag>> {
        let state = self.state.read().await;
        let ids: Vec<i64> = match category {
            None => state.tags.keys().copied().collect(),
            Some(category) => state.tags.keys().copied().filter(|tag| {
                state.products.values().any(|r| r.product.subcategory_id == category && r.tags.contains(tag))
            }).collect(),
        };
        Ok(state.tag_list(&ids))
    }

    async fn product(&self, id: i64) -> Result<ProductDetail> {
        let state = self.state.read().await;
        let record = state.products.get(&id).ok_or(ShopError::not_found("product", id))?;
        let p = &record.product;
        Ok(ProductDetail {
            id,
            category: p.subcategory_id,
            price: p.price,
            count: p.count,
            date: p.created_at,
            title: p.title.clone(),
            description: p.description.clone(),
            full_description: p.full_description.clone(),
            free_delivery: p.free_delivery,
            images: record.images.clone(),
            tags: state.tag_list(&record.tags),
            reviews: state.reviews.iter().filter(|(pid, _)| *pid == id).map(|(_, r)| r.clone()).collect(),
            specifications: record.specifications.clone(),
            rating: p.rating,
        })
    }

    async fn product_cards(&self, ids: &[i64]) -> Result<Vec<ProductCard>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.card(*id)).collect())
    }

    async fn search(&self, query: &CatalogQuery) -> Result<CatalogPage<ProductCard>> {
        let state = self.state.read().await;
        if query.is_empty_range() { return Ok(query.page.into_page(vec![], 0)); }
        let mut matched: Vec<ProductCard> = state.all_cards().into_iter().filter(|c| query.matches(c)).collect();
        matched.sort_by(|a, b| query.compare(a, b));
        let total = matched.len() as u64;
        Ok(query.page.into_page(query.page.slice(&matched), total))
    }

    async fn popular(&self, limit: i64) -> Result<Vec<ProductCard>> {
        let state = self.state.read().await;
        let mut cards = state.all_cards();
        cards.sort_by(|a, b| b.rating.cmp(&a.rating).then_with(|| a.id.cmp(&b.id)));
        cards.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(cards)
    }

    async fn limited(&self, threshold: i32, limit: i64) -> Result<Vec<ProductCard>> {
        let state = self.state.read().await;
        let mut cards: Vec<ProductCard> = state.all_cards().into_iter().filter(|c| (1..=threshold).contains(&c.count)).collect();
        cards.sort_by(|a, b| a.count.cmp(&b.count).then_with(|| a.id.cmp(&b.id)));
        cards.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(cards)
    }

    async fn banner_candidates(&self) -> Result<Vec<ProductCard>> {
        let state = self.state.read().await;
        let mut best: BTreeMap<i64, &Product> = BTreeMap::new();
        for record in state.products.values() {
            let Some(category) = state.category_of(&record.product) else { continue };
            let p = &record.product;
            best.entry(category)
                .and_modify(|current| if p.rating > current.rating { *current = p })
                .or_insert(p);
        }
        Ok(best.values().filter_map(|p| state.card(p.id)).collect())
    }

    async fn sales(&self, page: PageRequest) -> Result<CatalogPage<SaleCard>> {
        let state = self.state.read().await;
        let all: Vec<SaleCard> = state.sales.values().cloned().map(SaleCard::from).collect();
        Ok(page.into_page(page.slice(&all), all.len() as u64))
    }

    async fn create_sale(&self, product_id: i64, draft: SaleDraft) -> Result<ProductSale> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.sales.contains_key(&product_id) {
            return Err(ShopError::Conflict(format!("product {product_id} is already on sale")));
        }
        let record = state.products.get_mut(&product_id).ok_or(ShopError::not_found("product", product_id))?;
        let sale = record.product.start_sale(draft, record.images.clone())?;
        state.sales.insert(product_id, sale.clone());
        Ok(sale)
    }

    async fn add_review(&self, product_id: i64, review: NewReview) -> Result<ReviewOutcome> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let record = state.products.get_mut(&product_id).ok_or(ShopError::not_found("product", product_id))?;
        let rating = record.product.apply_review(review.rate)?;
        let review = Review {
            author: review.author,
            email: review.email,
            text: review.text,
            rate: i16::from(review.rate.value()),
            date: Utc::now(),
        };
        state.reviews.push((product_id, review.clone()));
        Ok(ReviewOutcome { review, rating })
    }

    async fn stock_levels(&self, ids: &[i64]) -> Result<HashMap<i64, i32>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.products.get(id).map(|r| (*id, r.product.count))).collect())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<i64> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(ShopError::Conflict(format!("username '{}' is already taken", user.username)));
        }
        let id = state.next_id();
        state.users.insert(id, UserAccount { id, username: user.username, password_hash: user.password_hash, is_staff: false });
        state.profiles.insert(id, Profile { full_name: user.full_name, email: None, phone: None, avatar: None });
        Ok(id)
    }

    async fn user_by_name(&self, username: &str) -> Result<Option<UserAccount>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn user(&self, id: i64) -> Result<UserAccount> {
        let state = self.state.read().await;
        state.users.get(&id).cloned().ok_or(ShopError::not_found("user", id))
    }

    async fn set_password(&self, user_id: i64, hash: PasswordHash) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&user_id).ok_or(ShopError::not_found("user", user_id))?;
        user.password_hash = hash;
        Ok(())
    }

    async fn profile(&self, user_id: i64) -> Result<Profile> {
        let state = self.state.read().await;
        state.profiles.get(&user_id).cloned().ok_or(ShopError::not_found("profile", user_id))
    }

    async fn update_profile(&self, user_id: i64, update: ProfileUpdate) -> Result<Profile> {
        let mut state = self.state.write().await;
        let profile = state.profiles.get_mut(&user_id).ok_or(ShopError::not_found("profile", user_id))?;
        update.apply(profile);
        Ok(profile.clone())
    }

    async fn replace_avatar(&self, user_id: i64, image: Image) -> Result<Profile> {
        let mut state = self.state.write().await;
        let profile = state.profiles.get_mut(&user_id).ok_or(ShopError::not_found("profile", user_id))?;
        profile.avatar = Some(image);
        Ok(profile.clone())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn place_order(&self, mut order: Order) -> Result<Order> {
        let mut state = self.state.write().await;
        if let Some(line) = order.lines.iter().find(|l| !state.products.contains_key(&l.product_id)) {
            return Err(ShopError::not_found("product", line.product_id));
        }
        order.id = state.next_id();
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn order(&self, id: i64) -> Result<Order> {
        let state = self.state.read().await;
        state.orders.get(&id).cloned().ok_or(ShopError::not_found("order", id))
    }

    async fn orders_for_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.values().rev().filter(|o| o.user_id == Some(user_id)).cloned().collect())
    }

    async fn orders_by_ids(&self, ids: &[i64]) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.values().rev().filter(|o| ids.contains(&o.id)).cloned().collect())
    }

    async fn confirm_order(&self, id: i64, confirmation: Confirmation) -> Result<ConfirmOutcome> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let mut order = state.orders.get(&id).cloned().ok_or(ShopError::not_found("order", id))?;
        let stock = order.confirm(confirmation)?;
        for sync in &stock {
            if let Some(record) = state.products.get_mut(&sync.product_id) {
                record.product.sync_stock(sync.count)?;
            }
        }
        state.orders.insert(id, order.clone());
        Ok(ConfirmOutcome { order, stock })
    }

    async fn pay_order(&self, id: i64, card: &PaymentCard, today: NaiveDate) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state.orders.get_mut(&id).ok_or(ShopError::not_found("order", id))?;
        order.pay(card, today)?;
        Ok(order.clone())
    }

    async fn assign_orders(&self, ids: &[i64], user_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        for order in state.orders.values_mut().filter(|o| ids.contains(&o.id) && o.user_id.is_none()) {
            order.user_id = Some(user_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{LineItem, OrderStatus};
    use crate::domain::value_objects::{DeliveryType, ReviewRate};
    use std::collections::BTreeMap;

    fn new_product(subcategory_id: i64, title: &str, price: i64, count: i32) -> NewProduct {
        NewProduct {
            subcategory_id, title: title.into(), description: "desc".into(), full_description: None,
            price: Decimal::from(price), count, free_delivery: true, rating: Decimal::new(40, 1),
            images: vec![Image { src: format!("images/{title}.png"), alt: None }], tags: vec![], specifications: vec![],
        }
    }

    async fn seeded() -> (MemoryStore, i64, i64) {
        let store = MemoryStore::new();
        let cat = store.add_category("Sofas", None).await;
        let sub = store.add_subcategory(cat, "Corner", None).await;
        let product = store.add_product(new_product(sub, "Sofa", 1000, 5)).await;
        (store, sub, product)
    }

    #[tokio::test]
    async fn test_add_review_updates_rating() {
        let (store, _, product) = seeded().await;
        let outcome = store.add_review(product, NewReview {
            author: "Ann".into(), email: "ann@example.com".into(), text: Some("Nice".into()), rate: ReviewRate::new(5).unwrap(),
        }).await.unwrap();
        assert_eq!(outcome.rating, Decimal::new(42, 1));
        let detail = store.product(product).await.unwrap();
        assert_eq!(detail.rating, Decimal::new(42, 1));
        assert_eq!(detail.reviews.len(), 1);
        assert!(matches!(store.add_review(999, NewReview {
            author: "A".into(), email: "a@b.c".into(), text: None, rate: ReviewRate::new(1).unwrap(),
        }).await, Err(ShopError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_create_sale_overrides_price_once() {
        let (store, _, product) = seeded().await;
        let now = Utc::now();
        let draft = SaleDraft { sale_price: Decimal::from(800), date_from: now, date_to: now };
        let sale = store.create_sale(product, draft.clone()).await.unwrap();
        assert_eq!(sale.price, Decimal::from(1000));
        assert_eq!(sale.images.len(), 1);
        assert_eq!(store.product(product).await.unwrap().price, Decimal::from(800));
        assert!(matches!(store.create_sale(product, draft).await, Err(ShopError::Conflict(_))));
        let page = store.sales(PageRequest::default()).await.unwrap();
        assert_eq!(page.items[0].sale_price, Decimal::from(800));
        assert_eq!(page.last_page, 1);
    }

    #[tokio::test]
    async fn test_confirm_overwrites_stock_once() {
        let (store, _, product) = seeded().await;
        let order = Order::place(None, vec![LineItem { product_id: product, price: Decimal::from(1000), count: 2 }]).unwrap();
        let order = store.place_order(order).await.unwrap();
        let confirmation = Confirmation {
            delivery_type: Some(DeliveryType::Express),
            counts: BTreeMap::from([(product, 3)]),
            ..Default::default()
        };
        let first = store.confirm_order(order.id, confirmation.clone()).await.unwrap();
        assert_eq!(first.order.status, OrderStatus::Accepted);
        assert_eq!(store.stock_levels(&[product]).await.unwrap()[&product], 3);

        let second = store.confirm_order(order.id, Confirmation { counts: BTreeMap::from([(product, 1)]), ..confirmation }).await.unwrap();
        assert!(second.stock.is_empty());
        assert_eq!(store.stock_levels(&[product]).await.unwrap()[&product], 3);
        assert_eq!(second.order.total_cost, first.order.total_cost);
    }

    #[tokio::test]
    async fn test_place_order_requires_known_products() {
        let (store, _, _) = seeded().await;
        let order = Order::place(None, vec![LineItem { product_id: 404, price: Decimal::ONE, count: 1 }]).unwrap();
        assert!(matches!(store.place_order(order).await, Err(ShopError::NotFound { entity: "product", id: 404 })));
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        let hash = PasswordHash::from_stored("x");
        let user = NewUser { username: "ann".into(), full_name: "Ann".into(), password_hash: hash };
        let id = store.create_user(user.clone()).await.unwrap();
        assert!(matches!(store.create_user(user).await, Err(ShopError::Conflict(_))));
        assert_eq!(store.profile(id).await.unwrap().full_name, "Ann");
    }

    #[tokio::test]
    async fn test_listings() {
        let (store, sub, first) = seeded().await;
        let low = store.add_product(new_product(sub, "Stool", 50, 1)).await;
        let mut rated = new_product(sub, "Armchair", 300, 40);
        rated.rating = Decimal::new(49, 1);
        let top = store.add_product(rated).await;

        let popular: Vec<i64> = store.popular(2).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(popular, vec![top, first]);
        let limited: Vec<i64> = store.limited(5, 10).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(limited, vec![low, first]);
        let banners = store.banner_candidates().await.unwrap();
        assert_eq!(banners.len(), 1);
        assert_eq!(banners[0].id, top);
    }
}
