//! PostgreSQL store on sqlx.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{AccountStore, CatalogStore, ConfirmOutcome, NewReview, OrderStore, ReviewOutcome};
use crate::accounts::{NewUser, Profile, ProfileUpdate, UserAccount};
use crate::catalog::{
    CatalogPage, CatalogQuery, CategoryNode, Image, PageRequest, ProductCard, ProductDetail, Review, SaleCard,
    SortDirection, SortField, Specification, SubcategoryNode, Tag,
};
use crate::domain::aggregates::{Confirmation, Contact, LineItem, Order, Product, ProductSale, SaleDraft};
use crate::domain::value_objects::{ParseEnumError, PasswordHash, PaymentCard};
use crate::{Result, ShopError};

const CARD_COLUMNS: &str = "p.id, p.subcategory_id, p.price, p.count, p.created_at, p.title, p.description, \
     p.free_delivery, p.rating, (SELECT COUNT(*) FROM reviews r WHERE r.product_id = p.id) AS review_count";

const PRODUCT_LOCK: &str = "SELECT id, subcategory_id, price, count, created_at, title, description, \
     full_description, free_delivery, rating FROM products WHERE id = $1 FOR UPDATE";

const ORDER_COLUMNS: &str = "id, user_id, created_at, updated_at, full_name, email, phone, city, address, \
     delivery_type, payment_type, total_cost, status";

#[derive(FromRow)]
struct CardRow {
    id: i64,
    subcategory_id: i64,
    price: Decimal,
    count: i32,
    created_at: DateTime<Utc>,
    title: String,
    description: String,
    free_delivery: bool,
    rating: Decimal,
    review_count: i64,
}

#[derive(FromRow)]
struct OwnedImageRow { owner_id: i64, src: String, alt: Option<String> }

#[derive(FromRow)]
struct OwnedTagRow { owner_id: i64, id: i64, name: String }

#[derive(FromRow)]
struct CategoryRow { id: i64, title: String, src: Option<String>, alt: Option<String> }

#[derive(FromRow)]
struct SubcategoryRow { id: i64, category_id: i64, title: String, src: Option<String>, alt: Option<String> }

#[derive(FromRow)]
struct SaleRow {
    product_id: i64,
    price: Decimal,
    sale_price: Decimal,
    date_from: DateTime<Utc>,
    date_to: DateTime<Utc>,
    title: String,
}

#[derive(FromRow)]
struct UserRow { id: i64, username: String, password_hash: String, is_staff: bool }

impl From<UserRow> for UserAccount {
    fn from(r: UserRow) -> Self {
        Self { id: r.id, username: r.username, password_hash: PasswordHash::from_stored(r.password_hash), is_staff: r.is_staff }
    }
}

#[derive(FromRow)]
struct ProfileRow { full_name: String, email: Option<String>, phone: Option<String>, src: Option<String>, alt: Option<String> }

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    user_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    full_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    city: Option<String>,
    address: Option<String>,
    delivery_type: String,
    payment_type: String,
    total_cost: Decimal,
    status: String,
}

#[derive(FromRow)]
struct LineRow { order_id: i64, product_id: i64, price: Decimal, count: i32 }

fn image(src: Option<String>, alt: Option<String>) -> Option<Image> {
    src.map(|src| Image { src, alt })
}

fn decode(e: ParseEnumError) -> ShopError {
    ShopError::Storage(sqlx::Error::Decode(Box::new(e)))
}

fn into_order(row: OrderRow, lines: Vec<LineItem>) -> Result<Order> {
    Ok(Order {
        id: row.id,
        user_id: row.user_id,
        created_at: row.created_at,
        updated_at: row.updated_at,
        contact: Contact { full_name: row.full_name, email: row.email, phone: row.phone, city: row.city, address: row.address },
        delivery_type: row.delivery_type.parse().map_err(decode)?,
        payment_type: row.payment_type.parse().map_err(decode)?,
        total_cost: row.total_cost,
        status: row.status.parse().map_err(decode)?,
        lines,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Appends the catalog filter as a `WHERE` clause with bound parameters.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &CatalogQuery) {
    qb.push(" WHERE TRUE");
    if let Some(pattern) = query.name_pattern() {
        qb.push(" AND p.title ILIKE ").push_bind(pattern).push(" ESCAPE '\\'");
    }
    if let Some(min) = query.min_price {
        qb.push(" AND p.price >= ").push_bind(min);
    }
    if let Some(max) = query.max_price {
        qb.push(" AND p.price <= ").push_bind(max);
    }
    if query.free_delivery {
        qb.push(" AND p.free_delivery");
    }
    if query.available {
        qb.push(" AND p.count >= 1");
    }
    if let Some(category) = query.category {
        qb.push(" AND p.subcategory_id = ").push_bind(category);
    }
    if !query.tags.is_empty() {
        qb.push(" AND EXISTS (SELECT 1 FROM product_tags pt WHERE pt.product_id = p.id AND pt.tag_id = ANY(")
            .push_bind(query.tags.clone())
            .push("))");
    }
}

fn push_order_by(qb: &mut QueryBuilder<'_, Postgres>, query: &CatalogQuery) {
    let column = match query.sort {
        SortField::Rating => "p.rating",
        SortField::Price => "p.price",
        SortField::Reviews => "review_count",
        SortField::Date => "p.created_at",
    };
    let direction = match query.direction {
        SortDirection::Inc => "ASC",
        SortDirection::Dec => "DESC",
    };
    qb.push(format!(" ORDER BY {column} {direction}, p.id ASC"));
}

fn search_sql(query: &CatalogQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {CARD_COLUMNS} FROM products p"));
    push_filters(&mut qb, query);
    push_order_by(&mut qb, query);
    qb.push(" LIMIT ").push_bind(i64::from(query.page.limit));
    qb.push(" OFFSET ").push_bind(query.page.offset() as i64);
    qb
}

fn count_sql(query: &CatalogQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM products p");
    push_filters(&mut qb, query);
    qb
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(sqlx::Error::from)?;
        info!("database migrations applied");
        Ok(())
    }

    /// Loads images and tags for listing rows, keeping row order.
    async fn hydrate(&self, rows: Vec<CardRow>) -> Result<Vec<ProductCard>> {
        if rows.is_empty() { return Ok(vec![]); }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let images: Vec<OwnedImageRow> = sqlx::query_as(
            "SELECT pi.product_id AS owner_id, i.src, i.alt FROM product_images pi \
             JOIN images i ON i.id = pi.image_id WHERE pi.product_id = ANY($1) ORDER BY i.id",
        ).bind(&ids[..]).fetch_all(&self.pool).await?;
        let tags: Vec<OwnedTagRow> = sqlx::query_as(
            "SELECT pt.product_id AS owner_id, t.id, t.name FROM product_tags pt \
             JOIN tags t ON t.id = pt.tag_id WHERE pt.product_id = ANY($1) ORDER BY t.id",
        ).bind(&ids[..]).fetch_all(&self.pool).await?;

        let mut images_by: HashMap<i64, Vec<Image>> = HashMap::new();
        for r in images { images_by.entry(r.owner_id).or_default().push(Image { src: r.src, alt: r.alt }); }
        let mut tags_by: HashMap<i64, Vec<Tag>> = HashMap::new();
        for r in tags { tags_by.entry(r.owner_id).or_default().push(Tag { id: r.id, name: r.name }); }

        Ok(rows.into_iter().map(|r| ProductCard {
            id: r.id,
            category: r.subcategory_id,
            price: r.price,
            count: r.count,
            date: r.created_at,
            title: r.title,
            description: r.description,
            free_delivery: r.free_delivery,
            images: images_by.remove(&r.id).unwrap_or_default(),
            tags: tags_by.remove(&r.id).unwrap_or_default(),
            reviews: r.review_count,
            rating: r.rating,
        }).collect())
    }

    async fn load_orders(&self, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let lines: Vec<LineRow> = sqlx::query_as(
            "SELECT order_id, product_id, price, count FROM order_products WHERE order_id = ANY($1) ORDER BY id",
        ).bind(&ids[..]).fetch_all(&self.pool).await?;
        let mut lines_by: HashMap<i64, Vec<LineItem>> = HashMap::new();
        for l in lines {
            lines_by.entry(l.order_id).or_default().push(LineItem { product_id: l.product_id, price: l.price, count: l.count });
        }
        rows.into_iter().map(|r| {
            let lines = lines_by.remove(&r.id).unwrap_or_default();
            into_order(r, lines)
        }).collect()
    }
}

async fn lock_order(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<Order> {
    let row: OrderRow = sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(ShopError::not_found("order", id))?;
    let lines: Vec<LineRow> = sqlx::query_as("SELECT order_id, product_id, price, count FROM order_products WHERE order_id = $1 ORDER BY id")
        .bind(id)
        .fetch_all(&mut **tx)
        .await?;
    into_order(row, lines.into_iter().map(|l| LineItem { product_id: l.product_id, price: l.price, count: l.count }).collect())
}

async fn save_order_state(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<()> {
    sqlx::query(
        "UPDATE orders SET full_name = $2, email = $3, phone = $4, city = $5, address = $6, delivery_type = $7, \
         payment_type = $8, total_cost = $9, status = $10, updated_at = $11 WHERE id = $1",
    )
    .bind(order.id)
    .bind(&order.contact.full_name)
    .bind(&order.contact.email)
    .bind(&order.contact.phone)
    .bind(&order.contact.city)
    .bind(&order.contact.address)
    .bind(order.delivery_type.as_str())
    .bind(order.payment_type.as_str())
    .bind(order.total_cost)
    .bind(order.status.as_str())
    .bind(order.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn lock_product(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<Product> {
    sqlx::query_as(PRODUCT_LOCK)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(ShopError::not_found("product", id))
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn categories(&self) -> Result<Vec<CategoryNode>> {
        let categories: Vec<CategoryRow> = sqlx::query_as(
            "SELECT c.id, c.title, i.src, i.alt FROM categories c LEFT JOIN images i ON i.id = c.image_id ORDER BY c.id",
        ).fetch_all(&self.pool).await?;
        let subcategories: Vec<SubcategoryRow> = sqlx::query_as(
            "SELECT s.id, s.category_id, s.title, i.src, i.alt FROM subcategories s LEFT JOIN images i ON i.id = s.image_id ORDER BY s.id",
        ).fetch_all(&self.pool).await?;

        let mut children: HashMap<i64, Vec<SubcategoryNode>> = HashMap::new();
        for s in subcategories {
            children.entry(s.category_id).or_default().push(SubcategoryNode { id: s.id, title: s.title, image: image(s.src, s.alt) });
        }
        Ok(categories.into_iter().map(|c| CategoryNode {
            id: c.id,
            title: c.title,
            image: image(c.src, c.alt),
            subcategories: children.remove(&c.id).unwrap_or_default(),
        }).collect())
    }

    async fn tags(&self, category: Option<i64>) -> Result<Vec<Tag>> {
        let tags: Vec<Tag> = match category {
            None => sqlx::query_as("SELECT id, name FROM tags ORDER BY id").fetch_all(&self.pool).await?,
            Some(category) => sqlx::query_as(
                "SELECT DISTINCT t.id, t.name FROM tags t JOIN product_tags pt ON pt.tag_id = t.id \
                 JOIN products p ON p.id = pt.product_id WHERE p.subcategory_id = $1 ORDER BY t.id",
            ).bind(category).fetch_all(&self.pool).await?,
        };
        Ok(tags)
    }

    async fn product(&self, id: i64) -> Result<ProductDetail> {
        let p: Product = sqlx::query_as(
            "SELECT id, subcategory_id, price, count, created_at, title, description, full_description, free_delivery, rating \
             FROM products WHERE id = $1",
        ).bind(id).fetch_optional(&self.pool).await?.ok_or(ShopError::not_found("product", id))?;

        let images: Vec<Image> = sqlx::query_as(
            "SELECT i.src, i.alt FROM product_images pi JOIN images i ON i.id = pi.image_id WHERE pi.product_id = $1 ORDER BY i.id",
        ).bind(id).fetch_all(&self.pool).await?;
        let tags: Vec<Tag> = sqlx::query_as(
            "SELECT t.id, t.name FROM tags t JOIN product_tags pt ON pt.tag_id = t.id WHERE pt.product_id = $1 ORDER BY t.id",
        ).bind(id).fetch_all(&self.pool).await?;
        let specifications: Vec<Specification> = sqlx::query_as(
            "SELECT s.name, s.value FROM specifications s JOIN product_specifications ps ON ps.specification_id = s.id \
             WHERE ps.product_id = $1 ORDER BY s.id",
        ).bind(id).fetch_all(&self.pool).await?;
        let reviews: Vec<Review> = sqlx::query_as(
            "SELECT author, email, text, rate, created_at AS date FROM reviews WHERE product_id = $1 ORDER BY created_at, id",
        ).bind(id).fetch_all(&self.pool).await?;

        Ok(ProductDetail {
            id: p.id,
            category: p.subcategory_id,
            price: p.price,
            count: p.count,
            date: p.created_at,
            title: p.title,
            description: p.description,
            full_description: p.full_description,
            free_delivery: p.free_delivery,
            images,
            tags,
            reviews,
            specifications,
            rating: p.rating,
        })
    }

    async fn product_cards(&self, ids: &[i64]) -> Result<Vec<ProductCard>> {
        let rows: Vec<CardRow> = sqlx::query_as(&format!("SELECT {CARD_COLUMNS} FROM products p WHERE p.id = ANY($1) ORDER BY p.id"))
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn search(&self, query: &CatalogQuery) -> Result<CatalogPage<ProductCard>> {
        if query.is_empty_range() { return Ok(query.page.into_page(vec![], 0)); }
        let (total,): (i64,) = count_sql(query).build_query_as().fetch_one(&self.pool).await?;
        let rows: Vec<CardRow> = search_sql(query).build_query_as().fetch_all(&self.pool).await?;
        debug!(total, returned = rows.len(), "catalog search");
        let items = self.hydrate(rows).await?;
        Ok(query.page.into_page(items, total as u64))
    }

    async fn popular(&self, limit: i64) -> Result<Vec<ProductCard>> {
        let rows: Vec<CardRow> = sqlx::query_as(&format!("SELECT {CARD_COLUMNS} FROM products p ORDER BY p.rating DESC, p.id LIMIT $1"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn limited(&self, threshold: i32, limit: i64) -> Result<Vec<ProductCard>> {
        let rows: Vec<CardRow> = sqlx::query_as(&format!(
            "SELECT {CARD_COLUMNS} FROM products p WHERE p.count BETWEEN 1 AND $1 ORDER BY p.count, p.id LIMIT $2"
        ))
        .bind(threshold)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn banner_candidates(&self) -> Result<Vec<ProductCard>> {
        let rows: Vec<CardRow> = sqlx::query_as(&format!(
            "SELECT DISTINCT ON (s.category_id) {CARD_COLUMNS} FROM products p \
             JOIN subcategories s ON s.id = p.subcategory_id ORDER BY s.category_id, p.rating DESC, p.id"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn sales(&self, page: PageRequest) -> Result<CatalogPage<SaleCard>> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM product_sales").fetch_one(&self.pool).await?;
        let rows: Vec<SaleRow> = sqlx::query_as(
            "SELECT product_id, price, sale_price, date_from, date_to, title FROM product_sales ORDER BY product_id LIMIT $1 OFFSET $2",
        )
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        let ids: Vec<i64> = rows.iter().map(|r| r.product_id).collect();
        let images: Vec<OwnedImageRow> = sqlx::query_as(
            "SELECT psi.product_id AS owner_id, i.src, i.alt FROM product_sale_images psi \
             JOIN images i ON i.id = psi.image_id WHERE psi.product_id = ANY($1) ORDER BY i.id",
        ).bind(&ids[..]).fetch_all(&self.pool).await?;
        let mut images_by: HashMap<i64, Vec<Image>> = HashMap::new();
        for r in images { images_by.entry(r.owner_id).or_default().push(Image { src: r.src, alt: r.alt }); }

        let items = rows.into_iter().map(|r| SaleCard {
            id: r.product_id,
            price: r.price,
            sale_price: r.sale_price,
            date_from: r.date_from,
            date_to: r.date_to,
            title: r.title,
            images: images_by.remove(&r.product_id).unwrap_or_default(),
        }).collect();
        Ok(page.into_page(items, total as u64))
    }

    async fn create_sale(&self, product_id: i64, draft: SaleDraft) -> Result<ProductSale> {
        let mut tx = self.pool.begin().await?;
        let mut product = lock_product(&mut tx, product_id).await?;
        let existing: Option<(i64,)> = sqlx::query_as("SELECT product_id FROM product_sales WHERE product_id = $1")
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(ShopError::Conflict(format!("product {product_id} is already on sale")));
        }
        let image_rows: Vec<(i64, String, Option<String>)> = sqlx::query_as(
            "SELECT i.id, i.src, i.alt FROM product_images pi JOIN images i ON i.id = pi.image_id WHERE pi.product_id = $1 ORDER BY i.id",
        ).bind(product_id).fetch_all(&mut *tx).await?;
        let images = image_rows.iter().map(|(_, src, alt)| Image { src: src.clone(), alt: alt.clone() }).collect();

        let sale = product.start_sale(draft, images)?;
        sqlx::query(
            "INSERT INTO product_sales (product_id, price, sale_price, date_from, date_to, title) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(sale.product_id)
        .bind(sale.price)
        .bind(sale.sale_price)
        .bind(sale.date_from)
        .bind(sale.date_to)
        .bind(&sale.title)
        .execute(&mut *tx)
        .await
        .map_err(|e| if is_unique_violation(&e) { ShopError::Conflict(format!("product {product_id} is already on sale")) } else { e.into() })?;
        for (image_id, _, _) in &image_rows {
            sqlx::query("INSERT INTO product_sale_images (product_id, image_id) VALUES ($1, $2)")
                .bind(product_id)
                .bind(image_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("UPDATE products SET price = $2 WHERE id = $1")
            .bind(product_id)
            .bind(product.price)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(sale)
    }

    async fn add_review(&self, product_id: i64, review: NewReview) -> Result<ReviewOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut product = lock_product(&mut tx, product_id).await?;
        let rating = product.apply_review(review.rate)?;
        let saved: Review = sqlx::query_as(
            "INSERT INTO reviews (product_id, author, email, text, rate) VALUES ($1, $2, $3, $4, $5) \
             RETURNING author, email, text, rate, created_at AS date",
        )
        .bind(product_id)
        .bind(&review.author)
        .bind(&review.email)
        .bind(&review.text)
        .bind(i16::from(review.rate.value()))
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query("UPDATE products SET rating = $2 WHERE id = $1")
            .bind(product_id)
            .bind(rating)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(ReviewOutcome { review: saved, rating })
    }

    async fn stock_levels(&self, ids: &[i64]) -> Result<HashMap<i64, i32>> {
        let rows: Vec<(i64, i32)> = sqlx::query_as("SELECT id, count FROM products WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let (id,): (i64,) = sqlx::query_as("INSERT INTO users (username, password_hash) VALUES ($1, $2) RETURNING id")
            .bind(&user.username)
            .bind(user.password_hash.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ShopError::Conflict(format!("username '{}' is already taken", user.username))
                } else {
                    e.into()
                }
            })?;
        sqlx::query("INSERT INTO profiles (user_id, full_name) VALUES ($1, $2)")
            .bind(id)
            .bind(&user.full_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn user_by_name(&self, username: &str) -> Result<Option<UserAccount>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id, username, password_hash, is_staff FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(UserAccount::from))
    }

    async fn user(&self, id: i64) -> Result<UserAccount> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id, username, password_hash, is_staff FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(UserAccount::from).ok_or(ShopError::not_found("user", id))
    }

    async fn set_password(&self, user_id: i64, hash: PasswordHash) -> Result<()> {
        let done = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(hash.as_str())
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 { return Err(ShopError::not_found("user", user_id)); }
        Ok(())
    }

    async fn profile(&self, user_id: i64) -> Result<Profile> {
        let row: ProfileRow = sqlx::query_as(
            "SELECT p.full_name, p.email, p.phone, i.src, i.alt FROM profiles p LEFT JOIN images i ON i.id = p.avatar_id WHERE p.user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ShopError::not_found("profile", user_id))?;
        Ok(Profile { full_name: row.full_name, email: row.email, phone: row.phone, avatar: image(row.src, row.alt) })
    }

    async fn update_profile(&self, user_id: i64, update: ProfileUpdate) -> Result<Profile> {
        let done = sqlx::query(
            "UPDATE profiles SET full_name = COALESCE($2, full_name), email = COALESCE($3, email), phone = COALESCE($4, phone) \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(update.full_name)
        .bind(update.email)
        .bind(update.phone)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 { return Err(ShopError::not_found("profile", user_id)); }
        self.profile(user_id).await
    }

    async fn replace_avatar(&self, user_id: i64, avatar: Image) -> Result<Profile> {
        let mut tx = self.pool.begin().await?;
        let (image_id,): (i64,) = sqlx::query_as(
            "INSERT INTO images (src, alt) VALUES ($1, $2) ON CONFLICT (src) DO UPDATE SET alt = EXCLUDED.alt RETURNING id",
        )
        .bind(&avatar.src)
        .bind(&avatar.alt)
        .fetch_one(&mut *tx)
        .await?;
        let done = sqlx::query("UPDATE profiles SET avatar_id = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(image_id)
            .execute(&mut *tx)
            .await?;
        if done.rows_affected() == 0 { return Err(ShopError::not_found("profile", user_id)); }
        tx.commit().await?;
        self.profile(user_id).await
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn place_order(&self, mut order: Order) -> Result<Order> {
        let ids: Vec<i64> = order.lines.iter().map(|l| l.product_id).collect();
        let mut tx = self.pool.begin().await?;
        let known: Vec<(i64,)> = sqlx::query_as("SELECT id FROM products WHERE id = ANY($1)")
            .bind(&ids[..])
            .fetch_all(&mut *tx)
            .await?;
        if let Some(missing) = ids.iter().find(|id| !known.iter().any(|(k,)| k == *id)) {
            return Err(ShopError::not_found("product", *missing));
        }
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO orders (user_id, created_at, updated_at, delivery_type, payment_type, total_cost, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(order.user_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.delivery_type.as_str())
        .bind(order.payment_type.as_str())
        .bind(order.total_cost)
        .bind(order.status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        for line in &order.lines {
            sqlx::query("INSERT INTO order_products (order_id, product_id, price, count) VALUES ($1, $2, $3, $4)")
                .bind(id)
                .bind(line.product_id)
                .bind(line.price)
                .bind(line.count)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        order.id = id;
        Ok(order)
    }

    async fn order(&self, id: i64) -> Result<Order> {
        let row: OrderRow = sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ShopError::not_found("order", id))?;
        let mut orders = self.load_orders(vec![row]).await?;
        orders.pop().ok_or(ShopError::not_found("order", id))
    }

    async fn orders_for_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY id DESC"))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        self.load_orders(rows).await
    }

    async fn orders_by_ids(&self, ids: &[i64]) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ANY($1) ORDER BY id DESC"))
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        self.load_orders(rows).await
    }

    async fn confirm_order(&self, id: i64, confirmation: Confirmation) -> Result<ConfirmOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, id).await?;
        let stock = order.confirm(confirmation)?;
        for sync in &stock {
            sqlx::query("UPDATE products SET count = $2 WHERE id = $1")
                .bind(sync.product_id)
                .bind(sync.count)
                .execute(&mut *tx)
                .await?;
        }
        save_order_state(&mut tx, &order).await?;
        tx.commit().await?;
        Ok(ConfirmOutcome { order, stock })
    }

    async fn pay_order(&self, id: i64, card: &PaymentCard, today: NaiveDate) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, id).await?;
        order.pay(card, today)?;
        save_order_state(&mut tx, &order).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn assign_orders(&self, ids: &[i64], user_id: i64) -> Result<()> {
        if ids.is_empty() { return Ok(()); }
        sqlx::query("UPDATE orders SET user_id = $2 WHERE id = ANY($1) AND user_id IS NULL")
            .bind(ids)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
