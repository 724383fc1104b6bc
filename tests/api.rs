use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use furniture_store::{
    api::{router, AppState},
    catalog::Image,
    config::CatalogSettings,
    events::EventPublisher,
    media::MediaStorage,
    session::SessionStore,
    store::{memory::NewProduct, AccountStore, MemoryStore, Store},
};

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
    sessions: SessionStore,
    sofa: i64,
    chair: i64,
    lamp: i64,
    soft: i64,
}

fn product(subcategory_id: i64, title: &str, price: i64, count: i32, tags: Vec<i64>) -> NewProduct {
    NewProduct {
        subcategory_id,
        title: title.into(),
        description: format!("{title} description"),
        full_description: None,
        price: Decimal::from(price),
        count,
        free_delivery: price > 1000,
        rating: Decimal::new(40, 1),
        images: vec![Image { src: format!("images/{title}.png"), alt: Some(title.into()) }],
        tags,
        specifications: vec![],
    }
}

impl TestApp {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let category = store.add_category("Living room", None).await;
        let subcategory = store.add_subcategory(category, "Sofas", None).await;
        let soft = store.add_tag("soft").await;
        let sofa = store.add_product(product(subcategory, "Sofa", 1500, 5, vec![soft])).await;
        let chair = store.add_product(product(subcategory, "Chair", 300, 2, vec![])).await;
        let lamp = store.add_product(product(subcategory, "Lamp", 100, 0, vec![])).await;

        let dyn_store: Arc<dyn Store> = store.clone();
        let media = MediaStorage::new(std::env::temp_dir().join(format!("furniture-media-{}", uuid::Uuid::new_v4())));
        let state = AppState::new(dyn_store, EventPublisher::default(), media, CatalogSettings::default());
        let sessions = state.sessions.clone();
        Self { app: router(state), store, sessions, sofa, chair, lamp, soft }
    }

    /// Returns status, the session cookie if one was set, and the JSON body.
    async fn send(&self, method: Method, uri: &str, cookie: Option<&str>, body: Option<Value>) -> (StatusCode, Option<String>, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, cookie, json)
    }

    /// Sends with the cookie in `jar` and keeps whatever cookie the response sets; a cleared cookie empties the jar.
    async fn call(&self, jar: &mut Option<String>, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, cookie, json) = self.send(method, uri, jar.as_deref(), body).await;
        if let Some(cookie) = cookie {
            *jar = Some(cookie).filter(|c| !c.ends_with('='));
        }
        (status, json)
    }
}

fn ids(items: &Value) -> Vec<i64> {
    items.as_array().unwrap().iter().map(|i| i["id"].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn test_sessions_open_on_first_write() {
    let app = TestApp::new().await;
    let (status, cookie, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(cookie.is_none());
    for uri in ["/health", "/catalog", "/basket", "/orders"] {
        let (_, cookie, _) = app.send(Method::GET, uri, None, None).await;
        assert!(cookie.is_none(), "{uri} sets no cookie");
    }
    assert!(app.sessions.is_empty().await);

    let (status, cookie, _) = app.send(Method::POST, "/basket", None, Some(json!({ "id": app.sofa, "count": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    let cookie = cookie.unwrap();
    assert!(cookie.starts_with("sessionid="));
    assert_eq!(app.sessions.len().await, 1);

    let (_, again, basket) = app.send(Method::GET, "/basket", Some(&cookie), None).await;
    assert!(again.is_none());
    assert_eq!(ids(&basket), vec![app.sofa]);
}

#[tokio::test]
async fn test_catalog_filters_sorts_and_pages() {
    let app = TestApp::new().await;
    let (status, _, body) = app.send(Method::GET, "/catalog?filter%5Bavailable%5D=true&sort=price&sortType=inc", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["items"]), vec![app.chair, app.sofa]);
    assert_eq!(body["currentPage"], 1);
    assert_eq!(body["lastPage"], 1);

    let (_, _, body) = app.send(Method::GET, "/catalog?limit=1&currentPage=2", None, None).await;
    assert_eq!(ids(&body["items"]), vec![app.chair]);
    assert_eq!(body["lastPage"], 3);

    let uri = format!("/catalog?tags%5B%5D={}&tags%5B%5D={}&filter%5Bname%5D=SOF", app.soft, app.soft);
    let (_, _, body) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(ids(&body["items"]), vec![app.sofa]);

    let (_, _, body) = app.send(Method::GET, "/catalog?filter%5BminPrice%5D=500&filter%5BmaxPrice%5D=100", None, None).await;
    assert!(body["items"].as_array().unwrap().is_empty());
    assert_eq!(body["lastPage"], 0);

    let (status, _, _) = app.send(Method::GET, "/catalog?filter%5BminPrice%5D=cheap", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_basket_add_remove_and_stock_clamp() {
    let app = TestApp::new().await;
    let (status, cookie, _) = app.send(Method::POST, "/basket", None, Some(json!({ "id": app.sofa, "count": 3 }))).await;
    assert_eq!(status, StatusCode::OK);
    let cookie = cookie.unwrap();
    let cookie = Some(cookie.as_str());
    let (_, _, body) = app.send(Method::POST, "/basket", cookie, Some(json!({ "id": app.sofa, "count": 2 }))).await;
    assert_eq!(body[0]["count"], 5);

    let (_, _, body) = app.send(Method::POST, "/basket", cookie, Some(json!({ "id": app.sofa, "count": 4 }))).await;
    assert_eq!(body[0]["count"], 5, "view never exceeds stock");

    let (status, _, _) = app.send(Method::POST, "/basket", cookie, Some(json!({ "id": app.chair, "count": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = app.send(Method::POST, "/basket", cookie, Some(json!({ "id": 9999, "count": 1 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.send(Method::POST, "/basket", cookie, Some(json!({ "id": app.lamp, "count": 1 }))).await;
    let (_, _, body) = app.send(Method::GET, "/basket", cookie, None).await;
    assert_eq!(ids(&body), vec![app.sofa], "out of stock entries are dropped");

    let (_, _, body) = app.send(Method::DELETE, "/basket", cookie, Some(json!({ "id": app.sofa, "count": 5 }))).await;
    assert!(body.as_array().unwrap().is_empty());
    let (status, _, _) = app.send(Method::DELETE, "/basket", cookie, Some(json!({ "id": app.sofa, "count": 1 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, _, other) = app.send(Method::GET, "/basket", None, None).await;
    assert!(other.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_order_checkout_and_payment() {
    let app = TestApp::new().await;
    let (_, cookie, _) = app.send(Method::POST, "/basket", None, Some(json!({ "id": app.sofa, "count": 1 }))).await;
    let cookie = cookie.unwrap();
    let cookie = Some(cookie.as_str());

    let (status, _, body) = app.send(Method::POST, "/orders", cookie, Some(json!([{ "id": app.sofa, "price": 1500, "count": 1, "title": "Sofa" }]))).await;
    assert_eq!(status, StatusCode::OK);
    let order_id = body["orderId"].as_i64().unwrap();
    let (_, _, basket) = app.send(Method::GET, "/basket", cookie, None).await;
    assert!(basket.as_array().unwrap().is_empty());

    let uri = format!("/order/{order_id}");
    let (_, _, order) = app.send(Method::GET, &uri, cookie, None).await;
    assert_eq!(order["status"], "created");
    assert_eq!(order["totalCost"].as_f64(), Some(1500.0));
    assert_eq!(order["products"][0]["count"], 1);

    let (status, _, _) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "other sessions cannot see the order");

    let pay_uri = format!("/payment/{order_id}");
    let card = json!({ "number": "13", "name": "Ann", "month": "12", "year": "2099", "code": "123" });
    let (status, _, _) = app.send(Method::POST, &pay_uri, cookie, Some(card.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT, "created orders cannot be paid");

    let confirm = json!({
        "fullName": "Ann Smith", "email": "ann@example.com", "phone": "5550100", "city": "Moscow",
        "address": "Main st 1", "deliveryType": "express", "paymentType": "online",
        "products": [{ "id": app.sofa, "count": 4 }],
    });
    let (status, _, _) = app.send(Method::POST, &uri, cookie, Some(confirm.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, order) = app.send(Method::GET, &uri, cookie, None).await;
    assert_eq!(order["status"], "accepted");
    assert_eq!(order["totalCost"].as_f64(), Some(1800.0));
    assert_eq!(order["city"], "Moscow");

    let product_uri = format!("/product/{}", app.sofa);
    let (_, _, product) = app.send(Method::GET, &product_uri, None, None).await;
    assert_eq!(product["count"], 4);

    let mut again = confirm;
    again["products"] = json!([{ "id": app.sofa, "count": 1 }]);
    app.send(Method::POST, &uri, cookie, Some(again)).await;
    let (_, _, product) = app.send(Method::GET, &product_uri, None, None).await;
    assert_eq!(product["count"], 4, "second confirm leaves stock alone");
    let (_, _, order) = app.send(Method::GET, &uri, cookie, None).await;
    assert_eq!(order["totalCost"].as_f64(), Some(1800.0));

    let even = json!({ "number": "12", "month": "12", "year": "2099" });
    let (status, _, body) = app.send(Method::POST, &pay_uri, cookie, Some(even)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("payment rejected"));

    let (status, _, _) = app.send(Method::POST, &pay_uri, cookie, Some(card.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, order) = app.send(Method::GET, &uri, cookie, None).await;
    assert_eq!(order["status"], "paid");
    let (status, _, _) = app.send(Method::POST, &pay_uri, cookie, Some(card)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_empty_order_is_rejected() {
    let app = TestApp::new().await;
    let (status, _, _) = app.send(Method::POST, "/orders", None, Some(json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = app.send(Method::POST, "/orders", None, Some(json!([{ "id": 9999, "price": 1, "count": 1 }]))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_rejects_invalid_contact() {
    let app = TestApp::new().await;
    let (_, cookie, body) = app.send(Method::POST, "/orders", None, Some(json!([{ "id": app.chair, "price": 300, "count": 1 }]))).await;
    let cookie = cookie.unwrap();
    let cookie = Some(cookie.as_str());
    let uri = format!("/order/{}", body["orderId"].as_i64().unwrap());

    let bad = json!({ "fullName": "Ann", "email": "not-an-email", "phone": "9".repeat(200), "products": [{ "id": app.chair, "count": 1 }] });
    let (status, _, body) = app.send(Method::POST, &uri, cookie, Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid request"));
    let (status, _, _) = app.send(Method::POST, &uri, cookie, Some(json!({ "email": "ann@example.com", "phone": "9".repeat(21) }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, _, order) = app.send(Method::GET, &uri, cookie, None).await;
    assert_eq!(order["status"], "created");
    assert!(order["email"].is_null());
    let (_, _, product) = app.send(Method::GET, &format!("/product/{}", app.chair), None, None).await;
    assert_eq!(product["count"], 2);
}

#[tokio::test]
async fn test_sign_up_sign_in_and_profile() {
    let app = TestApp::new().await;
    let mut jar = None;
    app.call(&mut jar, Method::POST, "/basket", Some(json!({ "id": app.sofa, "count": 1 }))).await;
    let anonymous = jar.clone().unwrap();

    let (status, _) = app.call(&mut jar, Method::POST, "/auth/sign-up", Some(json!({ "name": "Ann", "username": "ann", "password": "short1" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.call(&mut jar, Method::POST, "/auth/sign-up", Some(json!({ "name": "Ann", "username": "ann", "password": "Str0ngPass" }))).await;
    assert_eq!(status, StatusCode::OK);
    let signed_in = jar.clone().unwrap();
    assert_ne!(signed_in, anonymous, "sign-up issues a new session id");

    let (status, _, _) = app.send(Method::GET, "/profile", Some(&anonymous), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (_, basket) = app.call(&mut jar, Method::GET, "/basket", None).await;
    assert_eq!(ids(&basket), vec![app.sofa], "the basket moves with the session");

    let (_, profile) = app.call(&mut jar, Method::GET, "/profile", None).await;
    assert_eq!(profile["fullName"], "Ann");
    let (status, profile) = app.call(&mut jar, Method::POST, "/profile", Some(json!({ "email": "ann@example.com", "phone": "5550100" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["email"], "ann@example.com");
    assert_eq!(profile["fullName"], "Ann");
    let (status, _) = app.call(&mut jar, Method::POST, "/profile", Some(json!({ "email": "not-an-email" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, profile) = app.call(&mut jar, Method::POST, "/profile/avatar", Some(json!({ "src": "images/ann.png", "alt": "Ann" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["avatar"]["src"], "images/ann.png");

    let (status, _) = app.call(&mut jar, Method::POST, "/profile/password", Some(json!({ "currentPassword": "Wrong0ne", "newPassword": "N3wPassword" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.call(&mut jar, Method::POST, "/profile/password", Some(json!({ "currentPassword": "Str0ngPass", "newPassword": "N3wPassword" }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call(&mut jar, Method::POST, "/auth/sign-out", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(jar.is_none(), "sign-out clears the cookie");
    let (status, _, _) = app.send(Method::GET, "/profile", Some(&signed_in), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.call(&mut jar, Method::POST, "/auth/sign-in", Some(json!({ "username": "ann", "password": "Str0ngPass" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.call(&mut jar, Method::POST, "/auth/sign-in", Some(json!({ "username": "ann", "password": "N3wPassword" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(jar.as_deref().is_some_and(|c| c != signed_in));
    let (status, _) = app.call(&mut jar, Method::GET, "/profile", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app.send(Method::POST, "/auth/sign-up", None, Some(json!({ "name": "Other", "username": "ann", "password": "Str0ngPass" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_anonymous_orders_follow_the_user() {
    let app = TestApp::new().await;
    let mut jar = None;
    let (_, body) = app.call(&mut jar, Method::POST, "/orders", Some(json!([{ "id": app.chair, "price": 300, "count": 2 }]))).await;
    let order_id = body["orderId"].as_i64().unwrap();

    let (_, orders) = app.call(&mut jar, Method::GET, "/orders", None).await;
    assert_eq!(ids(&orders), vec![order_id]);

    app.call(&mut jar, Method::POST, "/auth/sign-up", Some(json!({ "name": "Bob", "username": "bob", "password": "Str0ngPass" }))).await;
    app.call(&mut jar, Method::POST, "/auth/sign-out", None).await;
    let (_, orders) = app.call(&mut jar, Method::GET, "/orders", None).await;
    assert!(orders.as_array().unwrap().is_empty());

    app.call(&mut jar, Method::POST, "/auth/sign-in", Some(json!({ "username": "bob", "password": "Str0ngPass" }))).await;
    let (_, orders) = app.call(&mut jar, Method::GET, "/orders", None).await;
    assert_eq!(ids(&orders), vec![order_id]);
}

#[tokio::test]
async fn test_review_updates_rating() {
    let app = TestApp::new().await;
    let uri = format!("/product/{}/reviews", app.sofa);
    let review = json!({ "author": "Ann", "email": "ann@example.com", "text": "Comfy", "rate": 5 });
    let (status, _, body) = app.send(Method::POST, &uri, None, Some(review)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rate"], 5);

    let (_, _, product) = app.send(Method::GET, &format!("/product/{}", app.sofa), None, None).await;
    assert_eq!(product["rating"].as_f64(), Some(4.2));
    assert_eq!(product["reviews"].as_array().unwrap().len(), 1);

    let bad = json!({ "author": "Ann", "email": "ann@example.com", "rate": 6 });
    let (status, _, _) = app.send(Method::POST, &uri, None, Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = app.send(Method::POST, "/product/9999/reviews", None, Some(json!({ "author": "A", "email": "a@b.co", "rate": 3 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sales_are_staff_only() {
    let app = TestApp::new().await;
    let mut jar = None;
    let sale = json!({ "id": app.sofa, "salePrice": 1200, "dateFrom": "2026-10-01T00:00:00Z", "dateTo": "2026-10-31T00:00:00Z" });

    let (status, _) = app.call(&mut jar, Method::POST, "/sales", Some(sale.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(jar.is_none());
    app.call(&mut jar, Method::POST, "/auth/sign-up", Some(json!({ "name": "Boss", "username": "boss", "password": "Str0ngPass" }))).await;
    let (status, _) = app.call(&mut jar, Method::POST, "/sales", Some(sale.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let boss = app.store.user_by_name("boss").await.unwrap().unwrap();
    app.store.set_staff(boss.id, true).await.unwrap();
    let (status, body) = app.call(&mut jar, Method::POST, "/sales", Some(sale.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["price"].as_f64(), Some(1500.0));
    assert_eq!(body["dateFrom"], "10-01");
    let (status, _) = app.call(&mut jar, Method::POST, "/sales", Some(sale)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, _, page) = app.send(Method::GET, "/sales", None, None).await;
    assert_eq!(page["items"][0]["salePrice"].as_f64(), Some(1200.0));
    let (_, _, product) = app.send(Method::GET, &format!("/product/{}", app.sofa), None, None).await;
    assert_eq!(product["price"].as_f64(), Some(1200.0));
}

#[tokio::test]
async fn test_storefront_listings() {
    let app = TestApp::new().await;
    let (_, _, categories) = app.send(Method::GET, "/categories", None, None).await;
    assert_eq!(categories[0]["subcategories"][0]["title"], "Sofas");

    let (_, _, tags) = app.send(Method::GET, "/tags", None, None).await;
    assert_eq!(tags[0]["name"], "soft");

    let (_, _, limited) = app.send(Method::GET, "/products/limited", None, None).await;
    assert_eq!(ids(&limited), vec![app.chair, app.sofa]);

    let (_, _, popular) = app.send(Method::GET, "/products/popular", None, None).await;
    assert_eq!(popular.as_array().unwrap().len(), 3);

    let (_, _, banners) = app.send(Method::GET, "/banners", None, None).await;
    assert_eq!(banners.as_array().unwrap().len(), 1);
}
