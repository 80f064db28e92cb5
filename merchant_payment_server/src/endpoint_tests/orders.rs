use std::time::Duration;

use actix_web::{http::StatusCode, test};
use serde_json::{json, Value};

use crate::endpoint_tests::helpers::{body_code, init_app, test_context, StubExchange};

macro_rules! create_order {
    ($app:expr, $order_id:expr) => {{
        let req = test::TestRequest::post()
            .uri("/private/orders")
            .set_json(json!({ "order_id": $order_id, "summary": "a hat", "total": "EUR:20" }))
            .to_request();
        let resp = test::call_service(&$app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }};
}

#[actix_web::test]
async fn created_orders_carry_a_pay_uri_built_from_forwarded_headers() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::post()
        .uri("/private/orders")
        .insert_header(("X-Forwarded-Host", "merchant.example"))
        .insert_header(("X-Forwarded-Prefix", "/shop"))
        .insert_header(("X-Forwarded-Proto", "http"))
        .set_json(json!({ "order_id": "2024-021", "summary": "a hat", "total": "EUR:20" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["taler_pay_uri"], "taler://pay/merchant.example/shop/-/2024-021?insecure=1");
}

#[actix_web::test]
async fn order_polls_time_out_with_an_empty_list() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    create_order!(app, "A1");
    // A1 is unpaid, so a paid=yes poll has nothing to report and times out.
    let req = test::TestRequest::get().uri("/private/orders?paid=yes&timeout_ms=60").to_request();
    let start = std::time::Instant::now();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(start.elapsed() >= Duration::from_millis(60));
    assert_eq!(body["orders"], json!([]));
}

#[actix_web::test]
async fn order_polls_wake_on_the_first_matching_change() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    create_order!(app, "B1");
    let poll = async {
        let req = test::TestRequest::get().uri("/private/orders?paid=yes&timeout_ms=5000").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        body
    };
    let pay = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let req = test::TestRequest::post().uri("/private/orders/B1/paid").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    };
    let start = std::time::Instant::now();
    let (body, ()) = futures::join!(poll, pay);
    assert!(start.elapsed() < Duration::from_secs(5), "poll must wake before its timeout");
    let orders = body["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["order_id"], "B1");
    assert_eq!(orders[0]["paid"], true);
}

#[actix_web::test]
async fn payment_status_polls_honor_refund_thresholds() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    create_order!(app, "C1");
    let poll = async {
        let req = test::TestRequest::get().uri("/orders/C1?timeout_ms=5000&refund=EUR:10").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        body
    };
    let refund = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Paying does not satisfy a refund wait.
        let req = test::TestRequest::post().uri("/private/orders/C1/paid").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let req = test::TestRequest::post()
            .uri("/private/orders/C1/refund")
            .set_json(json!({ "refund": "EUR:12.5" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    };
    let (body, ()) = futures::join!(poll, refund);
    assert_eq!(body["refunded"], true);
}

#[actix_web::test]
async fn payment_status_for_unknown_orders_is_a_404() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::get().uri("/orders/ghost").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1104);
}

#[actix_web::test]
async fn product_locks_follow_stock() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::post()
        .uri("/private/products")
        .set_json(json!({ "product_id": "hat", "description": "a hat", "total_stock": 3 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    let lock = |uuid: &str, quantity: i64| {
        test::TestRequest::post()
            .uri("/private/products/hat/lock")
            .set_json(json!({ "lock_uuid": uuid, "quantity": quantity, "duration_ms": 60_000 }))
            .to_request()
    };
    assert_eq!(test::call_service(&app, lock("u1", 2)).await.status(), StatusCode::NO_CONTENT);
    let resp = test::call_service(&app, lock("u2", 2)).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1200);
    // Unknown product.
    let req = test::TestRequest::post()
        .uri("/private/products/ghost/lock")
        .set_json(json!({ "lock_uuid": "u3", "quantity": 1, "duration_ms": 1000 }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}
