use actix_web::{http::StatusCode, test};
use serde_json::{json, Value};

use crate::endpoint_tests::helpers::{body_code, init_app, test_context, StubExchange, DENOM_5, DENOM_HALF};

macro_rules! authorize_tip {
    ($app:expr, $amount:expr) => {{
        let req = test::TestRequest::post()
            .uri("/private/tips")
            .set_json(json!({
                "amount": $amount,
                "justification": "thanks for the review",
                "next_url": "https://shop.example/thanks",
                "extra": { "campaign": "reviews" },
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&$app, req).await;
        body["tip_id"].as_str().unwrap().to_string()
    }};
}

fn planchet(denom: &str, seed: u8) -> Value {
    json!({ "denom_pub_hash": denom, "coin_ev": base64::encode([seed, seed, 7]) })
}

#[actix_web::test]
async fn tips_can_be_authorized_and_inspected() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let tip_id = authorize_tip!(app, "EUR:20");

    let req = test::TestRequest::get().uri(&format!("/tips/{tip_id}")).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["amount"], "EUR:20");
    assert_eq!(body["amount_left"], "EUR:20");
    // The frontend's extra payload is echoed verbatim.
    assert_eq!(body["extra"], json!({ "campaign": "reviews" }));
    // The public view must not leak the justification.
    assert!(body.get("justification").is_none());

    let req = test::TestRequest::get().uri(&format!("/private/tips/{tip_id}")).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["justification"], "thanks for the review");
    assert_eq!(body["next_url"], "https://shop.example/thanks");
    assert_eq!(body["extra"], json!({ "campaign": "reviews" }));
    assert_eq!(body["picked_up"], "EUR:0");

    // Unknown tips are a 404.
    let req = test::TestRequest::get().uri("/tips/0000cafe").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1102);
}

#[actix_web::test]
async fn pickups_debit_once_per_planchet_set() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let tip_id = authorize_tip!(app, "EUR:20");
    let pickup = json!({ "planchets": [planchet(DENOM_5, 1), planchet(DENOM_HALF, 2)] });

    let req = test::TestRequest::post().uri(&format!("/tips/{tip_id}/pickup")).set_json(&pickup).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let sigs = body["blind_sigs"].as_array().unwrap();
    assert_eq!(sigs.len(), 2);
    // Blind signatures come back in planchet order.
    assert_eq!(sigs[0]["blind_sig"], format!("sig-over-{}", base64::encode([1u8, 1, 7])));
    assert_eq!(sigs[1]["blind_sig"], format!("sig-over-{}", base64::encode([2u8, 2, 7])));

    // 5 + 0.5 in coin value, plus 0.01 withdraw fee per coin.
    let req = test::TestRequest::get().uri(&format!("/private/tips/{tip_id}")).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["picked_up"], "EUR:5.52");

    // An identical retry succeeds without debiting again.
    let req = test::TestRequest::post().uri(&format!("/tips/{tip_id}/pickup")).set_json(&pickup).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let req = test::TestRequest::get().uri(&format!("/private/tips/{tip_id}")).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["picked_up"], "EUR:5.52");
}

#[actix_web::test]
async fn overdrawing_a_tip_is_rejected() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let tip_id = authorize_tip!(app, "EUR:5");
    let pickup = json!({ "planchets": [planchet(DENOM_5, 1), planchet(DENOM_5, 2)] });
    let req = test::TestRequest::post().uri(&format!("/tips/{tip_id}/pickup")).set_json(&pickup).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1201);
}

#[actix_web::test]
async fn oversized_planchet_lists_are_rejected_up_front() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let tip_id = authorize_tip!(app, "EUR:20");
    let planchets: Vec<Value> = (0..1025).map(|_| planchet(DENOM_HALF, 3)).collect();
    let req = test::TestRequest::post()
        .uri(&format!("/tips/{tip_id}/pickup"))
        .set_json(json!({ "planchets": planchets }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1203);
}

#[actix_web::test]
async fn unknown_denominations_are_reported_as_such() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let tip_id = authorize_tip!(app, "EUR:20");
    let bogus = "9".repeat(64);
    let req = test::TestRequest::post()
        .uri(&format!("/tips/{tip_id}/pickup"))
        .set_json(json!({ "planchets": [planchet(&bogus, 1)] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1402);
}

#[actix_web::test]
async fn an_exchange_without_denominations_cannot_serve_pickups() {
    let ctx = test_context(StubExchange::without_denoms()).await;
    let app = init_app!(ctx);
    let tip_id = authorize_tip!(app, "EUR:20");
    let req = test::TestRequest::post()
        .uri(&format!("/tips/{tip_id}/pickup"))
        .set_json(json!({ "planchets": [planchet(DENOM_5, 1)] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1401);
}

#[actix_web::test]
async fn an_unreachable_exchange_fails_the_pickup() {
    let ctx = test_context(StubExchange::down()).await;
    let app = init_app!(ctx);
    let tip_id = authorize_tip!(app, "EUR:20");
    let req = test::TestRequest::post()
        .uri(&format!("/tips/{tip_id}/pickup"))
        .set_json(json!({ "planchets": [planchet(DENOM_5, 1)] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1400);
}
