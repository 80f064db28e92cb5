use actix_web::{http::StatusCode, test};
use serde_json::{json, Value};

use crate::endpoint_tests::helpers::{body_code, init_app, test_context, StubExchange};

#[actix_web::test]
async fn config_reports_currency_and_instances() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::get().uri("/config").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["currency"], "EUR");
    assert_eq!(body["version"], "0:0:0");
    let instances = body["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["id"], "default");
    assert_eq!(instances[0]["payment_targets"], json!(["x-taler-bank"]));
    assert_eq!(instances[0]["tip_exchange"], "https://exchange.test");
}

#[actix_web::test]
async fn agpl_redirects_to_the_license() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::get().uri("/agpl").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(resp.headers().get("Location").unwrap().to_str().unwrap().contains("agpl"));
}

#[actix_web::test]
async fn instances_can_be_created_and_resolved_by_path() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::post()
        .uri("/private/instances")
        .set_json(json!({
            "id": "tenant42",
            "name": "Tenant 42",
            "payto_uris": ["payto://iban/DE89370400440532013000"],
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // It turns up in the privileged instance view.
    let req = test::TestRequest::get().uri("/private/instances/tenant42").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["name"], "Tenant 42");
    assert_eq!(body["payment_targets"], json!(["iban"]));

    // The new instance answers under its path prefix.
    let req = test::TestRequest::get().uri("/instances/tenant42/private/orders").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["orders"], json!([]));

    // Requests without a prefix address the default instance.
    let req = test::TestRequest::get().uri("/private/orders").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // An unknown instance is a 404 with the instance-unknown code.
    let req = test::TestRequest::get().uri("/instances/ghost/private/orders").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1100);
}

#[actix_web::test]
async fn duplicate_instance_ids_are_rejected() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let create = || {
        test::TestRequest::post()
            .uri("/private/instances")
            .set_json(json!({ "id": "twin", "name": "Twin", "payto_uris": [] }))
            .to_request()
    };
    let resp = test::call_service(&app, create()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = test::call_service(&app, create()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1101);
}

#[actix_web::test]
async fn wrong_methods_return_json_405s() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::delete().uri("/config").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1003);
}

#[actix_web::test]
async fn unknown_endpoints_return_json_404s() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::get().uri("/no/such/endpoint").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body_code(&body), 1002);
}

#[actix_web::test]
async fn options_preflight_is_answered_for_any_path() {
    let ctx = test_context(StubExchange::up()).await;
    let app = init_app!(ctx);
    let req = test::TestRequest::with_uri("/tips/abcd/pickup")
        .method(actix_web::http::Method::OPTIONS)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.headers().get("Access-Control-Allow-Origin").unwrap(), "*");
}
