//! Request handlers.
//!
//! Handlers are generic over the database backend `B` and the exchange client `C`; the concrete types are picked
//! once, in [`crate::server`], where the handler table is assembled. Every handler that can serve a specific
//! instance also works under the `/instances/{instance_id}` prefix; without the prefix the `default` instance is
//! addressed.

use std::{sync::Arc, time::Duration};

use actix_web::{web, HttpRequest, HttpResponse};
use log::*;
use mpg_common::Amount;
use serde::Deserialize;

use merchant_payment_engine::{
    db_types::{NewOrder, NewTipAuthorization, OrderFilter, ProductLockOutcome, TipId},
    traits::MerchantDatabase,
    InstanceApi, InventoryApi, OrderQueryApi, TipFlowApi,
};

use crate::{
    config::ServerConfig,
    data_objects::{
        ConfigResponse, InstanceCreateRequest, InstanceInfo, InstanceListResponse, OrderCreatedResponse,
        OrderListResponse, OrderStatusResponse, PickupRequest, PrivateTipStatusResponse, ProductLockRequest,
        ProductUpsertRequest, TipAuthorizeResponse, TipStatusResponse,
    },
    errors::ServerError,
    exchange::{api::ExchangeClient, ExchangeCache},
    helpers::{correlation_id, pay_uri_for_request},
    instances::{InstanceRegistry, MerchantInstance},
    poll::{payment_trigger_key, WaitOutcome, WaitRegistry},
    tips,
};

/// Ceiling on client-requested long-poll timeouts.
const MAX_LONGPOLL: Duration = Duration::from_secs(10 * 60);

/// Protocol version triple announced in `/config`. This is the merchant API's own version, not the exchange
/// protocol generation the backend speaks.
const PROTOCOL_VERSION: &str = "0:0:0";

fn longpoll_timeout(timeout_ms: Option<u64>) -> Option<Duration> {
    match timeout_ms {
        None | Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms).min(MAX_LONGPOLL)),
    }
}

/// The instance a request addresses: the `instance_id` path segment if present, else `default`.
fn instance_for(req: &HttpRequest, registry: &InstanceRegistry) -> Result<Arc<MerchantInstance>, ServerError> {
    registry.lookup(req.match_info().get("instance_id"))
}

/// Instance id for pay URIs; `None` addresses the default instance, which renders as `-`.
fn uri_instance(instance: &MerchantInstance) -> Option<&str> {
    (instance.id != "default").then_some(instance.id.as_str())
}

//--------------------------------------     Plumbing       ----------------------------------------------------------

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body("👍️\n")
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body(
        "Hello, I'm the merchant payment gateway. This HTTP server is not for humans; point a Taler wallet or a \
         merchant frontend at it.\n",
    )
}

/// The server is AGPL software; `/agpl` points clients at the license text.
pub async fn agpl() -> HttpResponse {
    HttpResponse::Found()
        .insert_header(("Location", "https://www.gnu.org/licenses/agpl-3.0.html"))
        .finish()
}

pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound()
        .json(serde_json::json!({ "code": crate::errors::ErrorCode::EndpointUnknown, "hint": "endpoint unknown" }))
}

/// The URL matched a resource, but not with this method.
pub async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().json(
        serde_json::json!({ "code": crate::errors::ErrorCode::MethodNotAllowed, "hint": "method not allowed" }),
    )
}

/// Catch-all CORS preflight handler. The API is same-origin-agnostic; wallets are free to call it from anywhere.
pub async fn cors_preflight() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header(("Access-Control-Allow-Origin", "*"))
        .insert_header(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .insert_header(("Access-Control-Allow-Headers", "Content-Type, Taler-Correlation-Id"))
        .finish()
}

pub async fn config_handler(
    config: web::Data<ServerConfig>,
    registry: web::Data<InstanceRegistry>,
) -> Result<HttpResponse, ServerError> {
    let instances = registry.all()?.iter().map(|i| InstanceInfo::from_instance(i)).collect();
    Ok(HttpResponse::Ok().json(ConfigResponse {
        currency: config.currency.clone(),
        version: PROTOCOL_VERSION.to_string(),
        instances,
    }))
}

//--------------------------------------     Instances       ---------------------------------------------------------

pub async fn instances_list(registry: web::Data<InstanceRegistry>) -> Result<HttpResponse, ServerError> {
    let instances = registry.all()?.iter().map(|i| InstanceInfo::from_instance(i)).collect();
    Ok(HttpResponse::Ok().json(InstanceListResponse { instances }))
}

pub async fn instance_get(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    Ok(HttpResponse::Ok().json(InstanceInfo::from_instance(&instance)))
}

pub async fn instance_create<B: MerchantDatabase>(
    api: web::Data<InstanceApi<B>>,
    registry: web::Data<InstanceRegistry>,
    body: web::Json<InstanceCreateRequest>,
) -> Result<HttpResponse, ServerError> {
    let body = body.into_inner();
    if body.id.is_empty() || !body.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ServerError::ParameterMalformed(format!("'{}' is not a valid instance id", body.id)));
    }
    let instance = MerchantInstance::create(
        &body.id,
        &body.name,
        &body.payto_uris,
        body.tip_exchange,
        body.tip_reserve_priv.map(Into::into),
    )?;
    if !api.create_instance(&instance.to_row()).await? {
        return Err(ServerError::InstanceIdExists(body.id));
    }
    let instance = Arc::new(instance);
    registry.add(Arc::clone(&instance))?;
    info!("💻️ Instance '{}' created", instance.id);
    Ok(HttpResponse::Ok().json(InstanceInfo::from_instance(&instance)))
}

//--------------------------------------     Tips       --------------------------------------------------------------

pub async fn tip_status<B: MerchantDatabase>(
    path: web::Path<TipId>,
    api: web::Data<TipFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let tip = api.tip_status(&path).await?;
    let amount_left = tip.amount_left()?;
    Ok(HttpResponse::Ok().json(TipStatusResponse::from_tip(&tip, amount_left)))
}

pub async fn tip_status_private<B: MerchantDatabase>(
    path: web::Path<TipId>,
    api: web::Data<TipFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let tip = api.tip_status(&path).await?;
    Ok(HttpResponse::Ok().json(PrivateTipStatusResponse {
        tip_id: tip.tip_id.clone(),
        exchange_url: tip.exchange_url.clone(),
        amount: tip.amount.clone(),
        picked_up: tip.picked_up.clone(),
        justification: tip.justification.clone(),
        next_url: tip.next_url.clone(),
        extra: crate::data_objects::parse_extra(&tip.extra),
        stamp_created: tip.created_at,
        stamp_expires: tip.expires_at,
    }))
}

pub async fn tip_authorize<B: MerchantDatabase>(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
    api: web::Data<TipFlowApi<B>>,
    body: web::Json<NewTipAuthorization>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    let exchange_url = instance
        .tip_exchange
        .clone()
        .ok_or_else(|| ServerError::TipReserveNotConfigured(instance.id.clone()))?;
    let reserve_priv = instance
        .tip_reserve_priv()
        .ok_or_else(|| ServerError::TipReserveNotConfigured(instance.id.clone()))?;
    let auth = api.authorize_tip(&instance.id, &body, reserve_priv.reveal(), &exchange_url).await?;
    info!("🎁️ Tip {} authorized over {} for '{}'", auth.tip_id, body.amount, instance.id);
    let taler_tip_uri = format!("taler://tip/{}/{}", exchange_url.trim_start_matches("https://"), auth.tip_id);
    Ok(HttpResponse::Ok().json(TipAuthorizeResponse {
        tip_id: auth.tip_id,
        tip_expiration: auth.expiration,
        taler_tip_uri,
    }))
}

pub async fn tip_pickup<B: MerchantDatabase, C: ExchangeClient>(
    req: HttpRequest,
    path: web::Path<TipId>,
    api: web::Data<TipFlowApi<B>>,
    cache: web::Data<ExchangeCache<B, C>>,
    body: web::Json<PickupRequest>,
) -> Result<HttpResponse, ServerError> {
    let tip_id = path.into_inner();
    let tip = api.tip_status(&tip_id).await?;
    let exchange = cache.find_exchange(&tip.exchange_url, None, false).await?;
    let correlation = correlation_id(&req);
    let response =
        tips::run_pickup(&api, &exchange, cache.client(), &tip, &tip_id, &body, correlation.as_deref()).await?;
    Ok(HttpResponse::Ok().json(response))
}

//--------------------------------------     Orders       ------------------------------------------------------------

pub async fn order_create<B: MerchantDatabase>(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
    config: web::Data<ServerConfig>,
    api: web::Data<OrderQueryApi<B>>,
    body: web::Json<NewOrder>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    if body.order_id.is_empty() {
        return Err(ServerError::ParameterMissing("order_id".to_string()));
    }
    let (summary, inserted) = api.insert_order(&instance.id, &body).await?;
    if inserted {
        info!("📝️ Order [{}] created for '{}'", summary.order_id, instance.id);
    }
    let taler_pay_uri =
        pay_uri_for_request(&req, config.use_forwarded_headers, uri_instance(&instance), &summary.order_id, None);
    Ok(HttpResponse::Ok().json(OrderCreatedResponse { order_id: summary.order_id, taler_pay_uri }))
}

pub async fn order_mark_paid<B: MerchantDatabase>(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
    path: web::Path<String>,
    api: web::Data<OrderQueryApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    let order_id = path.into_inner();
    if api.lookup_order(&instance.id, &order_id).await?.is_none() {
        return Err(ServerError::OrderUnknown(order_id));
    }
    let summary = api.mark_order_paid(&instance.id, &order_id).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub refund: Amount,
}

pub async fn order_refund<B: MerchantDatabase>(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
    path: web::Path<String>,
    api: web::Data<OrderQueryApi<B>>,
    body: web::Json<RefundRequest>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    let order_id = path.into_inner();
    if api.lookup_order(&instance.id, &order_id).await?.is_none() {
        return Err(ServerError::OrderUnknown(order_id));
    }
    let summary = api.mark_order_refunded(&instance.id, &order_id, &body.refund).await?;
    info!("📝️ Order [{}] refunded {} for '{}'", summary.order_id, body.refund, instance.id);
    Ok(HttpResponse::Ok().json(summary))
}

/// List orders, optionally long-polling for the next matching change when nothing matches yet.
pub async fn orders_list<B: MerchantDatabase>(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
    waits: web::Data<WaitRegistry>,
    api: web::Data<OrderQueryApi<B>>,
    query: web::Query<OrderFilter>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    let filter = query.into_inner();
    let orders = api.search_orders(&instance.id, &filter).await?;
    let Some(timeout) = longpoll_timeout(filter.timeout_ms) else {
        return Ok(HttpResponse::Ok().json(OrderListResponse { orders }));
    };
    if !orders.is_empty() {
        return Ok(HttpResponse::Ok().json(OrderListResponse { orders }));
    }
    // Register before the re-check so a change committed in between cannot be lost.
    let ticket = waits.register_order_poll(&instance.id, filter.clone());
    let orders = api.search_orders(&instance.id, &filter).await?;
    if !orders.is_empty() {
        return Ok(HttpResponse::Ok().json(OrderListResponse { orders }));
    }
    let orders = ticket.wait(timeout).await;
    Ok(HttpResponse::Ok().json(OrderListResponse { orders }))
}

#[derive(Debug, Deserialize)]
pub struct OrderStatusQuery {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Suspend until the order has been refunded more than this amount.
    #[serde(default)]
    pub refund: Option<Amount>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Public payment-status poll for one order. Without a timeout this is a plain lookup; with one, the request
/// suspends until the order is paid (or refunded above the given threshold) or the timeout expires.
pub async fn order_status<B: MerchantDatabase>(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
    config: web::Data<ServerConfig>,
    waits: web::Data<WaitRegistry>,
    api: web::Data<OrderQueryApi<B>>,
    path: web::Path<String>,
    query: web::Query<OrderStatusQuery>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    let order_id = path.into_inner();
    let query = query.into_inner();
    let respond = |paid: bool, refunded: bool| {
        let taler_pay_uri = pay_uri_for_request(
            &req,
            config.use_forwarded_headers,
            uri_instance(&instance),
            &order_id,
            query.session_id.as_deref(),
        );
        HttpResponse::Ok().json(OrderStatusResponse { order_id: order_id.clone(), paid, refunded, taler_pay_uri })
    };
    let summary = api
        .lookup_order(&instance.id, &order_id)
        .await?
        .ok_or_else(|| ServerError::OrderUnknown(order_id.clone()))?;
    let satisfied =
        |paid: bool, refunded: bool| if query.refund.is_some() { refunded } else { paid };
    if satisfied(summary.paid, summary.refunded) {
        return Ok(respond(summary.paid, summary.refunded));
    }
    let Some(timeout) = longpoll_timeout(query.timeout_ms) else {
        return Ok(respond(summary.paid, summary.refunded));
    };
    let key = payment_trigger_key(&instance.merchant_pub.to_bytes(), &order_id);
    let ticket = waits.register_payment(key, query.refund.clone());
    // Re-check after registration; the change may have been committed while we were reading it the first time.
    let summary = api
        .lookup_order(&instance.id, &order_id)
        .await?
        .ok_or_else(|| ServerError::OrderUnknown(order_id.clone()))?;
    if satisfied(summary.paid, summary.refunded) {
        return Ok(respond(summary.paid, summary.refunded));
    }
    // Whether notified, timed out or drained, respond with the state the database holds now.
    let outcome = ticket.wait(timeout).await;
    trace!("💻️ Payment poll for [{order_id}] resumed: {outcome:?}");
    let summary = api
        .lookup_order(&instance.id, &order_id)
        .await?
        .ok_or_else(|| ServerError::OrderUnknown(order_id.clone()))?;
    Ok(respond(summary.paid, summary.refunded))
}

//--------------------------------------     Products       ----------------------------------------------------------

pub async fn product_upsert<B: MerchantDatabase>(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
    api: web::Data<InventoryApi<B>>,
    body: web::Json<ProductUpsertRequest>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    if body.product_id.is_empty() {
        return Err(ServerError::ParameterMissing("product_id".to_string()));
    }
    if body.total_stock < 0 {
        return Err(ServerError::ParameterMalformed("total_stock must not be negative".to_string()));
    }
    api.upsert_product(&instance.id, &body.product_id, &body.description, body.total_stock).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn product_lock<B: MerchantDatabase>(
    req: HttpRequest,
    registry: web::Data<InstanceRegistry>,
    api: web::Data<InventoryApi<B>>,
    path: web::Path<String>,
    body: web::Json<ProductLockRequest>,
) -> Result<HttpResponse, ServerError> {
    let instance = instance_for(&req, &registry)?;
    let product_id = path.into_inner();
    if body.quantity <= 0 {
        return Err(ServerError::ParameterMalformed("quantity must be positive".to_string()));
    }
    let expires_at = chrono::Utc::now() + chrono::Duration::milliseconds(body.duration_ms as i64);
    let outcome = api.lock_product(&instance.id, &product_id, &body.lock_uuid, body.quantity, expires_at).await?;
    match outcome {
        ProductLockOutcome::Applied => Ok(HttpResponse::NoContent().finish()),
        ProductLockOutcome::UnknownProduct => Err(ServerError::ProductUnknown(product_id)),
        ProductLockOutcome::InsufficientStock => Err(ServerError::InsufficientStock(product_id)),
    }
}
