//! Server assembly: the handler table, application data wiring and the startup/shutdown sequence.

use std::sync::Arc;

use std::time::Duration;

use actix_web::{
    http::{KeepAlive, Method},
    middleware::Logger,
    web::{self, ServiceConfig},
    App, HttpServer,
};
use log::*;
use tokio::signal;

use merchant_payment_engine::{
    events::{order_change_channel, OrderChangeListener},
    traits::MerchantDatabase,
    InstanceApi, InventoryApi, OrderQueryApi, SqliteDatabase, TipFlowApi,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    exchange::{
        api::{ExchangeClient, HttpExchangeClient},
        ExchangeCache,
    },
    instances::{InstanceRegistry, MerchantInstance},
    poll::WaitRegistry,
    routes,
};

/// Buffer of the order-change channel between the engine and the long-poll pump.
const EVENT_BUFFER: usize = 100;

/// A resource that also answers CORS preflight and turns method mismatches into JSON 405s. Wallets call us
/// cross-origin, so every endpoint gets an OPTIONS route.
fn resource(path: &str) -> actix_web::Resource {
    web::resource(path)
        .route(web::method(Method::OPTIONS).to(routes::cors_preflight))
        .default_service(web::to(routes::method_not_allowed))
}

/// The handler table for one instance: every endpoint that exists both at the root (for the `default` instance)
/// and under `/instances/{instance_id}`.
pub fn instance_tree<B: MerchantDatabase + 'static, C: ExchangeClient>(cfg: &mut ServiceConfig) {
    cfg.service(resource("/tips/{tip_id}").route(web::get().to(routes::tip_status::<B>)))
        .service(resource("/tips/{tip_id}/pickup").route(web::post().to(routes::tip_pickup::<B, C>)))
        .service(resource("/orders/{order_id}").route(web::get().to(routes::order_status::<B>)))
        .service(resource("/private/tips").route(web::post().to(routes::tip_authorize::<B>)))
        .service(resource("/private/tips/{tip_id}").route(web::get().to(routes::tip_status_private::<B>)))
        .service(
            resource("/private/orders")
                .route(web::get().to(routes::orders_list::<B>))
                .route(web::post().to(routes::order_create::<B>)),
        )
        .service(resource("/private/orders/{order_id}/paid").route(web::post().to(routes::order_mark_paid::<B>)))
        .service(resource("/private/orders/{order_id}/refund").route(web::post().to(routes::order_refund::<B>)))
        .service(resource("/private/products").route(web::post().to(routes::product_upsert::<B>)))
        .service(resource("/private/products/{product_id}/lock").route(web::post().to(routes::product_lock::<B>)));
}

/// The full route table. Application data (config, registries, APIs, exchange cache) is registered separately so
/// tests can wire in their own backends.
pub fn routing_table<B: MerchantDatabase + 'static, C: ExchangeClient>(cfg: &mut ServiceConfig) {
    cfg.service(resource("/").route(web::get().to(routes::index)))
        .service(resource("/health").route(web::get().to(routes::health)))
        .service(resource("/agpl").route(web::get().to(routes::agpl)))
        .service(resource("/config").route(web::get().to(routes::config_handler)))
        .service(
            resource("/private/instances")
                .route(web::get().to(routes::instances_list))
                .route(web::post().to(routes::instance_create::<B>)),
        )
        .service(resource("/private/instances/{instance_id}").route(web::get().to(routes::instance_get)))
        .service(web::scope("/instances/{instance_id}").configure(instance_tree::<B, C>))
        .configure(instance_tree::<B, C>);
}

/// Everything the application closure needs, pre-built so the `HttpServer` factory only clones.
pub struct AppContext<B: MerchantDatabase, C: ExchangeClient> {
    pub config: web::Data<ServerConfig>,
    pub registry: web::Data<InstanceRegistry>,
    pub waits: web::Data<WaitRegistry>,
    pub cache: web::Data<ExchangeCache<B, C>>,
    pub tip_api: web::Data<TipFlowApi<B>>,
    pub order_api: web::Data<OrderQueryApi<B>>,
    pub inventory_api: web::Data<InventoryApi<B>>,
    pub instance_api: web::Data<InstanceApi<B>>,
}

impl<B: MerchantDatabase, C: ExchangeClient> Clone for AppContext<B, C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            registry: self.registry.clone(),
            waits: self.waits.clone(),
            cache: self.cache.clone(),
            tip_api: self.tip_api.clone(),
            order_api: self.order_api.clone(),
            inventory_api: self.inventory_api.clone(),
            instance_api: self.instance_api.clone(),
        }
    }
}

pub fn register_app_data<B: MerchantDatabase + 'static, C: ExchangeClient>(
    cfg: &mut ServiceConfig,
    context: &AppContext<B, C>,
) {
    cfg.app_data(context.config.clone())
        .app_data(context.registry.clone())
        .app_data(context.waits.clone())
        .app_data(context.cache.clone())
        .app_data(context.tip_api.clone())
        .app_data(context.order_api.clone())
        .app_data(context.inventory_api.clone())
        .app_data(context.instance_api.clone());
}

/// Load persisted instances into the registry and make sure a `default` instance exists, creating one from the
/// configuration on first start.
pub async fn load_instances<B: MerchantDatabase>(
    config: &ServerConfig,
    api: &InstanceApi<B>,
    registry: &InstanceRegistry,
) -> Result<(), ServerError> {
    for row in api.fetch_instances(false).await? {
        match MerchantInstance::from_row(&row) {
            Ok(instance) => registry.add(Arc::new(instance))?,
            Err(e) => error!("💻️ Skipping instance '{}': {e}", row.id),
        }
    }
    if registry.lookup(None).is_err() {
        let defaults = &config.default_instance;
        let instance = MerchantInstance::create(
            "default",
            &defaults.name,
            &defaults.payto_uris,
            defaults.tip_exchange.clone(),
            defaults.tip_reserve_priv.clone(),
        )?;
        if !api.create_instance(&instance.to_row()).await? {
            return Err(ServerError::InitializeError("could not persist the default instance".to_string()));
        }
        info!("💻️ Created the default instance ({})", instance.merchant_pub_hex());
        registry.add(Arc::new(instance))?;
    }
    info!("💻️ Serving {} instance(s)", registry.len());
    Ok(())
}

/// Bring the server up and run it until it is shut down.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let shared_config = Arc::new(config.clone());

    let (publisher, listener) = order_change_channel(EVENT_BUFFER);
    let registry = Arc::new(InstanceRegistry::new());
    let waits = Arc::new(WaitRegistry::new());
    let cache = ExchangeCache::new(Arc::clone(&shared_config), db.clone(), HttpExchangeClient::new());

    let instance_api = InstanceApi::new(db.clone());
    load_instances(&config, &instance_api, &registry).await?;

    let context = AppContext {
        config: web::Data::new(config.clone()),
        registry: web::Data::from(Arc::clone(&registry)),
        waits: web::Data::from(Arc::clone(&waits)),
        cache: web::Data::new(cache),
        tip_api: web::Data::new(TipFlowApi::new(db.clone())),
        order_api: web::Data::new(OrderQueryApi::with_publisher(db.clone(), publisher)),
        inventory_api: web::Data::new(InventoryApi::new(db.clone())),
        instance_api: web::Data::new(instance_api),
    };

    start_event_pump(listener, Arc::clone(&registry), Arc::clone(&waits));
    let drain_waits = Arc::clone(&waits);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            drain_waits.drain();
        }
    });

    info!("💻️ Starting server on {}:{}", config.host, config.port);
    let srv = HttpServer::new(move || {
        let context = context.clone();
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("mps::access_log"))
            .configure(move |cfg| register_app_data(cfg, &context))
            .configure(routing_table::<SqliteDatabase, HttpExchangeClient>)
            .default_service(web::to(routes::not_found))
    })
    // Long polls can legitimately hold a connection for ten minutes.
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    srv.await?;
    waits.drain();
    info!("💻️ Server shut down");
    Ok(())
}

/// Forward committed order changes from the engine into the wait registry, in commit order.
pub fn start_event_pump(listener: OrderChangeListener, registry: Arc<InstanceRegistry>, waits: Arc<WaitRegistry>) {
    tokio::spawn(async move {
        listener
            .run(move |change| match registry.lookup(Some(&change.instance_id)) {
                Ok(instance) => waits.notify(&instance.merchant_pub.to_bytes(), &change),
                Err(_) => warn!("📬️ Dropping change for unknown instance '{}'", change.instance_id),
            })
            .await;
        debug!("📬️ Event pump stopped");
    });
}
