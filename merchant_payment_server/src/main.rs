use log::*;
use merchant_payment_server::{config::ServerConfig, server::run_server};

#[actix_web::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let config = ServerConfig::from_env_or_default();
    if let Err(e) = run_server(config).await {
        error!("💻️ The server terminated with an error. {e}");
        std::process::exit(1);
    }
}
