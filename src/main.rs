use actix_web::{App, HttpServer, middleware::Logger, web};
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use chrono::Local;  // timestamp in log lines
use std::sync::Arc;

use gympass_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{PaymentProcessor, StripeService},
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::*,
    store::SeaOrmStore,
    swagger::swagger_config,
    utils::{Coordinate, Geofence, JwtService, QrTokenService},
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml().expect("Failed to load configuration file");

    // 创建数据库连接池
    let pool = create_pool(&config.database)
        .await
        .expect("Failed to create database connection pool");

    // 运行数据库迁移
    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let store = Arc::new(SeaOrmStore::new(pool));

    // 创建JWT服务
    let jwt_service = JwtService::new(&config.jwt.secret);
    let qr_service = QrTokenService::new(config.qr_signing_secret(), config.access.qr_token_ttl_secs);
    let geofence = Geofence::new(
        Coordinate {
            lat: config.access.facility_lat,
            lng: config.access.facility_lng,
        },
        config.access.max_distance_meters,
    );

    // 创建外部服务
    let stripe_service =
        StripeService::new(config.stripe.clone()).expect("Failed to create Stripe client");
    let processor: Arc<dyn PaymentProcessor> = Arc::new(stripe_service.clone());

    // 创建服务
    let entitlement_service = EntitlementService::new(store.clone());
    let subscription_service = SubscriptionService::new(
        store.clone(),
        processor.clone(),
        entitlement_service.clone(),
        config.membership.end_date_policy,
    );
    let cancellation_service = CancellationService::new(
        store.clone(),
        processor,
        subscription_service.clone(),
        config.membership.grace_period_policy,
    );
    let access_service = AccessService::new(
        entitlement_service.clone(),
        store.clone(),
        geofence,
        qr_service,
    );
    let rate_limit_service = RateLimitService::new(store, config.rate_limit);
    rate_limit_service.purge_expired().await;

    // 启动HTTP服务器
    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    let allowed_origins = config.server.allowed_origins.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors(&allowed_origins))
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::Data::new(entitlement_service.clone()))
            .app_data(web::Data::new(subscription_service.clone()))
            .app_data(web::Data::new(cancellation_service.clone()))
            .app_data(web::Data::new(access_service.clone()))
            .app_data(web::Data::new(rate_limit_service.clone()))
            .app_data(web::Data::new(stripe_service.clone()))
            .configure(swagger_config)
            .configure(handlers::webhook_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::entitlement_config)
                    .configure(handlers::access_config)
                    .configure(handlers::membership_config)
                    .configure(handlers::admin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
