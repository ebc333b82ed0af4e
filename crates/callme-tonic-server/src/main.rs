#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use callme::{
    Allocator, PhoneNumber, Sender,
    message::{MemoryMessageStore, MessageStore, PgMessageStore},
    pool::{
        CachePool, ExistenceCache, MemoryCache, MemoryPhonebook, PgPhonebook, Phonebook,
        RedisCache, ResourcePool, SqlPool,
    },
    postgres::{self, DbConfig, PgPool},
};
use callme_tonic_core::{
    PhonebookLookup,
    proto::{
        FILE_DESCRIPTOR_SET, phone_book_service_server::PhoneBookServiceServer,
        sms_service_server::SmsServiceServer,
    },
};
use clap::Parser;
use futures::Stream;
use server::config::{
    CliArgs, MessageBackend, PhonebookBackend, PhonebookConfig, Role, SeedSpec, ServerConfig,
    SmsConfig,
};
use server::service::{phonebook::PhonebookService, sms::SmsService};
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)
                .with_context(|| format!("failed to bind unix socket {uds_path}"))?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(providers, incoming, config).await;
            // A panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path)
            .await
            .with_context(|| format!("failed to bind {tcp_path}"))?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(providers, incoming, config).await
    }
}

async fn run_server_with_incoming<I, IO, IE>(
    providers: TelemetryProviders,
    incoming: I,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    let shutdown = CancellationToken::new();

    let (phonebook, sms) = match config.role {
        Role::Phonebook(phonebook) => {
            let service = build_phonebook(phonebook).await?;
            health_reporter
                .set_serving::<PhoneBookServiceServer<PhonebookService>>()
                .await;
            (Some(compressed_phonebook(service)), None)
        }
        Role::Sms(sms) => {
            let service = build_sms(sms, shutdown.clone()).await?;
            health_reporter
                .set_serving::<SmsServiceServer<SmsService>>()
                .await;
            (None, Some(compressed_sms(service)))
        }
    };

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_optional_service(phonebook)
        .add_optional_service(sms)
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(shutdown, health_reporter, providers),
        )
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn db_config(max_connections: u32) -> DbConfig {
    DbConfig {
        max_connections,
        ..DbConfig::default()
    }
}

async fn connect_postgres(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let db = postgres::connect(database_url, &db_config(max_connections)).await?;
    postgres::ensure_schema(&db).await?;
    Ok(db)
}

async fn build_phonebook(config: PhonebookConfig) -> anyhow::Result<PhonebookService> {
    let (pool, phonebook, cache): (
        Arc<dyn ResourcePool>,
        Arc<dyn Phonebook>,
        Option<Arc<dyn ExistenceCache>>,
    ) = match config.backend {
        PhonebookBackend::Cache {
            redis_url,
            database_url,
        } => {
            let redis = RedisCache::connect(&redis_url).await?;
            let db = connect_postgres(&database_url, config.db_max_connections).await?;
            let phonebook: Arc<dyn Phonebook> = Arc::new(PgPhonebook::new(db));
            let pool: Arc<dyn ResourcePool> =
                Arc::new(CachePool::new(redis.clone(), Arc::clone(&phonebook)));
            let cache: Arc<dyn ExistenceCache> = Arc::new(redis);
            (pool, phonebook, Some(cache))
        }
        PhonebookBackend::Transactional { database_url } => {
            let db = connect_postgres(&database_url, config.db_max_connections).await?;
            let pool: Arc<dyn ResourcePool> = Arc::new(SqlPool::new(db.clone()));
            let phonebook: Arc<dyn Phonebook> = Arc::new(PgPhonebook::new(db));
            (pool, phonebook, None)
        }
        PhonebookBackend::Memory => {
            tracing::warn!("memory pool strategy: state is lost on restart");
            let cache = MemoryCache::new();
            let phonebook: Arc<dyn Phonebook> = Arc::new(MemoryPhonebook::new());
            let pool: Arc<dyn ResourcePool> =
                Arc::new(CachePool::new(cache.clone(), Arc::clone(&phonebook)));
            let cache: Arc<dyn ExistenceCache> = Arc::new(cache);
            (pool, phonebook, Some(cache))
        }
    };

    for spec in &config.seed {
        seed(pool.as_ref(), spec).await?;
    }

    let allocator = Allocator::new(pool, phonebook, config.allocator);
    let allocator = match cache {
        Some(cache) => allocator.with_cache(cache),
        None => allocator,
    };
    Ok(PhonebookService::new(allocator))
}

/// Adds `+1<area><0000..count>` to the pool. Numbers already known are kept.
async fn seed(pool: &dyn ResourcePool, spec: &SeedSpec) -> anyhow::Result<()> {
    let numbers = (0..spec.count)
        .map(|i| PhoneNumber::parse(format!("+1{}{i:07}", spec.area_code)))
        .collect::<callme::Result<Vec<_>>>()?;
    let added = pool.seed(spec.area_code, &numbers).await?;
    tracing::info!(area_code = %spec.area_code, added, requested = spec.count, "seeded pool");
    Ok(())
}

async fn build_sms(config: SmsConfig, shutdown: CancellationToken) -> anyhow::Result<SmsService> {
    let store: Arc<dyn MessageStore> = match config.backend {
        MessageBackend::Postgres { database_url } => {
            let db = connect_postgres(&database_url, config.db_max_connections).await?;
            Arc::new(PgMessageStore::new(db))
        }
        MessageBackend::Memory => {
            tracing::warn!("memory message store: idempotency is lost on restart");
            Arc::new(MemoryMessageStore::new())
        }
    };
    let lookup = PhonebookLookup::connect_lazy(config.phonebook_url)?;
    let sender = Sender::new(store, Arc::new(lookup), config.sender);
    Ok(SmsService::new(sender, shutdown))
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    // Store URLs may carry credentials, so only the shape of the config is
    // logged.
    match &config.role {
        Role::Phonebook(phonebook) => {
            let strategy = match phonebook.backend {
                PhonebookBackend::Cache { .. } => "cache",
                PhonebookBackend::Transactional { .. } => "transactional",
                PhonebookBackend::Memory => "memory",
            };
            tracing::info!(
                "Starting {} service on {} with the {} strategy, batch size {}",
                config.role_name(),
                addr,
                strategy,
                phonebook.allocator.batch_size
            );
        }
        Role::Sms(sms) => {
            let store = match sms.backend {
                MessageBackend::Postgres { .. } => "postgres",
                MessageBackend::Memory => "memory",
            };
            tracing::info!(
                "Starting {} service on {} with the {} message store, send-many delay {:?}",
                config.role_name(),
                addr,
                store,
                sms.sender.send_many_delay
            );
        }
    }
}

fn compressed_phonebook(service: PhonebookService) -> PhoneBookServiceServer<PhonebookService> {
    PhoneBookServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

fn compressed_sms(service: SmsService) -> SmsServiceServer<SmsService> {
    SmsServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal(
    shutdown: CancellationToken,
    health_reporter: HealthReporter,
    providers: TelemetryProviders,
) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<PhoneBookServiceServer<PhonebookService>>()
        .await;
    health_reporter
        .set_not_serving::<SmsServiceServer<SmsService>>()
        .await;

    // 2. Stop in-flight batches; their unfinished sends release their keys
    shutdown.cancel();

    // 3. Flush telemetry
    providers.shutdown();
}
