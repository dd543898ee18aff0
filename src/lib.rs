pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;
use tracing::info;

use clock::{Clock, SystemClock};
use config::{BookingPolicy, Config};
use services::locks::LockTable;
use services::notifier::{BroadcastSink, EventSink, LogSink, RedisSink};
use services::{
    fares::FareCalculator, BookingEngine, CleanupService, HoldManager, NoShowService, OverbookingCoordinator,
    QuickSaleNotifier, TripService,
};
use store::{BookingStore, InMemoryStore};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub policy: BookingPolicy,
    pub store: Arc<dyn BookingStore>,
    pub db: Option<database::Database>,
    pub bookings: BookingEngine,
    pub holds: HoldManager,
    pub trips: TripService,
    pub overbooking: OverbookingCoordinator,
    pub no_show: NoShowService,
    pub cleanup: CleanupService,
    /// Подписка на события quick-sale внутри процесса
    pub events: Arc<BroadcastSink>,
}

impl AppState {
    /// Подключает Postgres и Redis, если они заданы, и собирает сервисы.
    pub async fn new(config: &Config) -> anyhow::Result<Arc<Self>> {
        let mut db = None;
        let store: Arc<dyn BookingStore> = match &config.database.url {
            Some(url) => {
                let database = database::Database::connect(url, config.database.pool_size).await?;
                database.migrate().await?;
                let store = Arc::new(database.store());
                db = Some(database);
                store
            }
            None => {
                info!("DATABASE_URL is not set, using in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };

        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(LogSink)];
        if let Some(url) = &config.redis.url {
            let redis = redis_client::RedisClient::new(url).await?;
            sinks.push(Arc::new(RedisSink::new(
                redis,
                config.booking.quick_sale.redis_channel.clone(),
                config.redis.failure_threshold,
                config.redis.breaker_timeout_seconds,
            )));
        }

        let mut state = Self::assemble(store, Arc::new(SystemClock), config.booking.clone(), sinks);
        state.db = db;
        Ok(Arc::new(state))
    }

    /// Сборка сервисов поверх любого хранилища и часов; используется и в тестах.
    pub fn assemble(
        store: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
        extra_sinks: Vec<Arc<dyn EventSink>>,
    ) -> Self {
        let seat_locks = Arc::new(LockTable::new());
        let trip_locks = Arc::new(LockTable::new());

        let events = Arc::new(BroadcastSink::new(policy.quick_sale.broadcast_capacity));
        let mut sinks: Vec<Arc<dyn EventSink>> = vec![events.clone()];
        sinks.extend(extra_sinks);
        let notifier = QuickSaleNotifier::new(sinks, policy.quick_sale.clone(), clock.clone());

        let holds = HoldManager::new(
            store.clone(),
            seat_locks.clone(),
            notifier.clone(),
            clock.clone(),
            policy.holds.clone(),
        );
        let overbooking = OverbookingCoordinator::new(
            store.clone(),
            trip_locks.clone(),
            clock.clone(),
            policy.overbooking.clone(),
        );
        let bookings = BookingEngine::new(
            store.clone(),
            FareCalculator::new(store.clone(), policy.fares.clone()),
            overbooking.clone(),
            seat_locks.clone(),
            trip_locks.clone(),
            notifier,
            clock.clone(),
            policy.cancellation.clone(),
            policy.no_show.clone(),
        );
        let no_show = NoShowService::new(store.clone(), bookings.clone(), clock);
        let trips = TripService::new(store.clone(), holds.clone());
        let cleanup = CleanupService::new(
            holds.clone(),
            overbooking.clone(),
            no_show.clone(),
            seat_locks,
            trip_locks,
        );

        Self {
            policy,
            store,
            db: None,
            bookings,
            holds,
            trips,
            overbooking,
            no_show,
            cleanup,
            events,
        }
    }
}
