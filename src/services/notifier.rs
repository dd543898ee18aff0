//! Уведомления quick-sale: сегмент места снова свободен и его можно продать.
//!
//! Событие публикуется только после фиксации смены статуса, доставка идёт в отдельной
//! задаче tokio. Ошибка любого приёмника пишется в лог и ничего не откатывает.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use failsafe::futures::CircuitBreaker as _;
use failsafe::{backoff, failure_policy, StateMachine};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::QuickSalePolicy;
use crate::models::{Trip, TripStatus};
use crate::redis_client::RedisClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseReason {
    HoldExpired,
    HoldReleased,
    Cancelled,
    NoShow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAvailable {
    pub trip_id: i64,
    pub seat_number: String,
    pub from_stop_id: i64,
    pub to_stop_id: i64,
    pub reason: ReleaseReason,
    pub released_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, event: &SegmentAvailable) -> anyhow::Result<()>;
}

/// Подписчики внутри процесса
pub struct BroadcastSink {
    tx: broadcast::Sender<SegmentAvailable>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SegmentAvailable> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn publish(&self, event: &SegmentAvailable) -> anyhow::Result<()> {
        // Нет подписчиков - не ошибка
        if self.tx.receiver_count() > 0 {
            self.tx.send(event.clone())?;
        }
        Ok(())
    }
}

type RedisBreaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::Constant>, ()>;

/// PUBLISH в Redis-канал через circuit breaker: после серии ошибок подряд
/// публикация пропускается, пока не пройдёт таймаут.
pub struct RedisSink {
    redis: RedisClient,
    channel: String,
    breaker: RedisBreaker,
}

impl RedisSink {
    pub fn new(redis: RedisClient, channel: String, failure_threshold: u32, timeout_seconds: u64) -> Self {
        let policy = failure_policy::consecutive_failures(
            failure_threshold.max(1),
            backoff::constant(std::time::Duration::from_secs(timeout_seconds)),
        );
        let breaker = failsafe::Config::new().failure_policy(policy).build();
        Self {
            redis,
            channel,
            breaker,
        }
    }
}

#[async_trait]
impl EventSink for RedisSink {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, event: &SegmentAvailable) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.redis.conn.clone();
        let channel = self.channel.clone();

        let publish = async move {
            let receivers: i64 = conn.publish(channel, payload).await?;
            Ok::<_, redis::RedisError>(receivers)
        };

        match self.breaker.call(publish).await {
            Ok(receivers) => {
                debug!("📣 Published quick-sale event to {} receivers", receivers);
                Ok(())
            }
            Err(failsafe::Error::Rejected) => {
                warn!("Circuit breaker is OPEN - skipping Redis publish");
                Err(anyhow::anyhow!("redis circuit breaker is open"))
            }
            Err(failsafe::Error::Inner(e)) => Err(e.into()),
        }
    }
}

/// Пишет события в лог; полезен, когда Redis не настроен
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, event: &SegmentAvailable) -> anyhow::Result<()> {
        info!(
            "🔔 Segment available: trip={} seat={} stops {}→{} ({:?})",
            event.trip_id, event.seat_number, event.from_stop_id, event.to_stop_id, event.reason
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct QuickSaleNotifier {
    sinks: Arc<Vec<Arc<dyn EventSink>>>,
    policy: QuickSalePolicy,
    clock: Arc<dyn Clock>,
}

impl QuickSaleNotifier {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>, policy: QuickSalePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            sinks: Arc::new(sinks),
            policy,
            clock,
        }
    }

    /// Холды и отмены интересны только в окне перед отправлением;
    /// no-show освобождает место на ходу, поэтому уведомляем всегда, пока рейс не прибыл.
    pub fn should_notify(&self, trip: &Trip, reason: ReleaseReason) -> bool {
        let now = self.clock.now();
        match reason {
            ReleaseReason::NoShow => trip.status != TripStatus::Arrived,
            _ => {
                trip.status.is_bookable()
                    && now < trip.departure_at
                    && trip.departure_at - now <= Duration::hours(self.policy.window_hours)
            }
        }
    }

    /// Проверяет окно и отправляет событие в фоне. Вызывать только после коммита.
    pub fn segment_released(
        &self,
        trip: &Trip,
        seat_number: &str,
        from_stop_id: i64,
        to_stop_id: i64,
        reason: ReleaseReason,
    ) -> bool {
        if !self.should_notify(trip, reason) {
            return false;
        }
        self.dispatch(SegmentAvailable {
            trip_id: trip.id,
            seat_number: seat_number.to_string(),
            from_stop_id,
            to_stop_id,
            reason,
            released_at: self.clock.now(),
        });
        true
    }

    pub fn dispatch(&self, event: SegmentAvailable) {
        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            for sink in sinks.iter() {
                if let Err(e) = sink.publish(&event).await {
                    error!(
                        "Failed to deliver quick-sale event for trip {} seat {} via {}: {:?}",
                        event.trip_id,
                        event.seat_number,
                        sink.name(),
                        e
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::BookingPolicy;
    use chrono::TimeZone;

    fn trip_departing(at: DateTime<Utc>, status: TripStatus) -> Trip {
        Trip {
            id: 7,
            route_id: 1,
            bus_id: 1,
            date: at.date_naive(),
            departure_at: at,
            arrival_at: None,
            status,
        }
    }

    fn notifier(clock: ManualClock, sink: Arc<BroadcastSink>) -> QuickSaleNotifier {
        QuickSaleNotifier::new(vec![sink as Arc<dyn EventSink>], BookingPolicy::default().quick_sale, Arc::new(clock))
    }

    #[test]
    fn window_applies_to_holds_but_not_no_shows() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let n = notifier(ManualClock::new(now), Arc::new(BroadcastSink::new(8)));

        let soon = trip_departing(now + Duration::hours(3), TripStatus::Scheduled);
        let later = trip_departing(now + Duration::hours(30), TripStatus::Scheduled);
        let gone = trip_departing(now - Duration::hours(1), TripStatus::Departed);

        assert!(n.should_notify(&soon, ReleaseReason::HoldExpired));
        assert!(!n.should_notify(&later, ReleaseReason::Cancelled));
        assert!(!n.should_notify(&gone, ReleaseReason::HoldReleased));
        assert!(n.should_notify(&gone, ReleaseReason::NoShow));

        let arrived = trip_departing(now - Duration::hours(5), TripStatus::Arrived);
        assert!(!n.should_notify(&arrived, ReleaseReason::NoShow));
    }

    #[tokio::test]
    async fn broadcast_subscribers_receive_events() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let sink = Arc::new(BroadcastSink::new(8));
        let mut rx = sink.subscribe();
        let n = notifier(ManualClock::new(now), sink);

        let trip = trip_departing(now + Duration::hours(1), TripStatus::Boarding);
        assert!(n.segment_released(&trip, "2B", 10, 12, ReleaseReason::Cancelled));

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.trip_id, 7);
        assert_eq!(event.seat_number, "2B");
        assert_eq!(event.reason, ReleaseReason::Cancelled);
        assert_eq!(event.released_at, now);
    }
}
