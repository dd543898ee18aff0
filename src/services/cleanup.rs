use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::SweepPolicy;
use crate::services::holds::{HoldManager, HoldSweepStats};
use crate::services::locks::{LockTable, SeatKey};
use crate::services::no_show::NoShowService;
use crate::services::overbooking::OverbookingCoordinator;

/// Сводка полного прохода очистки
#[derive(Debug, Default, Clone)]
pub struct CleanupStats {
    pub holds: HoldSweepStats,
    pub overbooking_expired: usize,
    pub no_show_trips: usize,
    pub no_show_tickets: usize,
    pub pruned_locks: usize,
}

/// Фоновые проходы sweeper'ов поверх сервисов холдов, овербукинга и no-show.
/// Каждый проход - "найти кандидатов, сменить статус, уведомить".
#[derive(Clone)]
pub struct CleanupService {
    holds: HoldManager,
    overbooking: OverbookingCoordinator,
    no_show: NoShowService,
    seat_locks: Arc<LockTable<SeatKey>>,
    trip_locks: Arc<LockTable<i64>>,
}

impl CleanupService {
    pub fn new(
        holds: HoldManager,
        overbooking: OverbookingCoordinator,
        no_show: NoShowService,
        seat_locks: Arc<LockTable<SeatKey>>,
        trip_locks: Arc<LockTable<i64>>,
    ) -> Self {
        Self {
            holds,
            overbooking,
            no_show,
            seat_locks,
            trip_locks,
        }
    }

    /// Запускает все проходы по очереди
    pub async fn run_full_cleanup(&self) -> CleanupStats {
        info!("🧹 Starting full cleanup process");

        let holds = self.sweep_holds().await;
        let overbooking_expired = self.sweep_overbooking().await;
        let reports = self.no_show.process_upcoming_trips_no_show().await;

        let stats = CleanupStats {
            holds,
            overbooking_expired,
            no_show_trips: reports.len(),
            no_show_tickets: reports.iter().map(|r| r.processed).sum(),
            pruned_locks: self.prune_locks(),
        };

        info!("✅ Full cleanup process completed: {:?}", stats);
        stats
    }

    /// Истёкшие холды + очистка неиспользуемых записей таблиц блокировок
    pub async fn sweep_holds(&self) -> HoldSweepStats {
        let stats = self.holds.expire_old_holds().await;
        self.prune_locks();
        stats
    }

    pub async fn sweep_overbooking(&self) -> usize {
        let expired = self.overbooking.expire_pending_requests().await;
        if expired > 0 {
            info!("⌛ Expired {} stale overbooking requests", expired);
        }
        expired
    }

    fn prune_locks(&self) -> usize {
        self.seat_locks.prune() + self.trip_locks.prune() + self.holds.prune_locks()
    }

    /// Поднимает три независимых цикла со своей частотой
    pub fn spawn_sweepers(&self, policy: &SweepPolicy) -> Vec<JoinHandle<()>> {
        let holds = self.clone();
        let hold_every = Duration::from_secs(policy.hold_expiry_secs.max(1));
        let overbooking = self.clone();
        let overbooking_every = Duration::from_secs(policy.overbooking_secs.max(1));
        let no_show = self.no_show.clone();
        let no_show_every = Duration::from_secs(policy.no_show_secs.max(1));

        info!(
            "🧹 Sweepers started: holds every {:?}, overbooking every {:?}, no-show every {:?}",
            hold_every, overbooking_every, no_show_every
        );

        vec![
            tokio::spawn(async move {
                loop {
                    holds.sweep_holds().await;
                    tokio::time::sleep(hold_every).await;
                }
            }),
            tokio::spawn(async move {
                loop {
                    overbooking.sweep_overbooking().await;
                    tokio::time::sleep(overbooking_every).await;
                }
            }),
            tokio::spawn(async move {
                loop {
                    no_show.process_upcoming_trips_no_show().await;
                    tokio::time::sleep(no_show_every).await;
                }
            }),
        ]
    }
}
