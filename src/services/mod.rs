pub mod booking;
pub mod cleanup;
pub mod fares;
pub mod holds;
pub mod locks;
pub mod no_show;
pub mod notifier;
pub mod overbooking;
pub mod segments;
pub mod stops;
pub mod trips;

pub use booking::{BookingEngine, CreateTicket};
pub use cleanup::CleanupService;
pub use holds::HoldManager;
pub use no_show::NoShowService;
pub use notifier::QuickSaleNotifier;
pub use overbooking::OverbookingCoordinator;
pub use trips::TripService;
