use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use super::{BookingStore, TicketTransition};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Bus, FareRule, HoldStatus, NewOverbookingRequest, NewSeatHold, NewTicket, OverbookingDecision,
    OverbookingRequest, OverbookingStatus, Passenger, Seat, SeatHold, Stop, Ticket, TicketStatus,
    Trip, TripStatus,
};

const TRIP_COLUMNS: &str = "id, route_id, bus_id, trip_date, departure_at, arrival_at, status";

const TICKET_COLUMNS: &str = "id, trip_id, seat_number, from_stop_id, to_stop_id, from_order, to_order, \
     passenger_id, passenger_category, price, discount, status, qr_code, overbooked, created_at, \
     cancelled_at, refund_amount, cancellation_policy, no_show_fee";

const HOLD_COLUMNS: &str = "id, trip_id, seat_number, from_stop_id, to_stop_id, from_order, to_order, \
     user_id, status, created_at, expires_at";

const OVERBOOKING_COLUMNS: &str = "id, trip_id, requested_by, status, occupancy_at_request, \
     approved_multiplier, created_at, decided_by, decided_at, reason";

/// Postgres-реализация хранилища. Запросы без compile-time макросов, статусы - TEXT.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse<T: FromStr<Err = String>>(table: &'static str, value: &str) -> StoreResult<T> {
    value
        .parse()
        .map_err(|message| StoreError::Decode { table, message })
}

fn decode_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// Внутренние структуры строк; в доменные типы переводятся через TryFrom

#[derive(FromRow)]
struct TripRow {
    id: i64,
    route_id: i64,
    bus_id: i64,
    trip_date: NaiveDate,
    departure_at: DateTime<Utc>,
    arrival_at: Option<DateTime<Utc>>,
    status: String,
}

impl TryFrom<TripRow> for Trip {
    type Error = StoreError;

    fn try_from(row: TripRow) -> StoreResult<Self> {
        Ok(Trip {
            id: row.id,
            route_id: row.route_id,
            bus_id: row.bus_id,
            date: row.trip_date,
            departure_at: row.departure_at,
            arrival_at: row.arrival_at,
            status: parse("trips", &row.status)?,
        })
    }
}

#[derive(FromRow)]
struct StopRow {
    id: i64,
    route_id: i64,
    name: String,
    stop_order: i32,
}

#[derive(FromRow)]
struct FareRuleRow {
    id: i64,
    route_id: i64,
    from_stop_id: i64,
    to_stop_id: i64,
    base_price: Decimal,
    discounts: serde_json::Value,
    dynamic_pricing: bool,
}

impl TryFrom<FareRuleRow> for FareRule {
    type Error = StoreError;

    fn try_from(row: FareRuleRow) -> StoreResult<Self> {
        let discounts = serde_json::from_value(row.discounts).map_err(|e| StoreError::Decode {
            table: "fare_rules",
            message: e.to_string(),
        })?;
        Ok(FareRule {
            id: row.id,
            route_id: row.route_id,
            from_stop_id: row.from_stop_id,
            to_stop_id: row.to_stop_id,
            base_price: row.base_price,
            discounts,
            dynamic_pricing: row.dynamic_pricing,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: i64,
    trip_id: i64,
    seat_number: String,
    from_stop_id: i64,
    to_stop_id: i64,
    from_order: i32,
    to_order: i32,
    passenger_id: i64,
    passenger_category: String,
    price: Decimal,
    discount: Decimal,
    status: String,
    qr_code: String,
    overbooked: bool,
    created_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    refund_amount: Option<Decimal>,
    cancellation_policy: Option<String>,
    no_show_fee: Option<Decimal>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> StoreResult<Self> {
        let cancellation_policy = row
            .cancellation_policy
            .as_deref()
            .map(|p| parse("tickets", p))
            .transpose()?;
        Ok(Ticket {
            id: row.id,
            trip_id: row.trip_id,
            seat_number: row.seat_number,
            from_stop_id: row.from_stop_id,
            to_stop_id: row.to_stop_id,
            from_order: row.from_order,
            to_order: row.to_order,
            passenger_id: row.passenger_id,
            passenger_category: parse("tickets", &row.passenger_category)?,
            price: row.price,
            discount: row.discount,
            status: parse("tickets", &row.status)?,
            qr_code: row.qr_code,
            overbooked: row.overbooked,
            created_at: row.created_at,
            cancelled_at: row.cancelled_at,
            refund_amount: row.refund_amount,
            cancellation_policy,
            no_show_fee: row.no_show_fee,
        })
    }
}

#[derive(FromRow)]
struct HoldRow {
    id: i64,
    trip_id: i64,
    seat_number: String,
    from_stop_id: i64,
    to_stop_id: i64,
    from_order: i32,
    to_order: i32,
    user_id: i64,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<HoldRow> for SeatHold {
    type Error = StoreError;

    fn try_from(row: HoldRow) -> StoreResult<Self> {
        Ok(SeatHold {
            id: row.id,
            trip_id: row.trip_id,
            seat_number: row.seat_number,
            from_stop_id: row.from_stop_id,
            to_stop_id: row.to_stop_id,
            from_order: row.from_order,
            to_order: row.to_order,
            user_id: row.user_id,
            status: parse("seat_holds", &row.status)?,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(FromRow)]
struct OverbookingRow {
    id: i64,
    trip_id: i64,
    requested_by: i64,
    status: String,
    occupancy_at_request: f64,
    approved_multiplier: Option<f64>,
    created_at: DateTime<Utc>,
    decided_by: Option<i64>,
    decided_at: Option<DateTime<Utc>>,
    reason: Option<String>,
}

impl TryFrom<OverbookingRow> for OverbookingRequest {
    type Error = StoreError;

    fn try_from(row: OverbookingRow) -> StoreResult<Self> {
        Ok(OverbookingRequest {
            id: row.id,
            trip_id: row.trip_id,
            requested_by: row.requested_by,
            status: parse("overbooking_requests", &row.status)?,
            occupancy_at_request: row.occupancy_at_request,
            approved_multiplier: row.approved_multiplier,
            created_at: row.created_at,
            decided_by: row.decided_by,
            decided_at: row.decided_at,
            reason: row.reason,
        })
    }
}

async fn insert_ticket_with<'e, E>(executor: E, ticket: &NewTicket) -> StoreResult<Ticket>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: TicketRow = sqlx::query_as(&format!(
        "INSERT INTO tickets (trip_id, seat_number, from_stop_id, to_stop_id, from_order, to_order, \
         passenger_id, passenger_category, price, discount, status, qr_code, overbooked, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'SOLD', $11, $12, $13) \
         RETURNING {TICKET_COLUMNS}"
    ))
    .bind(ticket.trip_id)
    .bind(&ticket.seat_number)
    .bind(ticket.from_stop_id)
    .bind(ticket.to_stop_id)
    .bind(ticket.segment.from_order())
    .bind(ticket.segment.to_order())
    .bind(ticket.passenger_id)
    .bind(ticket.passenger_category.as_str())
    .bind(ticket.price)
    .bind(ticket.discount)
    .bind(&ticket.qr_code)
    .bind(ticket.overbooked)
    .bind(ticket.created_at)
    .fetch_one(executor)
    .await?;
    row.try_into()
}

#[async_trait]
impl BookingStore for PgStore {
    async fn trip(&self, id: i64) -> StoreResult<Option<Trip>> {
        let row: Option<TripRow> = sqlx::query_as(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Trip::try_from).transpose()
    }

    async fn update_trip_status(&self, id: i64, from: TripStatus, to: TripStatus) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE trips SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn trips_departing_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Trip>> {
        let rows: Vec<TripRow> = sqlx::query_as(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips \
             WHERE status IN ('SCHEDULED', 'BOARDING', 'DEPARTED') AND departure_at <= $1 \
             ORDER BY id"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn bus(&self, id: i64) -> StoreResult<Option<Bus>> {
        let row: Option<(i64, String, i32)> = sqlx::query_as("SELECT id, plate, capacity FROM buses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, plate, capacity)| Bus { id, plate, capacity }))
    }

    async fn bus_seats(&self, bus_id: i64) -> StoreResult<Vec<Seat>> {
        let rows: Vec<(i64, i64, String)> =
            sqlx::query_as("SELECT id, bus_id, number FROM seats WHERE bus_id = $1 ORDER BY id")
                .bind(bus_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, bus_id, number)| Seat { id, bus_id, number })
            .collect())
    }

    async fn route_stops(&self, route_id: i64) -> StoreResult<Vec<Stop>> {
        let rows: Vec<StopRow> = sqlx::query_as(
            "SELECT id, route_id, name, stop_order FROM stops WHERE route_id = $1 ORDER BY stop_order",
        )
        .bind(route_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Stop {
                id: r.id,
                route_id: r.route_id,
                name: r.name,
                order: r.stop_order,
            })
            .collect())
    }

    async fn passenger(&self, id: i64) -> StoreResult<Option<Passenger>> {
        let row: Option<(i64, String, Option<i32>, bool)> =
            sqlx::query_as("SELECT id, full_name, age, is_student FROM passengers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, full_name, age, is_student)| Passenger {
            id,
            full_name,
            age,
            is_student,
        }))
    }

    async fn fare_rule(&self, route_id: i64, from_stop_id: i64, to_stop_id: i64) -> StoreResult<Option<FareRule>> {
        let row: Option<FareRuleRow> = sqlx::query_as(
            "SELECT id, route_id, from_stop_id, to_stop_id, base_price, discounts, dynamic_pricing \
             FROM fare_rules WHERE route_id = $1 AND from_stop_id = $2 AND to_stop_id = $3",
        )
        .bind(route_id)
        .bind(from_stop_id)
        .bind(to_stop_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(FareRule::try_from).transpose()
    }

    async fn ticket(&self, id: i64) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn ticket_by_qr(&self, qr_code: &str) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE qr_code = $1"))
                .bind(qr_code)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn seat_tickets(&self, trip_id: i64, seat_number: &str, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE trip_id = $1 AND seat_number = $2 AND ($3::TEXT IS NULL OR status = $3) \
             ORDER BY id"
        ))
        .bind(trip_id)
        .bind(seat_number)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn trip_tickets(&self, trip_id: i64, status: Option<TicketStatus>) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE trip_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY id"
        ))
        .bind(trip_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn passenger_tickets(&self, passenger_id: i64) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE passenger_id = $1 ORDER BY id"))
                .bind(passenger_id)
                .fetch_all(&self.pool)
                .await?;
        decode_all(rows)
    }

    async fn count_tickets(&self, trip_id: i64, status: TicketStatus) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE trip_id = $1 AND status = $2")
            .bind(trip_id)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_ticket(&self, ticket: NewTicket) -> StoreResult<Ticket> {
        insert_ticket_with(&self.pool, &ticket).await
    }

    async fn transition_ticket(&self, id: i64, transition: &TicketTransition) -> StoreResult<Option<Ticket>> {
        // COALESCE: незаданные поля перехода не затирают уже записанные значения
        let row: Option<TicketRow> = sqlx::query_as(&format!(
            "UPDATE tickets SET status = $3, \
                 cancelled_at = COALESCE($4, cancelled_at), \
                 refund_amount = COALESCE($5, refund_amount), \
                 cancellation_policy = COALESCE($6, cancellation_policy), \
                 no_show_fee = COALESCE($7, no_show_fee) \
             WHERE id = $1 AND status = $2 \
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.cancelled_at)
        .bind(transition.refund_amount)
        .bind(transition.cancellation_policy.map(|p| p.as_str()))
        .bind(transition.no_show_fee)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn hold(&self, id: i64) -> StoreResult<Option<SeatHold>> {
        let row: Option<HoldRow> = sqlx::query_as(&format!("SELECT {HOLD_COLUMNS} FROM seat_holds WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SeatHold::try_from).transpose()
    }

    async fn seat_holds(&self, trip_id: i64, seat_number: &str, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
        let rows: Vec<HoldRow> = sqlx::query_as(&format!(
            "SELECT {HOLD_COLUMNS} FROM seat_holds \
             WHERE trip_id = $1 AND seat_number = $2 AND ($3::TEXT IS NULL OR status = $3) \
             ORDER BY id"
        ))
        .bind(trip_id)
        .bind(seat_number)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn trip_holds(&self, trip_id: i64, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
        let rows: Vec<HoldRow> = sqlx::query_as(&format!(
            "SELECT {HOLD_COLUMNS} FROM seat_holds \
             WHERE trip_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY id"
        ))
        .bind(trip_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn user_holds(&self, user_id: i64, status: Option<HoldStatus>) -> StoreResult<Vec<SeatHold>> {
        let rows: Vec<HoldRow> = sqlx::query_as(&format!(
            "SELECT {HOLD_COLUMNS} FROM seat_holds \
             WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY id"
        ))
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn insert_hold(&self, hold: NewSeatHold) -> StoreResult<SeatHold> {
        let row: HoldRow = sqlx::query_as(&format!(
            "INSERT INTO seat_holds (trip_id, seat_number, from_stop_id, to_stop_id, from_order, to_order, \
             user_id, status, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'HOLD', $8, $9) \
             RETURNING {HOLD_COLUMNS}"
        ))
        .bind(hold.trip_id)
        .bind(&hold.seat_number)
        .bind(hold.from_stop_id)
        .bind(hold.to_stop_id)
        .bind(hold.segment.from_order())
        .bind(hold.segment.to_order())
        .bind(hold.user_id)
        .bind(hold.created_at)
        .bind(hold.expires_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn update_hold_status(&self, id: i64, from: HoldStatus, to: HoldStatus) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE seat_holds SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn convert_hold(&self, hold_id: i64, ticket: NewTicket) -> StoreResult<Option<Ticket>> {
        let mut tx = self.pool.begin().await?;

        let converted = sqlx::query("UPDATE seat_holds SET status = 'CONVERTED' WHERE id = $1 AND status = 'HOLD'")
            .bind(hold_id)
            .execute(&mut *tx)
            .await?;
        if converted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let ticket = insert_ticket_with(&mut *tx, &ticket).await?;
        tx.commit().await?;
        Ok(Some(ticket))
    }

    async fn expired_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<SeatHold>> {
        let rows: Vec<HoldRow> = sqlx::query_as(&format!(
            "SELECT {HOLD_COLUMNS} FROM seat_holds WHERE status = 'HOLD' AND expires_at < $1 ORDER BY id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn overbooking_request(&self, id: i64) -> StoreResult<Option<OverbookingRequest>> {
        let row: Option<OverbookingRow> =
            sqlx::query_as(&format!("SELECT {OVERBOOKING_COLUMNS} FROM overbooking_requests WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(OverbookingRequest::try_from).transpose()
    }

    async fn overbooking_requests(
        &self,
        trip_id: Option<i64>,
        status: Option<OverbookingStatus>,
    ) -> StoreResult<Vec<OverbookingRequest>> {
        let rows: Vec<OverbookingRow> = sqlx::query_as(&format!(
            "SELECT {OVERBOOKING_COLUMNS} FROM overbooking_requests \
             WHERE ($1::BIGINT IS NULL OR trip_id = $1) AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY id"
        ))
        .bind(trip_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn insert_overbooking_request(&self, request: NewOverbookingRequest) -> StoreResult<OverbookingRequest> {
        let row: OverbookingRow = sqlx::query_as(&format!(
            "INSERT INTO overbooking_requests (trip_id, requested_by, status, occupancy_at_request, reason, created_at) \
             VALUES ($1, $2, 'PENDING', $3, $4, $5) \
             RETURNING {OVERBOOKING_COLUMNS}"
        ))
        .bind(request.trip_id)
        .bind(request.requested_by)
        .bind(request.occupancy_at_request)
        .bind(&request.reason)
        .bind(request.created_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn decide_overbooking_request(
        &self,
        id: i64,
        decision: &OverbookingDecision,
    ) -> StoreResult<Option<OverbookingRequest>> {
        let row: Option<OverbookingRow> = sqlx::query_as(&format!(
            "UPDATE overbooking_requests SET status = $2, decided_by = $3, decided_at = $4, \
                 approved_multiplier = $5, reason = COALESCE($6, reason) \
             WHERE id = $1 AND status = 'PENDING' \
             RETURNING {OVERBOOKING_COLUMNS}"
        ))
        .bind(id)
        .bind(decision.status.as_str())
        .bind(decision.decided_by)
        .bind(decision.decided_at)
        .bind(decision.approved_multiplier)
        .bind(&decision.reason)
        .fetch_optional(&self.pool)
        .await?;
        row.map(OverbookingRequest::try_from).transpose()
    }

    async fn pending_requests_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<OverbookingRequest>> {
        let rows: Vec<OverbookingRow> = sqlx::query_as(&format!(
            "SELECT {OVERBOOKING_COLUMNS} FROM overbooking_requests \
             WHERE status = 'PENDING' AND created_at < $1 ORDER BY id"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }
}
