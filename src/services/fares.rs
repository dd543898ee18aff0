use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;

use crate::config::FarePolicy;
use crate::error::BookingResult;
use crate::models::{FareRule, Passenger, PassengerCategory};
use crate::store::BookingStore;

/// Итог расчёта цены билета
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub category: PassengerCategory,
    pub base_price: Decimal,
    pub discount: Decimal,
    pub final_price: Decimal,
}

/// Категория пассажира: ребёнок и пенсионер определяются по возрасту,
/// студент по флагу, всё остальное (включая неизвестный возраст) - взрослый.
pub fn passenger_category(age: Option<i32>, is_student: bool, policy: &FarePolicy) -> PassengerCategory {
    match age {
        Some(age) if age <= policy.child_max_age => PassengerCategory::Child,
        Some(age) if age >= policy.senior_min_age => PassengerCategory::Senior,
        _ if is_student => PassengerCategory::Student,
        _ => PassengerCategory::Adult,
    }
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Скидка в деньгах по таблице правила; без правила или категории в таблице - ноль.
pub fn discount(category: PassengerCategory, base_price: Decimal, rule: Option<&FareRule>) -> Decimal {
    let percent = rule
        .and_then(|r| r.discounts.get(&category).copied())
        .unwrap_or(Decimal::ZERO)
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
    money(base_price * percent / Decimal::ONE_HUNDRED)
}

/// `max(base - discount, 0)`
pub fn final_price(base_price: Decimal, discount: Decimal) -> Decimal {
    money((base_price - discount).max(Decimal::ZERO))
}

/// Множитель спроса `1 + occupancy² × (max - 1)`, occupancy ограничена [0, 1]
pub fn demand_multiplier(occupancy: f64, max_multiplier: f64) -> Decimal {
    let occupancy = occupancy.clamp(0.0, 1.0);
    let factor = 1.0 + occupancy * occupancy * (max_multiplier.max(1.0) - 1.0);
    Decimal::from_f64(factor).unwrap_or(Decimal::ONE)
}

#[derive(Clone)]
pub struct FareCalculator {
    store: Arc<dyn BookingStore>,
    policy: FarePolicy,
}

impl FareCalculator {
    pub fn new(store: Arc<dyn BookingStore>, policy: FarePolicy) -> Self {
        Self { store, policy }
    }

    pub fn category_of(&self, passenger: &Passenger) -> PassengerCategory {
        passenger_category(passenger.age, passenger.is_student, &self.policy)
    }

    /// Базовая цена сегмента: правило тарифа или цена по умолчанию
    pub async fn base_price(&self, route_id: i64, from_stop_id: i64, to_stop_id: i64) -> BookingResult<Decimal> {
        let rule = self.store.fare_rule(route_id, from_stop_id, to_stop_id).await?;
        Ok(rule.map(|r| r.base_price).unwrap_or(self.policy.default_base_price))
    }

    /// Полный расчёт для пассажира. `occupancy` учитывается только у правил с динамической ценой.
    pub async fn quote(
        &self,
        route_id: i64,
        from_stop_id: i64,
        to_stop_id: i64,
        passenger: &Passenger,
        occupancy: f64,
    ) -> BookingResult<PriceQuote> {
        let rule = self.store.fare_rule(route_id, from_stop_id, to_stop_id).await?;
        let category = self.category_of(passenger);

        let mut base_price = rule
            .as_ref()
            .map(|r| r.base_price)
            .unwrap_or(self.policy.default_base_price);
        if rule.as_ref().is_some_and(|r| r.dynamic_pricing) {
            base_price = money(base_price * demand_multiplier(occupancy, self.policy.dynamic_max_multiplier));
        }

        let discount = discount(category, base_price, rule.as_ref());
        Ok(PriceQuote {
            category,
            base_price,
            discount,
            final_price: final_price(base_price, discount),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BookingPolicy;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn policy() -> FarePolicy {
        BookingPolicy::default().fares
    }

    fn rule_with(discounts: &[(PassengerCategory, i64)]) -> FareRule {
        FareRule {
            id: 1,
            route_id: 1,
            from_stop_id: 10,
            to_stop_id: 11,
            base_price: Decimal::from(30000),
            discounts: discounts
                .iter()
                .map(|(c, p)| (*c, Decimal::from(*p)))
                .collect::<HashMap<_, _>>(),
            dynamic_pricing: false,
        }
    }

    #[test]
    fn categories_follow_age_then_student_flag() {
        let p = policy();
        assert_eq!(passenger_category(Some(12), false, &p), PassengerCategory::Child);
        assert_eq!(passenger_category(Some(13), false, &p), PassengerCategory::Adult);
        assert_eq!(passenger_category(Some(60), true, &p), PassengerCategory::Senior);
        assert_eq!(passenger_category(Some(21), true, &p), PassengerCategory::Student);
        assert_eq!(passenger_category(None, false, &p), PassengerCategory::Adult);
        assert_eq!(passenger_category(None, true, &p), PassengerCategory::Student);
    }

    #[test]
    fn discount_uses_rule_table() {
        let rule = rule_with(&[(PassengerCategory::Child, 50), (PassengerCategory::Senior, 30)]);
        let base = Decimal::from(30000);
        assert_eq!(discount(PassengerCategory::Child, base, Some(&rule)), Decimal::from(15000));
        assert_eq!(discount(PassengerCategory::Senior, base, Some(&rule)), Decimal::from(9000));
        assert_eq!(discount(PassengerCategory::Adult, base, Some(&rule)), Decimal::ZERO);
        assert_eq!(discount(PassengerCategory::Child, base, None), Decimal::ZERO);
    }

    #[test]
    fn price_never_goes_negative() {
        assert_eq!(final_price(Decimal::from(100), Decimal::from(250)), Decimal::ZERO);
    }

    #[test]
    fn demand_multiplier_grows_with_occupancy() {
        assert_eq!(demand_multiplier(0.0, 1.5), Decimal::ONE);
        assert!(demand_multiplier(0.5, 1.5) > Decimal::ONE);
        assert_eq!(demand_multiplier(1.0, 1.5), Decimal::from_f64(1.5).unwrap());
    }

    #[tokio::test]
    async fn quote_applies_rule_default_and_demand() {
        let store = Arc::new(crate::store::InMemoryStore::new());
        let mut dynamic = rule_with(&[(PassengerCategory::Child, 50)]);
        dynamic.dynamic_pricing = true;
        store.seed_fare_rule(dynamic).await;
        let calc = FareCalculator::new(store, policy());

        assert_eq!(calc.base_price(1, 10, 11).await.unwrap(), Decimal::from(30000));
        assert_eq!(calc.base_price(1, 10, 12).await.unwrap(), Decimal::from(50000));

        let child = Passenger {
            id: 1,
            full_name: "Aigerim".to_string(),
            age: Some(9),
            is_student: false,
        };
        let quiet = calc.quote(1, 10, 11, &child, 0.0).await.unwrap();
        assert_eq!(quiet.final_price, Decimal::from(15000));

        let full = calc.quote(1, 10, 11, &child, 1.0).await.unwrap();
        assert_eq!(full.category, PassengerCategory::Child);
        assert_eq!(full.base_price, Decimal::from(45000));
        assert_eq!(full.discount, Decimal::from(22500));
        assert_eq!(full.final_price, Decimal::from(22500));
    }

    proptest! {
        #[test]
        fn final_price_is_bounded(base in 0i64..1_000_000, pct in 0i64..=100) {
            let rule = rule_with(&[(PassengerCategory::Student, pct)]);
            let base = Decimal::from(base);
            let d = discount(PassengerCategory::Student, base, Some(&rule));
            let price = final_price(base, d);
            prop_assert!(price >= Decimal::ZERO);
            prop_assert!(price <= base);
            prop_assert_eq!(price, (base - d).max(Decimal::ZERO));
        }
    }
}
