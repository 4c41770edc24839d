//! Stay pricing. Pure: same inputs, same breakdown.

use crate::error::BookingError;
use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

fn round_cents(x: f64) -> Cents {
    x.round() as Cents
}

/// Price a stay of `span` at `villa`.
///
/// Rules are applied per night in ascending `priority`, ties broken by rule
/// id. Fixed adjustments add, percent adjustments multiply the running
/// nightly price. Each night is rounded to the cent and floored at zero
/// before summing, so `total` is an exact integer sum.
pub fn compute_price(
    villa: &Villa,
    span: DateSpan,
    guests: &GuestCounts,
    rules: &[PricingRule],
    tax_rate: f64,
) -> Result<PriceBreakdown, BookingError> {
    let nights = span.nights();
    if nights < 1 || nights > MAX_STAY_NIGHTS {
        return Err(BookingError::InvalidRange {
            start: span.start,
            end: span.end,
        });
    }
    if guests.occupancy() > villa.max_guests {
        return Err(BookingError::Validation(format!(
            "{} guests exceed villa capacity of {}",
            guests.occupancy(),
            villa.max_guests
        )));
    }
    check_min_stay(&span, nights, rules)?;

    let mut ordered: Vec<&PricingRule> = rules.iter().collect();
    ordered.sort_by_key(|r| (r.priority, r.id));

    let nightly: Vec<Cents> = span
        .dates()
        .map(|night| {
            let price = ordered
                .iter()
                .filter(|r| r.prices_night(night, nights))
                .fold(villa.base_price_per_night as f64, |price, r| {
                    (price + r.adjustment_fixed as f64) * (1.0 + r.adjustment_percent / 100.0)
                });
            round_cents(price).max(0)
        })
        .collect();

    let total_base: Cents = nightly.iter().sum();
    let base = total_base as f64;
    let total_fees = villa.cleaning_fee
        + round_cents(base * villa.service_fee_ratio)
        + round_cents(base * villa.damage_waiver_ratio);
    let total_taxes = round_cents(base * tax_rate);

    Ok(PriceBreakdown {
        nights: nights as u32,
        nightly,
        total_base,
        total_fees,
        total_taxes,
        total: total_base + total_fees + total_taxes,
    })
}

/// The strictest min-stay rule touching any night of the stay wins.
fn check_min_stay(span: &DateSpan, nights: i64, rules: &[PricingRule]) -> Result<(), BookingError> {
    let required = rules
        .iter()
        .filter(|r| r.rule_type == RuleType::MinStay)
        .filter(|r| span.dates().any(|d| r.covers(d)))
        .filter_map(|r| r.min_nights)
        .max();
    match required {
        Some(min_nights) if i64::from(min_nights) > nights => Err(BookingError::MinStayViolation {
            nights: nights as u32,
            min_nights,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use ulid::Ulid;

    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn span(a: &str, b: &str) -> DateSpan {
        DateSpan::new(d(a), d(b))
    }

    fn villa() -> Villa {
        Villa {
            id: Ulid::new(),
            host_user_id: Ulid::new(),
            published: true,
            base_price_per_night: 100_000,
            cleaning_fee: 20_000,
            service_fee_ratio: 0.10,
            damage_waiver_ratio: 0.035,
            max_guests: 8,
        }
    }

    fn two_adults() -> GuestCounts {
        GuestCounts {
            adults: 2,
            children: 0,
            infants: 0,
        }
    }

    fn rule(rule_type: RuleType, priority: u32) -> PricingRule {
        PricingRule {
            id: Ulid::new(),
            villa_id: Ulid::nil(),
            rule_type,
            start_date: None,
            end_date: None,
            adjustment_fixed: 0,
            adjustment_percent: 0.0,
            min_nights: None,
            priority,
        }
    }

    #[test]
    fn three_night_stay_without_rules() {
        let p = compute_price(&villa(), span("2026-01-10", "2026-01-13"), &two_adults(), &[], 0.10)
            .unwrap();
        assert_eq!(p.nights, 3);
        assert_eq!(p.nightly, vec![100_000; 3]);
        assert_eq!(p.total_base, 300_000);
        assert_eq!(p.total_fees, 60_500);
        assert_eq!(p.total_taxes, 30_000);
        assert_eq!(p.total, 390_500);
    }

    #[test]
    fn summer_min_stay_rejects_short_july_stay() {
        let min_stay = PricingRule {
            start_date: Some(d("2026-06-01")),
            end_date: Some(d("2026-08-31")),
            min_nights: Some(5),
            ..rule(RuleType::MinStay, 1)
        };
        let err = compute_price(
            &villa(),
            span("2026-07-10", "2026-07-12"),
            &two_adults(),
            &[min_stay.clone()],
            0.10,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BookingError::MinStayViolation {
                nights: 2,
                min_nights: 5
            }
        ));

        // Outside the season the rule doesn't apply, and it never moves the price.
        let p = compute_price(&villa(), span("2026-09-10", "2026-09-12"), &two_adults(), &[min_stay], 0.10)
            .unwrap();
        assert_eq!(p.total_base, 200_000);
    }

    #[test]
    fn min_stay_touching_last_night_applies() {
        let min_stay = PricingRule {
            start_date: Some(d("2026-06-01")),
            min_nights: Some(4),
            ..rule(RuleType::MinStay, 1)
        };
        assert!(
            compute_price(&villa(), span("2026-05-30", "2026-06-02"), &two_adults(), &[min_stay.clone()], 0.1)
                .is_err()
        );
        // Checkout day is not a night.
        assert!(
            compute_price(&villa(), span("2026-05-29", "2026-06-01"), &two_adults(), &[min_stay], 0.1)
                .is_ok()
        );
    }

    #[test]
    fn rules_apply_in_priority_order() {
        let plus_fixed = PricingRule {
            adjustment_fixed: 10_000,
            ..rule(RuleType::Season, 2)
        };
        let plus_ten_percent = PricingRule {
            adjustment_percent: 10.0,
            ..rule(RuleType::Event, 1)
        };
        // (100_000 * 1.1) + 10_000, not (100_000 + 10_000) * 1.1.
        let p = compute_price(
            &villa(),
            span("2026-01-10", "2026-01-11"),
            &two_adults(),
            &[plus_fixed, plus_ten_percent],
            0.0,
        )
        .unwrap();
        assert_eq!(p.nightly, vec![120_000]);
    }

    #[test]
    fn equal_priority_breaks_ties_by_rule_id() {
        let mut a = PricingRule {
            adjustment_fixed: 10_000,
            ..rule(RuleType::Season, 1)
        };
        let mut b = PricingRule {
            adjustment_percent: 50.0,
            ..rule(RuleType::Season, 1)
        };
        a.id = Ulid::from_parts(1, 0);
        b.id = Ulid::from_parts(2, 0);
        let stay = span("2026-01-10", "2026-01-11");
        let forward = compute_price(&villa(), stay, &two_adults(), &[a.clone(), b.clone()], 0.0).unwrap();
        let reversed = compute_price(&villa(), stay, &two_adults(), &[b, a], 0.0).unwrap();
        assert_eq!(forward.nightly, vec![165_000]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn weekend_rule_only_prices_friday_and_saturday() {
        let weekend = PricingRule {
            adjustment_percent: 20.0,
            ..rule(RuleType::Weekend, 1)
        };
        // Thu 2026-06-04 .. Mon 2026-06-08.
        let p = compute_price(&villa(), span("2026-06-04", "2026-06-08"), &two_adults(), &[weekend], 0.0)
            .unwrap();
        assert_eq!(p.nightly, vec![100_000, 120_000, 120_000, 100_000]);
    }

    #[test]
    fn weekly_discount_needs_seven_nights() {
        let weekly = PricingRule {
            adjustment_percent: -10.0,
            ..rule(RuleType::DiscountWeek, 1)
        };
        let six = compute_price(&villa(), span("2026-02-01", "2026-02-07"), &two_adults(), &[weekly.clone()], 0.0)
            .unwrap();
        assert_eq!(six.total_base, 600_000);
        let seven = compute_price(&villa(), span("2026-02-01", "2026-02-08"), &two_adults(), &[weekly], 0.0)
            .unwrap();
        assert_eq!(seven.total_base, 630_000);
    }

    #[test]
    fn nightly_price_floors_at_zero() {
        let huge_discount = PricingRule {
            adjustment_fixed: -500_000,
            ..rule(RuleType::Event, 1)
        };
        let p = compute_price(&villa(), span("2026-01-10", "2026-01-12"), &two_adults(), &[huge_discount], 0.1)
            .unwrap();
        assert_eq!(p.nightly, vec![0, 0]);
        assert_eq!(p.total, villa().cleaning_fee);
    }

    #[test]
    fn too_many_guests_rejected() {
        let guests = GuestCounts {
            adults: 6,
            children: 3,
            infants: 2,
        };
        let err = compute_price(&villa(), span("2026-01-10", "2026-01-12"), &guests, &[], 0.1).unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        // Infants don't count.
        let guests = GuestCounts {
            adults: 6,
            children: 2,
            infants: 2,
        };
        assert!(compute_price(&villa(), span("2026-01-10", "2026-01-12"), &guests, &[], 0.1).is_ok());
    }

    #[test]
    fn stay_longer_than_a_year_rejected() {
        let err = compute_price(&villa(), span("2026-01-01", "2027-01-02"), &two_adults(), &[], 0.1)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_range");
    }

    proptest! {
        #[test]
        fn total_is_exact_sum_of_parts(
            base in 0i64..2_000_000,
            cleaning in 0i64..100_000,
            service in 0.0f64..0.5,
            damage in 0.0f64..0.2,
            tax in 0.0f64..0.3,
            percent in -100.0f64..100.0,
            fixed in -50_000i64..50_000,
            start_offset in 0u64..365,
            nights in 1u64..40,
        ) {
            let v = Villa {
                base_price_per_night: base,
                cleaning_fee: cleaning,
                service_fee_ratio: service,
                damage_waiver_ratio: damage,
                ..villa()
            };
            let r = PricingRule {
                adjustment_fixed: fixed,
                adjustment_percent: percent,
                ..rule(RuleType::Season, 1)
            };
            let start = d("2026-01-01") + chrono::Days::new(start_offset);
            let stay = DateSpan::new(start, start + chrono::Days::new(nights));
            let p = compute_price(&v, stay, &two_adults(), &[r], tax).unwrap();

            prop_assert_eq!(p.total, p.total_base + p.total_fees + p.total_taxes);
            prop_assert_eq!(p.total_base, p.nightly.iter().sum::<i64>());
            prop_assert_eq!(p.nightly.len() as u64, nights);
            prop_assert!(p.nightly.iter().all(|n| *n >= 0));
        }
    }
}
