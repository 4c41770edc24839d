//! Request structs checked at the edge and parsed into typed inputs, so the
//! core never sees an unvalidated date pair or guest count.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use validator::{Validate, ValidationError};

use crate::calendar::ReserveRequest;
use crate::error::BookingError;
use crate::model::*;

/// Guest request to hold a villa.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HoldRequest {
    pub villa_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[validate(range(min = 1, max = 99))]
    pub adults: u32,
    #[serde(default)]
    #[validate(range(max = 99))]
    pub children: u32,
    #[serde(default)]
    #[validate(range(max = 99))]
    pub infants: u32,
    #[serde(default)]
    pub plan: PaymentPlan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInput {
    pub villa_id: Ulid,
    pub span: DateSpan,
    pub guests: GuestCounts,
    pub plan: PaymentPlan,
}

impl HoldRequest {
    pub fn parse(&self) -> Result<HoldInput, BookingError> {
        self.validate()?;
        Ok(HoldInput {
            villa_id: self.villa_id,
            span: DateSpan::parse(self.check_in, self.check_out)?,
            guests: GuestCounts {
                adults: self.adults,
                children: self.children,
                infants: self.infants,
            },
            plan: self.plan,
        })
    }
}

/// Host-authored pricing rule, as it arrives in the catalog seed.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "check_rule"))]
pub struct PricingRuleInput {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub villa_id: Ulid,
    pub rule_type: RuleType,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub adjustment_fixed: Cents,
    #[serde(default)]
    #[validate(range(min = -100.0, max = 100.0))]
    pub adjustment_percent: f64,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub min_nights: Option<u32>,
    #[validate(range(min = 1))]
    pub priority: u32,
}

fn check_rule(rule: &PricingRuleInput) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (rule.start_date, rule.end_date)
        && end < start
    {
        return Err(ValidationError::new("end_date_before_start_date"));
    }
    if rule.rule_type == RuleType::MinStay && rule.min_nights.is_none() {
        return Err(ValidationError::new("min_stay_without_min_nights"));
    }
    Ok(())
}

impl PricingRuleInput {
    pub fn parse(&self) -> Result<PricingRule, BookingError> {
        self.validate()?;
        Ok(PricingRule {
            id: self.id.unwrap_or_else(Ulid::new),
            villa_id: self.villa_id,
            rule_type: self.rule_type,
            start_date: self.start_date,
            end_date: self.end_date,
            adjustment_fixed: self.adjustment_fixed,
            adjustment_percent: self.adjustment_percent,
            min_nights: self.min_nights,
            priority: self.priority,
        })
    }
}

/// Villa listing as it arrives in the catalog seed.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct VillaInput {
    pub id: Ulid,
    pub host_user_id: Ulid,
    #[serde(default)]
    pub published: bool,
    #[validate(range(min = 0))]
    pub base_price_per_night: Cents,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub cleaning_fee: Cents,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub service_fee_ratio: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub damage_waiver_ratio: f64,
    #[validate(range(min = 1, max = 99))]
    pub max_guests: u32,
}

impl VillaInput {
    pub fn parse(&self) -> Result<Villa, BookingError> {
        self.validate()?;
        Ok(Villa {
            id: self.id,
            host_user_id: self.host_user_id,
            published: self.published,
            base_price_per_night: self.base_price_per_night,
            cleaning_fee: self.cleaning_fee,
            service_fee_ratio: self.service_fee_ratio,
            damage_waiver_ratio: self.damage_waiver_ratio,
            max_guests: self.max_guests,
        })
    }
}

/// Host request to close dates on one of their villas.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BlockRequest {
    pub villa_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

impl BlockRequest {
    pub fn parse(&self) -> Result<ReserveRequest, BookingError> {
        self.validate()?;
        Ok(ReserveRequest {
            villa_id: self.villa_id,
            span: DateSpan::parse(self.start_date, self.end_date)?,
            kind: CalendarEventKind::Blocked,
            booking_id: None,
            note: self.note.clone(),
        })
    }
}
