use ulid::Ulid;

use crate::error::BookingError;
use crate::model::*;

use super::CalendarStore;
use super::availability::{merge_overlapping, subtract_ranges};
use super::conflict::{conflicts, validate_span};

impl CalendarStore {
    /// Events overlapping `span`. Empty means the dates are free.
    pub async fn find_conflicts(
        &self,
        villa_id: Ulid,
        span: DateSpan,
        exclude_event_id: Option<Ulid>,
    ) -> Result<Vec<CalendarEvent>, BookingError> {
        validate_span(&span)?;
        let Some(cal) = self.existing_calendar(&villa_id) else {
            return Ok(Vec::new());
        };
        let guard = cal.read().await;
        Ok(conflicts(&guard, &span, exclude_event_id).cloned().collect())
    }

    pub async fn is_available(&self, villa_id: Ulid, span: DateSpan) -> Result<bool, BookingError> {
        Ok(self.find_conflicts(villa_id, span, None).await?.is_empty())
    }

    /// Free sub-ranges of `window`: the window minus every event on the villa.
    pub async fn free_ranges(
        &self,
        villa_id: Ulid,
        window: DateSpan,
    ) -> Result<Vec<DateSpan>, BookingError> {
        validate_span(&window)?;
        let Some(cal) = self.existing_calendar(&villa_id) else {
            return Ok(vec![window]);
        };
        let guard = cal.read().await;
        let taken: Vec<DateSpan> = guard
            .overlapping(&window)
            .map(|e| DateSpan::new(e.span.start.max(window.start), e.span.end.min(window.end)))
            .collect();
        Ok(subtract_ranges(&[window], &merge_overlapping(&taken)))
    }

    /// Every event of a villa, by start date.
    pub async fn events(&self, villa_id: Ulid) -> Vec<CalendarEvent> {
        match self.existing_calendar(&villa_id) {
            Some(cal) => cal.read().await.events.clone(),
            None => Vec::new(),
        }
    }

    /// Every event of one kind, across all villas.
    pub async fn events_of_kind(&self, kind: CalendarEventKind) -> Vec<CalendarEvent> {
        let cals: Vec<_> = self.calendars.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for cal in cals {
            let guard = cal.read().await;
            found.extend(guard.events.iter().filter(|e| e.kind == kind).cloned());
        }
        found
    }

    pub async fn get_event(&self, event_id: Ulid) -> Option<CalendarEvent> {
        let villa_id = self.villa_for_event(&event_id)?;
        let cal = self.existing_calendar(&villa_id)?;
        let guard = cal.read().await;
        guard.events.iter().find(|e| e.id == event_id).cloned()
    }
}
