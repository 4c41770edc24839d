use ulid::Ulid;

use crate::error::BookingError;
use crate::limits::*;
use crate::model::*;

pub(crate) fn validate_span(span: &DateSpan) -> Result<(), BookingError> {
    if span.end <= span.start {
        return Err(BookingError::InvalidRange {
            start: span.start,
            end: span.end,
        });
    }
    if span.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(BookingError::LimitExceeded("date range too wide"));
    }
    Ok(())
}

pub(crate) fn validate_note(note: Option<&str>) -> Result<(), BookingError> {
    if note.is_some_and(|n| n.len() > MAX_NOTE_LEN) {
        return Err(BookingError::LimitExceeded("note too long"));
    }
    Ok(())
}

/// Events overlapping `span`, optionally ignoring one event id.
pub(crate) fn conflicts<'a>(
    cal: &'a VillaCalendar,
    span: &'a DateSpan,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a CalendarEvent> {
    cal.overlapping(span)
        .filter(move |e| Some(e.id) != exclude)
}

pub(crate) fn check_no_conflict(
    cal: &VillaCalendar,
    span: &DateSpan,
    exclude: Option<Ulid>,
) -> Result<(), BookingError> {
    match conflicts(cal, span, exclude).next() {
        Some(hit) => {
            metrics::counter!(crate::observability::CALENDAR_CONFLICTS_TOTAL).increment(1);
            Err(BookingError::Conflict(hit.id))
        }
        None => Ok(()),
    }
}
