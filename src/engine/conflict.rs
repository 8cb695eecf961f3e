use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if !span.is_valid() {
        return Err(EngineError::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

pub(crate) fn validate_financials(financials: &Financials) -> Result<(), EngineError> {
    if financials.invoice_lines.len() > MAX_INVOICE_LINES {
        return Err(EngineError::LimitExceeded("too many invoice lines"));
    }
    if financials
        .invoice_lines
        .iter()
        .any(|l| l.description.len() > MAX_NAME_LEN)
    {
        return Err(EngineError::LimitExceeded("invoice line description too long"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

/// A vehicle can't be in two active bookings at once. `exclude` is the
/// booking being edited, which may overlap its own old interval.
pub(crate) fn check_no_conflict(
    vehicle: &Vehicle,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for r in vehicle.booking_refs() {
        if Some(r.booking_id) == exclude || !r.span.is_valid() {
            continue;
        }
        if r.span.overlaps(span) {
            return Err(EngineError::Conflict(r.booking_id));
        }
        // Refs are ordered by start; nothing later can overlap.
        if r.span.start >= span.end {
            break;
        }
    }
    Ok(())
}
