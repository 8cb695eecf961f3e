use ulid::Ulid;

use crate::model::{EntityKind, EntityLink, Ms};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(EntityKind, Ulid),
    MalformedTimestamp(String),
    InvalidInterval {
        start: Ms,
        end: Ms,
    },
    InvalidReading {
        reading: u64,
        current: u64,
    },
    /// The booking was committed but some linked records could not be
    /// updated. Converted into a degraded `Committed` before reaching callers.
    ReplicationPartialFailure {
        booking_id: Ulid,
        failed: Vec<EntityLink>,
    },
    Conflict(Ulid),
    BookingCancelled(Ulid),
    /// The trip's odometer reading has already been recorded.
    AlreadyReconciled(Ulid),
    /// Only vehicles, customers and staff have a retired state.
    NotRetirable(EntityKind),
    LimitExceeded(&'static str),
    Store(String),
    Aborted(String),
}

impl EngineError {
    /// True when the request itself was bad and nothing was written.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(..)
                | EngineError::MalformedTimestamp(_)
                | EngineError::InvalidInterval { .. }
                | EngineError::InvalidReading { .. }
                | EngineError::Conflict(_)
                | EngineError::BookingCancelled(_)
                | EngineError::AlreadyReconciled(_)
                | EngineError::NotRetirable(_)
                | EngineError::LimitExceeded(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "{kind} not found: {id}"),
            EngineError::MalformedTimestamp(text) => {
                write!(f, "malformed timestamp {text:?}: expected DD-MM-YYYY hh:mm AM|PM")
            }
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): end must be after start")
            }
            EngineError::InvalidReading { reading, current } => write!(
                f,
                "invalid odometer reading {reading}: current cumulative distance is {current}"
            ),
            EngineError::ReplicationPartialFailure { booking_id, failed } => {
                write!(f, "booking {booking_id} committed but replication failed for:")?;
                for link in failed {
                    write!(f, " {link}")?;
                }
                Ok(())
            }
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::BookingCancelled(id) => write!(f, "booking {id} is cancelled"),
            EngineError::AlreadyReconciled(id) => {
                write!(f, "booking {id} already has its trip distance recorded")
            }
            EngineError::NotRetirable(kind) => write!(f, "{kind} records cannot be retired"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
            EngineError::Aborted(e) => write!(f, "operation aborted: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(link) => EngineError::NotFound(link.kind, link.id),
            other => EngineError::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_keeps_kind_and_id() {
        let id = Ulid::new();
        let e: EngineError = StoreError::NotFound(EntityLink {
            kind: EntityKind::Customer,
            id,
        })
        .into();
        assert_eq!(e, EngineError::NotFound(EntityKind::Customer, id));
        assert!(e.is_caller_error());
    }

    #[test]
    fn store_conflict_is_not_a_caller_error() {
        let e: EngineError = StoreError::Conflict {
            link: EntityLink {
                kind: EntityKind::Vehicle,
                id: Ulid::new(),
            },
            expected: 1,
            found: 2,
        }
        .into();
        assert!(matches!(e, EngineError::Store(_)));
        assert!(!e.is_caller_error());
    }

    #[test]
    fn partial_failure_lists_links() {
        let booking_id = Ulid::new();
        let staff = EntityLink {
            kind: EntityKind::Staff,
            id: Ulid::new(),
        };
        let msg = EngineError::ReplicationPartialFailure {
            booking_id,
            failed: vec![staff],
        }
        .to_string();
        assert!(msg.contains(&booking_id.to_string()));
        assert!(msg.contains(&format!("staff:{}", staff.id)));
    }
}
