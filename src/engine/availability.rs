use std::fmt;

use ulid::Ulid;

use crate::model::*;

// ── Scheduling view ──────────────────────────────────────────────

/// Anything with a booking id and an interval: full bookings and the refs
/// embedded in fleet records.
pub trait Scheduled {
    fn booking_id(&self) -> Ulid;
    fn span(&self) -> Span;
}

impl Scheduled for Booking {
    fn booking_id(&self) -> Ulid {
        self.id
    }
    fn span(&self) -> Span {
        self.span
    }
}

impl Scheduled for BookingRef {
    fn booking_id(&self) -> Ulid {
        self.booking_id
    }
    fn span(&self) -> Span {
        self.span
    }
}

/// Degenerate spans never count as running or active. They're logged so
/// bad data gets noticed.
fn usable<B: Scheduled>(b: &B) -> bool {
    let span = b.span();
    if !span.is_valid() {
        tracing::warn!(
            booking_id = %b.booking_id(),
            start = span.start,
            end = span.end,
            "skipping booking with degenerate interval"
        );
        return false;
    }
    true
}

// ── Vehicle classification ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleState {
    Running,
    Idle,
}

/// Running iff some booking covers `now`. Overlapping bookings shouldn't
/// exist, but any single match is enough.
pub fn classify(vehicle: &Vehicle, now: Ms) -> VehicleState {
    let running = vehicle
        .booking_refs
        .iter()
        .any(|r| usable(r) && r.span.contains_instant(now));
    if running {
        VehicleState::Running
    } else {
        VehicleState::Idle
    }
}

#[derive(Debug, Clone)]
pub struct YardEntry {
    pub vehicle: Vehicle,
    /// Ascending by start.
    pub bookings: Vec<BookingRef>,
    as_of: Ms,
}

impl YardEntry {
    /// Start of the first booking after the partition instant, if any.
    pub fn next_booking_start(&self) -> Option<Ms> {
        self.bookings
            .iter()
            .map(|b| b.span.start)
            .find(|&start| start > self.as_of)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FleetPartition {
    pub running: Vec<Vehicle>,
    pub on_yard: Vec<YardEntry>,
}

/// Split the fleet at `now`. Retired vehicles are left out; every other
/// vehicle lands in exactly one of the two lists.
pub fn fleet_partition<'a, I>(vehicles: I, now: Ms) -> FleetPartition
where
    I: IntoIterator<Item = &'a Vehicle>,
{
    let mut partition = FleetPartition::default();
    for vehicle in vehicles {
        if vehicle.is_retired {
            continue;
        }
        match classify(vehicle, now) {
            VehicleState::Running => partition.running.push(vehicle.clone()),
            VehicleState::Idle => {
                let mut bookings = vehicle.booking_refs.clone();
                bookings.sort_by_key(|b| b.span.start);
                partition.on_yard.push(YardEntry {
                    vehicle: vehicle.clone(),
                    bookings,
                    as_of: now,
                });
            }
        }
    }
    partition
}

// ── Booking windows ──────────────────────────────────────────────

/// Whole days, hours and minutes, rounded down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRemaining {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

impl TimeRemaining {
    pub fn from_ms(ms: Ms) -> Self {
        let total_minutes = ms.max(0) / 60_000;
        Self {
            days: total_minutes / (24 * 60),
            hours: total_minutes / 60 % 24,
            minutes: total_minutes % 60,
        }
    }
}

impl fmt::Display for TimeRemaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if self.days > 0 {
            parts.push(format!("{}d", self.days));
        }
        if self.hours > 0 {
            parts.push(format!("{}h", self.hours));
        }
        if self.minutes > 0 {
            parts.push(format!("{}m", self.minutes));
        }
        if parts.is_empty() {
            return f.write_str("0m");
        }
        f.write_str(&parts.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Start,
    End,
}

/// A filtered, start-ordered snapshot of bookings. `iter` can be called any
/// number of times; remaining time is computed as items are produced.
#[derive(Debug, Clone)]
pub struct BookingWindow<B> {
    items: Vec<B>,
    now: Ms,
    anchor: Anchor,
}

#[derive(Debug)]
pub struct ScheduledBooking<'a, B> {
    pub booking: &'a B,
    pub remaining: TimeRemaining,
}

impl<B: Scheduled> BookingWindow<B> {
    fn new(bookings: impl IntoIterator<Item = B>, now: Ms, anchor: Anchor, keep: impl Fn(Span) -> bool) -> Self {
        let mut items: Vec<B> = bookings
            .into_iter()
            .filter(|b| usable(b) && keep(b.span()))
            .collect();
        items.sort_by_key(|b| b.span().start);
        Self { items, now, anchor }
    }

    pub fn iter(&self) -> impl Iterator<Item = ScheduledBooking<'_, B>> + '_ {
        self.items.iter().map(move |booking| {
            let target = match self.anchor {
                Anchor::Start => booking.span().start,
                Anchor::End => booking.span().end,
            };
            ScheduledBooking {
                booking,
                remaining: TimeRemaining::from_ms(target - self.now),
            }
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_bookings(self) -> Vec<B> {
        self.items
    }
}

/// Bookings that haven't started yet; remaining time counts to the start.
pub fn upcoming<B: Scheduled>(bookings: impl IntoIterator<Item = B>, now: Ms) -> BookingWindow<B> {
    BookingWindow::new(bookings, now, Anchor::Start, |span| span.start > now)
}

/// Bookings in progress at `now`; remaining time counts to the end.
pub fn active_now<B: Scheduled>(bookings: impl IntoIterator<Item = B>, now: Ms) -> BookingWindow<B> {
    BookingWindow::new(bookings, now, Anchor::End, |span| span.contains_instant(now))
}
