use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    /// A span with `end <= start` covers no instant at all.
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Snapshots ────────────────────────────────────────────────────

/// Display attributes of a vehicle at the moment it was booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub id: Ulid,
    pub name: String,
    pub registration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub id: Ulid,
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSnapshot {
    pub id: Ulid,
    pub name: String,
}

/// Copy of a booking embedded in the vehicle, customer and staff records
/// it links. Kept in sync by the engine's replication saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRef {
    pub booking_id: Ulid,
    pub span: Span,
    pub vehicle: VehicleSnapshot,
    pub customer: CustomerSnapshot,
    pub staff: StaffSnapshot,
    pub total: Decimal,
    pub distance_covered: u64,
    pub is_distance_reconciled: bool,
}

/// Records that carry embedded booking refs, ordered by `span.start`.
pub trait Linked {
    fn booking_refs(&self) -> &[BookingRef];
    fn booking_refs_mut(&mut self) -> &mut Vec<BookingRef>;
    fn is_retired(&self) -> bool;
    fn set_retired(&mut self);

    fn has_booking(&self, booking_id: Ulid) -> bool {
        self.booking_refs().iter().any(|r| r.booking_id == booking_id)
    }

    /// Insert or replace the ref for `r.booking_id`, keeping start order.
    fn upsert_ref(&mut self, r: BookingRef) {
        self.remove_ref(r.booking_id);
        let refs = self.booking_refs_mut();
        let pos = refs
            .binary_search_by_key(&r.span.start, |x| x.span.start)
            .unwrap_or_else(|e| e);
        refs.insert(pos, r);
    }

    /// Remove by booking id. Refs are copies, so identity is the id alone.
    fn remove_ref(&mut self, booking_id: Ulid) -> Option<BookingRef> {
        let refs = self.booking_refs_mut();
        let pos = refs.iter().position(|r| r.booking_id == booking_id)?;
        Some(refs.remove(pos))
    }

    fn find_ref_mut(&mut self, booking_id: Ulid) -> Option<&mut BookingRef> {
        self.booking_refs_mut()
            .iter_mut()
            .find(|r| r.booking_id == booking_id)
    }
}

// ── Fleet records ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub at: Ms,
    pub odometer: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub version: u64,
    pub name: String,
    pub registration: String,
    pub manufacturer: String,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub cumulative_distance: u64,
    pub distance_since_service: u64,
    /// 0 means no service schedule is configured.
    pub service_interval_distance: u64,
    pub insurance_due: Option<Ms>,
    pub pollution_due: Option<Ms>,
    pub service_history: Vec<ServiceRecord>,
    pub booking_refs: Vec<BookingRef>,
    pub is_retired: bool,
}

impl Vehicle {
    pub fn new(id: Ulid, name: String, registration: String, manufacturer: String) -> Self {
        Self {
            id,
            version: 0,
            name,
            registration,
            manufacturer,
            fuel_type: None,
            transmission: None,
            cumulative_distance: 0,
            distance_since_service: 0,
            service_interval_distance: 0,
            insurance_due: None,
            pollution_due: None,
            service_history: Vec::new(),
            booking_refs: Vec::new(),
            is_retired: false,
        }
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            id: self.id,
            name: self.name.clone(),
            registration: self.registration.clone(),
        }
    }

    /// Distance left before the next service is due. Negative once overdue.
    pub fn remaining_service_distance(&self) -> i64 {
        self.service_interval_distance as i64 - self.distance_since_service as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub version: u64,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub booking_refs: Vec<BookingRef>,
    pub is_retired: bool,
}

impl Customer {
    pub fn new(id: Ulid, name: String, phone: String) -> Self {
        Self {
            id,
            version: 0,
            name,
            phone,
            email: None,
            address: None,
            booking_refs: Vec::new(),
            is_retired: false,
        }
    }

    pub fn snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            id: self.id,
            name: self.name.clone(),
            phone: self.phone.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Ulid,
    pub version: u64,
    pub name: String,
    pub username: String,
    pub email: Option<String>,
    pub booking_refs: Vec<BookingRef>,
    pub is_retired: bool,
}

impl StaffMember {
    pub fn new(id: Ulid, name: String, username: String) -> Self {
        Self {
            id,
            version: 0,
            name,
            username,
            email: None,
            booking_refs: Vec::new(),
            is_retired: false,
        }
    }

    pub fn snapshot(&self) -> StaffSnapshot {
        StaffSnapshot {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

macro_rules! impl_linked {
    ($($ty:ty),*) => {
        $(
            impl Linked for $ty {
                fn booking_refs(&self) -> &[BookingRef] {
                    &self.booking_refs
                }
                fn booking_refs_mut(&mut self) -> &mut Vec<BookingRef> {
                    &mut self.booking_refs
                }
                fn is_retired(&self) -> bool {
                    self.is_retired
                }
                fn set_retired(&mut self) {
                    self.is_retired = true;
                }
            }
        )*
    };
}

impl_linked!(Vehicle, Customer, StaffMember);

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Financials {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub advance_paid: Decimal,
    pub invoice_lines: Vec<InvoiceLine>,
}

impl Financials {
    pub fn balance_due(&self) -> Decimal {
        self.total - self.advance_paid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub version: u64,
    pub span: Span,
    pub vehicle: VehicleSnapshot,
    pub customer: CustomerSnapshot,
    pub staff: StaffSnapshot,
    pub financials: Financials,
    pub distance_covered: u64,
    /// Odometer reading recorded when the trip was reconciled.
    pub end_odometer: Option<u64>,
    pub status: BookingStatus,
    pub is_distance_reconciled: bool,
    pub is_invoiced: bool,
    /// Set when the replication saga gave up on one of the linked records.
    pub needs_replication_repair: bool,
    /// The records the last saga could not update. Every later saga on this
    /// booking retries them first.
    pub repair_links: Vec<EntityLink>,
    pub created_at: Ms,
    pub cancelled_by: Option<Ulid>,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    pub fn to_ref(&self) -> BookingRef {
        BookingRef {
            booking_id: self.id,
            span: self.span,
            vehicle: self.vehicle.clone(),
            customer: self.customer.clone(),
            staff: self.staff.clone(),
            total: self.financials.total,
            distance_covered: self.distance_covered,
            is_distance_reconciled: self.is_distance_reconciled,
        }
    }
}

// ── Alerts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertKind {
    Service2000,
    Service1000,
    Service500,
    ServiceOverdue,
    Insurance10d,
    Insurance5d,
    InsuranceOverdue,
    Pollution10d,
    Pollution5d,
    PollutionOverdue,
    NewBooking,
}

/// Alert kinds that are cleared together by one service or renewal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertFamily {
    Service,
    Insurance,
    Pollution,
    Booking,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Service2000 => "service-2000",
            AlertKind::Service1000 => "service-1000",
            AlertKind::Service500 => "service-500",
            AlertKind::ServiceOverdue => "service-overdue",
            AlertKind::Insurance10d => "insurance-10d",
            AlertKind::Insurance5d => "insurance-5d",
            AlertKind::InsuranceOverdue => "insurance-overdue",
            AlertKind::Pollution10d => "pollution-10d",
            AlertKind::Pollution5d => "pollution-5d",
            AlertKind::PollutionOverdue => "pollution-overdue",
            AlertKind::NewBooking => "new-booking",
        }
    }

    pub fn family(&self) -> AlertFamily {
        match self {
            AlertKind::Service2000
            | AlertKind::Service1000
            | AlertKind::Service500
            | AlertKind::ServiceOverdue => AlertFamily::Service,
            AlertKind::Insurance10d | AlertKind::Insurance5d | AlertKind::InsuranceOverdue => {
                AlertFamily::Insurance
            }
            AlertKind::Pollution10d | AlertKind::Pollution5d | AlertKind::PollutionOverdue => {
                AlertFamily::Pollution
            }
            AlertKind::NewBooking => AlertFamily::Booking,
        }
    }

    pub fn title(&self, vehicle_name: &str) -> String {
        match self {
            AlertKind::Service2000 => format!("{vehicle_name}: service due within 2000 km"),
            AlertKind::Service1000 => format!("{vehicle_name}: service due within 1000 km"),
            AlertKind::Service500 => format!("{vehicle_name}: service due within 500 km"),
            AlertKind::ServiceOverdue => format!("{vehicle_name}: service overdue"),
            AlertKind::Insurance10d => format!("{vehicle_name}: insurance expires in 10 days"),
            AlertKind::Insurance5d => format!("{vehicle_name}: insurance expires in 5 days"),
            AlertKind::InsuranceOverdue => format!("{vehicle_name}: insurance expired"),
            AlertKind::Pollution10d => format!("{vehicle_name}: pollution certificate expires in 10 days"),
            AlertKind::Pollution5d => format!("{vehicle_name}: pollution certificate expires in 5 days"),
            AlertKind::PollutionOverdue => format!("{vehicle_name}: pollution certificate expired"),
            AlertKind::NewBooking => format!("{vehicle_name}: new booking"),
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceAlert {
    pub id: Ulid,
    pub version: u64,
    pub vehicle_id: Ulid,
    pub kind: AlertKind,
    pub created_at: Ms,
    pub title: String,
    pub seen_by: BTreeSet<Ulid>,
    pub booking_id: Option<Ulid>,
    /// Set once a service or renewal event takes the alert out of dedup.
    pub cleared_at: Option<Ms>,
}

impl MaintenanceAlert {
    pub fn is_cleared(&self) -> bool {
        self.cleared_at.is_some()
    }
}

/// Vehicle documents with an expiry date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    Insurance,
    Pollution,
}

impl Document {
    pub fn family(&self) -> AlertFamily {
        match self {
            Document::Insurance => AlertFamily::Insurance,
            Document::Pollution => AlertFamily::Pollution,
        }
    }
}

// ── Storage envelope ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Vehicle,
    Customer,
    Staff,
    Booking,
    Alert,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Vehicle,
        EntityKind::Customer,
        EntityKind::Staff,
        EntityKind::Booking,
        EntityKind::Alert,
    ];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Vehicle => "vehicle",
            EntityKind::Customer => "customer",
            EntityKind::Staff => "staff",
            EntityKind::Booking => "booking",
            EntityKind::Alert => "alert",
        };
        f.write_str(s)
    }
}

/// A (kind, id) pair naming one stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityLink {
    pub kind: EntityKind,
    pub id: Ulid,
}

impl fmt::Display for EntityLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Any stored record. This is also the WAL record format: each entry is
/// the full latest image of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    Vehicle(Vehicle),
    Customer(Customer),
    Staff(StaffMember),
    Booking(Booking),
    Alert(MaintenanceAlert),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Vehicle(_) => EntityKind::Vehicle,
            Entity::Customer(_) => EntityKind::Customer,
            Entity::Staff(_) => EntityKind::Staff,
            Entity::Booking(_) => EntityKind::Booking,
            Entity::Alert(_) => EntityKind::Alert,
        }
    }

    pub fn id(&self) -> Ulid {
        match self {
            Entity::Vehicle(r) => r.id,
            Entity::Customer(r) => r.id,
            Entity::Staff(r) => r.id,
            Entity::Booking(r) => r.id,
            Entity::Alert(r) => r.id,
        }
    }

    pub fn link(&self) -> EntityLink {
        EntityLink {
            kind: self.kind(),
            id: self.id(),
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Entity::Vehicle(r) => r.version,
            Entity::Customer(r) => r.version,
            Entity::Staff(r) => r.version,
            Entity::Booking(r) => r.version,
            Entity::Alert(r) => r.version,
        }
    }

    pub fn set_version(&mut self, version: u64) {
        match self {
            Entity::Vehicle(r) => r.version = version,
            Entity::Customer(r) => r.version = version,
            Entity::Staff(r) => r.version = version,
            Entity::Booking(r) => r.version = version,
            Entity::Alert(r) => r.version = version,
        }
    }

    /// Borrow the embedded booking refs, for the record kinds that have them.
    pub fn as_linked_mut(&mut self) -> Option<&mut dyn Linked> {
        match self {
            Entity::Vehicle(r) => Some(r),
            Entity::Customer(r) => Some(r),
            Entity::Staff(r) => Some(r),
            Entity::Booking(_) | Entity::Alert(_) => None,
        }
    }
}

/// Typed access to one `Entity` variant.
pub trait Record: Sized + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
    fn record_id(&self) -> Ulid;
    fn into_entity(self) -> Entity;
    fn from_entity(entity: Entity) -> Option<Self>;
    fn as_record(entity: &Entity) -> Option<&Self>;
}

macro_rules! impl_record {
    ($ty:ty, $variant:ident) => {
        impl Record for $ty {
            const KIND: EntityKind = EntityKind::$variant;

            fn record_id(&self) -> Ulid {
                self.id
            }

            fn into_entity(self) -> Entity {
                Entity::$variant(self)
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$variant(r) => Some(r),
                    _ => None,
                }
            }

            fn as_record(entity: &Entity) -> Option<&Self> {
                match entity {
                    Entity::$variant(r) => Some(r),
                    _ => None,
                }
            }
        }
    };
}

impl_record!(Vehicle, Vehicle);
impl_record!(Customer, Customer);
impl_record!(StaffMember, Staff);
impl_record!(Booking, Booking);
impl_record!(MaintenanceAlert, Alert);

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ref(start: Ms, end: Ms) -> BookingRef {
        BookingRef {
            booking_id: Ulid::new(),
            span: Span::new(start, end),
            vehicle: VehicleSnapshot {
                id: Ulid::new(),
                name: "Swift".into(),
                registration: "KL-07-1234".into(),
            },
            customer: CustomerSnapshot {
                id: Ulid::new(),
                name: "Anu".into(),
                phone: "9000000000".into(),
            },
            staff: StaffSnapshot {
                id: Ulid::new(),
                name: "Ravi".into(),
            },
            total: Decimal::new(250000, 2),
            distance_covered: 0,
            is_distance_reconciled: false,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
        assert!(s.is_valid());
        assert!(!Span::new(200, 200).is_valid());
        assert!(!Span::new(300, 200).is_valid());
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn refs_stay_sorted_by_start() {
        let mut v = Vehicle::new(Ulid::new(), "Swift".into(), "KL-07-1234".into(), "Maruti".into());
        v.upsert_ref(make_ref(300, 400));
        v.upsert_ref(make_ref(100, 200));
        v.upsert_ref(make_ref(200, 300));
        let starts: Vec<Ms> = v.booking_refs.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn upsert_replaces_existing_ref() {
        let mut c = Customer::new(Ulid::new(), "Anu".into(), "9000000000".into());
        let mut r = make_ref(100, 200);
        c.upsert_ref(r.clone());
        r.span = Span::new(500, 600);
        r.distance_covered = 42;
        c.upsert_ref(r.clone());
        assert_eq!(c.booking_refs.len(), 1);
        assert_eq!(c.booking_refs[0], r);
    }

    #[test]
    fn remove_ref_by_id() {
        let mut s = StaffMember::new(Ulid::new(), "Ravi".into(), "ravi".into());
        let a = make_ref(100, 200);
        let b = make_ref(200, 300);
        s.upsert_ref(a.clone());
        s.upsert_ref(b.clone());
        assert_eq!(s.remove_ref(a.booking_id), Some(a.clone()));
        assert!(!s.has_booking(a.booking_id));
        assert!(s.has_booking(b.booking_id));
        assert_eq!(s.remove_ref(a.booking_id), None);
    }

    #[test]
    fn remaining_service_distance_goes_negative() {
        let mut v = Vehicle::new(Ulid::new(), "Swift".into(), "KL-07-1234".into(), "Maruti".into());
        v.service_interval_distance = 10_000;
        v.distance_since_service = 10_250;
        assert_eq!(v.remaining_service_distance(), -250);
    }

    #[test]
    fn alert_kind_names_and_families() {
        assert_eq!(AlertKind::Service2000.to_string(), "service-2000");
        assert_eq!(AlertKind::PollutionOverdue.as_str(), "pollution-overdue");
        assert_eq!(AlertKind::Service500.family(), AlertFamily::Service);
        assert_eq!(AlertKind::Insurance5d.family(), AlertFamily::Insurance);
        assert_eq!(AlertKind::NewBooking.family(), AlertFamily::Booking);
    }

    #[test]
    fn entity_envelope_roundtrips_through_bincode() {
        let mut v = Vehicle::new(Ulid::new(), "Innova".into(), "KL-01-9999".into(), "Toyota".into());
        v.upsert_ref(make_ref(100, 200));
        let entity = Entity::Vehicle(v);
        let bytes = bincode::serialize(&entity).unwrap();
        let decoded: Entity = bincode::deserialize(&bytes).unwrap();
        assert_eq!(entity, decoded);
    }

    #[test]
    fn record_conversion_checks_variant() {
        let c = Customer::new(Ulid::new(), "Anu".into(), "9000000000".into());
        let id = c.id;
        let entity = c.into_entity();
        assert_eq!(entity.kind(), EntityKind::Customer);
        assert_eq!(entity.id(), id);
        assert!(Vehicle::from_entity(entity.clone()).is_none());
        assert_eq!(Customer::from_entity(entity).map(|c| c.id), Some(id));
    }
}
