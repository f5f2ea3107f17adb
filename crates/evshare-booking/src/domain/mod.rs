pub mod billing;
pub mod bookings;
pub mod clock;
pub mod completion;
pub mod engine;
pub mod membership;
pub mod pricing;
pub mod promotions;
pub mod types;
pub mod vehicles;

pub use billing::BillingRecord;
pub use bookings::{BillingStatementLine, Booking, BookingView, BookingWindow, RentalHistoryEntry};
pub use clock::{Clock, FixedClock, SystemClock};
pub use completion::{CompletionSweeper, SweepReport};
pub use engine::{BookingEngine, BookingOperations};
pub use membership::{
    InMemoryUserDirectory, MembershipBenefit, MembershipCatalog, StaticMembershipCatalog,
    UserDirectory,
};
pub use pricing::{PriceQuote, PricingCalculator};
pub use promotions::{InMemoryPromotionCatalog, Promotion, PromotionCatalog};
pub use types::{
    BillingId, BookingId, BookingStatus, Cleanliness, MembershipTier, Money, PaymentMethod,
    PaymentStatus, UserId, VehicleId, VehicleStatus,
};
pub use vehicles::{Vehicle, VehicleCondition};
