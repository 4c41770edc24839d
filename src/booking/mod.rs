//! Booking lifecycle: the repository of bookings, cancellation and refund
//! policy, and the manager that moves bookings between states.

mod lifecycle;
mod policy;
mod repository;

pub use lifecycle::LifecycleManager;
pub use policy::{
    Actor, CancellationMatrix, FullRefund, RefundInfo, RefundPolicy, RefundPolicyKind, TieredRefund,
};
pub use repository::BookingRepository;
