pub mod event;
pub mod booking;
pub mod waitlist;
pub mod payment;

pub use event::Event;
pub use booking::Booking;
pub use waitlist::WaitlistEntry;
pub use payment::{Payment, PaymentProvider, PaymentStatus};
