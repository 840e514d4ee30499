pub mod event;
pub mod event_detail;
pub mod payment;
pub mod payment_log;
pub mod reservation;
pub mod user;

pub use event::Event;
pub use event_detail::{EventDetail, EventDetailWithTitle};
pub use payment::{Payment, PaymentStatus};
pub use payment_log::PaymentLog;
pub use reservation::Reservation;
pub use user::User;
