pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    Appointment, AppointmentStatus, BookAppointmentRequest, BookingError, BookingResponse,
    Modality,
};
pub use services::{BookingService, LifecycleService};
