pub mod booking;
pub mod lifecycle;
pub mod repository;

pub use booking::BookingService;
pub use lifecycle::LifecycleService;
pub use repository::AppointmentRepository;
