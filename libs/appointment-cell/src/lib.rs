// =====================================================================================
// APPOINTMENT CELL - CONFLICT-FREE BOOKING, CACHE-COHERENT READS, QUEUED CREATION
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::create_appointment_router;
pub use services::{
    AppointmentJobExecutor, AppointmentStore, BookingService, InMemoryAppointmentStore, SchedulingEngine,
    SupabaseAppointmentStore,
};
