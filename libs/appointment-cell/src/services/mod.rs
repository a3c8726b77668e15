pub mod booking;
pub mod jobs;
pub mod lifecycle;
pub mod scheduling;
pub mod store;

pub use booking::BookingService;
pub use jobs::AppointmentJobExecutor;
pub use scheduling::{free_slots, intervals_overlap, parse_window, ProposedSlot, SchedulingEngine, SlotWindow, SLOT_MINUTES};
pub use store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
