pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    CreateAvailabilityRequest, CreateLeaveRequest, Doctor, DoctorAvailability, DoctorError,
    DoctorLeave, Slot, SlotListing, UpdateAvailabilityRequest, Weekday,
};
