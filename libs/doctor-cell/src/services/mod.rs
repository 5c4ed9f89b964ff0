pub mod availability;
pub mod doctor;
pub mod leave;
pub mod slots;
