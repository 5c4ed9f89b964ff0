use crate::models::{AppointmentError, AppointmentStatus};

/// Pure state machine for appointment status changes. Terminal states
/// never transition again; cancelling in particular is one-way.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    pub fn valid_transitions(&self, from: AppointmentStatus) -> Vec<AppointmentStatus> {
        match from {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => vec![],
        }
    }

    pub fn can_transition(&self, from: AppointmentStatus, to: AppointmentStatus) -> bool {
        self.valid_transitions(from).contains(&to)
    }

    pub fn validate_transition(
        &self,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(AppointmentError::InvalidTransition { from, to })
        }
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn scheduled_can_reach_every_other_status() {
        let lifecycle = AppointmentLifecycleService::new();
        for to in [
            AppointmentStatus::Confirmed,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert!(lifecycle.can_transition(AppointmentStatus::Scheduled, to));
        }
    }

    #[test]
    fn confirmed_cannot_go_back_to_scheduled() {
        let lifecycle = AppointmentLifecycleService::new();
        assert!(!lifecycle.can_transition(AppointmentStatus::Confirmed, AppointmentStatus::Scheduled));
    }

    #[test]
    fn terminal_statuses_never_transition() {
        let lifecycle = AppointmentLifecycleService::new();
        for from in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert!(lifecycle.valid_transitions(from).is_empty());
        }
    }

    #[test]
    fn cancelled_cannot_be_uncancelled() {
        let lifecycle = AppointmentLifecycleService::new();
        let result = lifecycle
            .validate_transition(AppointmentStatus::Cancelled, AppointmentStatus::Scheduled);
        assert_matches!(
            result,
            Err(AppointmentError::InvalidTransition {
                from: AppointmentStatus::Cancelled,
                to: AppointmentStatus::Scheduled
            })
        );
    }
}
