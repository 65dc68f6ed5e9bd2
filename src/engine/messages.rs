//! Notification text sent to claimants.

use crate::model::Ms;
use crate::slot::format_instant;

pub fn booked(space_name: &str, deadline: Ms) -> String {
    format!(
        "You booked {space_name}. Check in before {}.",
        format_instant(deadline)
    )
}

pub fn checked_in(space_name: &str) -> String {
    format!("You checked in at {space_name}.")
}

pub fn cancelled(space_name: &str) -> String {
    format!("You cancelled your booking of {space_name}.")
}

pub fn checked_out(space_name: &str) -> String {
    format!("You checked out of {space_name}. Please rate the space.")
}

pub fn expired(space_name: &str) -> String {
    format!("Your booking of {space_name} was cancelled because you did not check in on time.")
}

pub fn force_checked_out(space_name: &str, max_occupancy: Ms) -> String {
    format!(
        "You were checked out of {space_name} automatically after {}.",
        duration_text(max_occupancy)
    )
}

pub fn reminder(space_name: &str, deadline: Ms) -> String {
    format!(
        "Reminder: check in at {space_name} before {}.",
        format_instant(deadline)
    )
}

fn duration_text(ms: Ms) -> String {
    let minutes = ms / crate::model::MINUTE_MS;
    match (minutes / 60, minutes % 60) {
        (1, 0) => "1 hour".to_string(),
        (h, 0) => format!("{h} hours"),
        (0, m) => format!("{m} minutes"),
        (h, m) => format!("{h}h {m}m"),
    }
}
