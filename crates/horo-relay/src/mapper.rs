//! Maps change-feed events to notification intents.

use serde_json::Value;

use horo_types::{
    notification::{NotificationData, NotificationIntent},
    resource::{ChangeOperation, ResourceClass},
};

/// Title and body for a (class, operation) pair, or `None` when the
/// operation does not notify.
pub fn copy_for(resource: ResourceClass, operation: ChangeOperation) -> Option<(&'static str, &'static str)> {
    use ChangeOperation::{Inserted, Updated};
    use ResourceClass::{Daily, Monthly, Weekly};

    let copy = match (resource, operation) {
        (Daily, Inserted) => (
            "Your Daily Horoscope is Ready!",
            "Discover what the stars have in store for you today.",
        ),
        (Daily, Updated) => (
            "Your Daily Horoscope Updated",
            "Your cosmic insights have been refreshed.",
        ),
        (Weekly, Inserted) => (
            "Your Weekly Horoscope is Here!",
            "Plan your week with cosmic guidance.",
        ),
        (Weekly, Updated) => (
            "Weekly Horoscope Updated",
            "Your weekly cosmic forecast has been updated.",
        ),
        (Monthly, Inserted) => (
            "Your Monthly Horoscope Awaits!",
            "Explore your cosmic journey for the month ahead.",
        ),
        (Monthly, Updated) => (
            "Monthly Horoscope Refreshed",
            "Your monthly cosmic insights have been updated.",
        ),
        (_, ChangeOperation::Deleted | ChangeOperation::Unknown) => return None,
    };
    Some(copy)
}

/// Build the notification for one change. The payload is carried through
/// untouched.
pub fn map(resource: ResourceClass, operation: ChangeOperation, payload: Value) -> Option<NotificationIntent> {
    let (title, body) = copy_for(resource, operation)?;
    Some(NotificationIntent {
        title: title.to_string(),
        body: body.to_string(),
        data: NotificationData {
            resource_class: resource,
            payload,
        },
    })
}
