pub mod model;
pub mod recurrence;
pub mod store;

pub use model::{Event, EventView, NewEvent};
pub use recurrence::{expand_events, validate_rule, RecurrenceError, Window};
pub use store::{DueReminder, SearchFilter};
