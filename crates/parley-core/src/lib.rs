pub mod classes;
pub mod clock;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod keys;
pub mod models;
pub mod template;

pub use classes::{KeyShape, ObjectClass, StoredObject};
pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{Datetime, Envelope};
pub use errors::{ApiError, ErrorKind};
pub use keys::{Key, KeyError, Owner};
pub use template::{ArgumentType, TemplateError};
