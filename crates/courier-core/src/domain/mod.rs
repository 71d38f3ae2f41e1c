//! Domain model (ids, tasks, messages, errors).

pub mod errors;
pub mod ids;
pub mod message;
pub mod task;

pub use self::errors::{CourierError, ErrorKind, Result};
pub use self::ids::{ConsumerId, Id, IdMarker, MessageId, TaskId};
pub use self::message::Message;
pub use self::task::{Payload, Task};
