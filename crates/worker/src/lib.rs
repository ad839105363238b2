pub mod cursor;
pub mod dispatcher;
pub mod worker;

pub use cursor::RoundRobinCursor;
pub use dispatcher::{Dispatcher, DispatcherOutcome};
pub use worker::{build_render_context, Worker, WorkerError, WorkerOutcome};
