pub mod request_id;
pub mod trace;

pub use request_id::RequestIdLayer;
pub use trace::TraceContextLayer;
