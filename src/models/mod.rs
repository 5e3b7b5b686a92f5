mod api;
mod record;

pub use api::{GenerateForm, GenerateResponse, HealthResponse, ListResponse};
pub use record::QrRecord;
