pub mod models;
pub mod status;

pub use models::{ComplaintStatus, PaymentChannel};
pub use status::{BillStatus, DisplayStatus, display_status};
