pub mod cursor;
pub mod store;

pub use cursor::RecordCursor;
pub use store::{RecordStore, StoreReceipt, StoredRecord, RECORDS_DIR};
