// 🏛️ Entity Records - Typed views over standardized table rows

pub mod address;
pub mod election;
pub mod transaction;
pub mod transactor;

pub use address::{AddressRecord, MembershipRecord};
pub use election::{ElectionRecord, ElectionResultRecord};
pub use transaction::TransactionRecord;
pub use transactor::{TransactorDetail, TransactorKind, TransactorRecord, TransactorTypeSpecific};
