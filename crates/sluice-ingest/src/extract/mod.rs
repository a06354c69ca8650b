//! Incremental, watermark-driven extraction

pub mod columns;
pub mod datatype;
pub mod extractor;
pub mod predicate;
pub mod protocol;
pub mod watermark;

pub use datatype::{convert_data_type, DataType};
pub use extractor::{Extractor, PullState};
pub use predicate::{build_predicate, range_predicates, Comparison, Predicate};
pub use protocol::SourceProtocol;
pub use watermark::{IdentityFormatter, SqlLiteralFormatter, WatermarkFormatter, WatermarkType};
