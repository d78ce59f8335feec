pub mod c;
pub mod source;
pub mod symbol;

pub use c::{Extraction, FunctionExtractor};
pub use symbol::{function_id, SourceFunction};
