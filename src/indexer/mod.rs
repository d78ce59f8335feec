pub mod extract;
pub mod pipeline;
