pub mod alignment;
pub mod data_processor;
pub mod features;

// Re-export commonly used items
pub use alignment::{align_bar_series, align_data, AlignmentConfig};
pub use data_processor::{filter_chain, ChainFilter, DataProcessor, FilteredChain};
