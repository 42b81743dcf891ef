//! Record sinks. Each output file gets its own writer task so a slow disk
//! never stalls the aggregator beyond a bounded channel send.

mod jsonl;

pub use jsonl::JsonlWriter;
