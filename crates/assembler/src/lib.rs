//! Context assembly for AVS.
//!
//! [`ContextAssembler`] turns a validated [`avs_core::ValueStory`] into a
//! briefcase: every manifest entry is resolved (tool call, web research or
//! local file) and its text written into `content`. Entry failures become
//! content too, so one bad asset never stops the run.

pub mod assembler;
pub mod briefcase;

pub use assembler::{
    Assembly, AssemblyReport, AssemblyState, ContextAssembler, EntryOutcome, EntryReport,
};
pub use briefcase::{briefcase_path, write_briefcase};
