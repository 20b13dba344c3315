//! Multi-category financial audit workflow: sessions, categorized uploads,
//! model-driven analysis and review of the resulting findings.

pub mod analysis;
pub mod categories;
pub mod context;
pub mod files;
pub mod handlers;
pub mod prompts;
pub mod report;
pub mod review;
pub mod sessions;
