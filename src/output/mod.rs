//! Result rendering: terminal text and the final JSON report

pub mod json;
pub mod text;
