//! Files written next to (or instead of) the sheet.
//!
//! # Submodules
//!
//! - [`json`]: one JSON report per run, for archiving and downstream tooling
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! ├── 2025-05-06/
//! │   ├── 081500.json
//! │   └── 174210.json
//! ```

pub mod json;
