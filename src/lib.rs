//! Recovers the command-line macros and include paths each source file of a binary was
//! built with, from its DWARF 2 debug information.

pub mod abbrev;
pub mod analysis;
pub mod config;
pub mod cursor;
pub mod dwarf;
pub mod image;
pub mod line;
pub mod logging;
pub mod macinfo;
pub mod model;
pub mod sections;
pub mod tree;
pub mod types;
pub mod verify;

pub use analysis::{analyze, Analyzer, BuildSettings};
pub use config::AnalysisOptions;
pub use image::Image;
pub use model::{Include, IncludeKind, Macro, MacroKind};
pub use sections::DebugSections;
pub use tree::{compress, PathTree, TreePath};
pub use types::Endian;
pub use verify::{verify, Discrepancy};
