mod claim;
mod document;
mod evidence;
mod graph;
mod progress;
mod report;
mod screening;

pub use claim::*;
pub use document::*;
pub use evidence::*;
pub use graph::*;
pub use progress::*;
pub use report::*;
pub use screening::*;
