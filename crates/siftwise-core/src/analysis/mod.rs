pub mod cohesion;
pub mod tree;

pub use cohesion::{analyze, CohesionReport, Unit};
pub use tree::{build_tree, render_outline, TreeNode};
