//! Built-in graph types.
//!
//! - [`chain`]: a bounded counter pipeline, handy for deterministic checks
//! - [`heat`]: the GALS heat diffusion application on a rectangular grid

pub mod chain;
pub mod heat;

pub use chain::{chain_graph_type, make_chain};
pub use heat::{heat_graph_type, make_grid, make_grid_until};
