pub mod combine;
pub mod render;

pub use combine::{CombineCommands, handle_combine_command};
pub use render::{RenderCommands, handle_render_command};
