//! BBCode handling: image reference scanning and the renderer boundary.

mod renderer;
mod scanner;

pub use renderer::{BbcodeRenderer, Render};
pub use scanner::{extract_image_urls, find_linked_images, unwrap_linked_images};
