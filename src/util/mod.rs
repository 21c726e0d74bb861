pub mod torus;
pub mod vec2;
