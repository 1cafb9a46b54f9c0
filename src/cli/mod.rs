pub mod commands;
mod render;
