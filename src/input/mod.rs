pub mod reader;

pub use reader::{is_reopenable, spawn_line_reader, InputEvent};
