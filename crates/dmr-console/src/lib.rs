//! Operator console: prompts, selection parsing and progress rendering on top
//! of `dmr-core`. Holds no protocol or retry logic of its own.

pub mod app;
pub mod prompt;
pub mod render;
pub mod reporter;
pub mod selection;

pub use app::App;
pub use prompt::Prompter;
pub use reporter::ConsoleReporter;
