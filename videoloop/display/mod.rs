pub mod surface;
pub mod worker;

pub use self::surface::{spawn_stdin_input, InputEvent, Surface, TerminalSurface};
pub use self::worker::{DisplayHandle, DisplayWorker};
