pub mod external;
pub mod mixer;
pub mod playback;
pub mod playlist;

pub use self::external::{CommandPlayer, Player};
pub use self::mixer::HardwareMixer;
pub use self::playback::{PlaybackHandle, PlaybackSettings, PlaybackStatus, PlaybackWorker};
pub use self::playlist::Playlist;
