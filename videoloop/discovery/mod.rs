pub mod mount;
pub mod paths;
pub mod transfer;
pub mod watcher;
pub mod worker;

pub use self::mount::{MountService, UsbMounter};
pub use self::watcher::{FsEvents, NotifyWatcher, PathWatcher};
pub use self::worker::{DiscoveryHandle, DiscoverySettings, DiscoveryWorker};
