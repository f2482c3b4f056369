pub mod drift;
pub mod gateway;
pub mod listing;
pub mod poller;
pub mod pulse;
pub mod sim;
pub mod watcher;

// Public API
pub use drift::should_correct;
pub use gateway::{ChannelControl, DeviceHandle, InputGateway, VolumeLayout};
pub use listing::{DeviceLister, InputDeviceInfo};
pub use poller::PollGuard;
pub use pulse::{PulseGateway, PulseSubscribeWatcher};
pub use sim::{SimDevice, SimGateway, SimWatcher};
pub use watcher::{ChangeWatcher, DriftSignal};
