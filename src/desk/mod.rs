pub mod bluetooth;
pub mod link;
pub mod protocol;

pub use bluetooth::BleDeskFactory;
pub use link::{DeskEvent, DeskLink, DeskLinkFactory, DiscoveredDesk, EventSink};
pub use protocol::{DeskCommand, Preset};
