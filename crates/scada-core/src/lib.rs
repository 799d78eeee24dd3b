pub mod accessor;
pub mod commands;
pub mod connection;
pub mod diagnostics;
pub mod edge;
pub mod error;
pub mod events;
pub mod hal;
#[cfg(any(test, feature = "simulation"))]
pub mod hal_sim;
pub mod poller;
pub mod pulse;
pub mod registry;
pub mod roles;
pub mod sync;
pub mod tags;

pub use accessor::TagAccessor;
pub use commands::ControlPanel;
pub use connection::{ConnectionManager, ConnectionState};
pub use diagnostics::DiagnosticReport;
pub use edge::{AlarmEdge, AlarmEdgeDetector};
pub use error::{DescriptorError, TagError, TransportError};
pub use events::{EventBus, PollEvent, Reading};
pub use hal::{Area, Endpoint, ProtocolClient};
#[cfg(any(test, feature = "simulation"))]
pub use hal_sim::SimulatedPlc;
pub use poller::{PollConfig, PollState, PollStats, Poller, PollerError, PollerHandle};
pub use pulse::{PulseController, Scheduler, TimerQueue};
pub use registry::TagRegistry;
pub use roles::{Layout, MonitorPlan, Role, RoleMap, Slot};
pub use sync::Shared;
pub use tags::{RegionKind, TagAddress, TagDescriptor, TagValue, ValueKind};
