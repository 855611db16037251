pub mod drift;
pub mod engine;
pub mod events;
pub mod intent;
pub mod state;

pub use drift::Correction;
pub use engine::PlaybackCoordinator;
pub use events::{TimelineCallback, TimelineEvent, TimelineEventKind, TimelineEvents};
pub use intent::{Intent, IntentArbiter, PlayDecision, Side};
pub use state::{Bucket, Classification};
