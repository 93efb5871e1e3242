//! Data structures and rules for the interactive output dispute (bisection) game.

mod segments;
pub use segments::Segments;

mod status;
pub use status::{Action, ChallengeStatus, Role, Transition};

mod types;
pub use types::*;
