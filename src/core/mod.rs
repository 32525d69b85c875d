pub mod frame;
pub mod health;
pub mod heartbeat;
pub mod reassembly;
pub mod state;
pub mod types;

pub use frame::*;
pub use health::*;
pub use heartbeat::*;
pub use reassembly::*;
pub use state::*;
pub use types::*;
