pub mod clock;
pub mod error;
pub mod io;
pub mod meta;
pub mod world;

pub use clock::{ClockSource, ManualClock, RealClock};
pub use error::RuntimeError;
pub use io::{poll_environment, write_handshake, write_movement, EnvironmentFile, MovementFile};
pub use meta::{fork_simulation, load_maze, load_meta, load_personas, save_maze, save_meta, save_personas};
pub use world::{StepOutcome, WorldRuntime};
