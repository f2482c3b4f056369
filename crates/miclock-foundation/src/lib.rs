pub mod clock;
pub mod error;
pub mod settings;
pub mod state;

pub use clock::*;
pub use error::*;
pub use settings::*;
pub use state::*;
