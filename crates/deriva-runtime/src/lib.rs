pub mod controller;
pub mod error;
pub mod interaction;

// Re-export commonly used types
pub use controller::Controller;
pub use error::RuntimeError;
pub use interaction::{
    EffectFn, GuardFn, Interaction, InteractionArgs, InteractionResult, LinkSpec, StorageOp,
};
