//! Request lifecycle: queue, flush gate, state machine, interleaving buffer,
//! frame assembly, usage metrics, and the processing loop tying them together.

pub mod assembler;
pub mod context;
pub mod engine;
pub mod gate;
pub mod metrics;
pub mod pending;
pub mod queue;
pub mod state;

pub use assembler::{AudioFormat, AudioFrame, FrameAssembler};
pub use context::SynthesisContext;
pub use engine::{EngineHandle, EngineSnapshot, Producer, TtsEngine};
pub use state::RequestState;
