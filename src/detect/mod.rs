mod backend;
mod backends;
mod invoker;
mod result;

pub use backend::RecognitionEngine;
pub use backends::{engine_from_name, ScriptedEngine, StubEngine};
pub use invoker::DetectionInvoker;
pub use result::{DetectionCandidate, PlateBox};
