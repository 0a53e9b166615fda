//! Process orchestration: the boot sequence, child supervision, port
//! readiness and signal handling.

pub mod port_gate;
pub mod sequencer;
pub mod signals;
pub mod supervisor;
