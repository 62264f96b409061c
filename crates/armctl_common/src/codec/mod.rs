//! Wire codecs used by the orchestrator's network links.
//!
//! The session link speaks Engine.IO v4 text frames carrying Socket.IO
//! packets. [`EngineIoCodec`] implements the `codee` encoder/decoder traits so
//! transports can stay generic over the framing.

mod engine_io;

pub use engine_io::*;
