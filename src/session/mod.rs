//! Session orchestration: state machine, endpointing and message types.

pub mod controller;
pub mod endpointer;
pub mod messages;

pub use controller::{SessionController, SessionHandle};
pub use endpointer::SilenceEndpointer;
pub use messages::{
    AudioClip, ChatMessage, MessageSender, Reply, SessionCommand, SessionState, SpeechEvent,
    SpeechStreamItem, StreamFault, Utterance,
};
