//! # Messenger
//!
//! A polling delivery orchestrator for device messaging clients. One
//! [`Messenger`] owns a send link and a receive link attached over a
//! transport [`Session`], drains the owner's [`PendingQueue`] onto the send
//! link, and reports every message's final [`DeliveryOutcome`] exactly once.
//!
//! ## Features
//!
//! - **Cooperative:** all work happens in [`Messenger::do_work`]; nothing
//!   blocks and every call does a bounded amount of work.
//! - **Pluggable transport:** attach/detach requests and link traffic are
//!   `tokio` channels the messenger polls with `try_recv`, so any transport
//!   can sit behind the [`Session`] trait.
//! - **Health reporting:** state changes are pushed to the owner's callback
//!   as `(previous, new)` pairs; link faults always land in
//!   [`MessengerState::Error`] and retrying is up to the owner.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let queue = PendingQueue::new();
//! let config = MessengerConfig::new("my-device", "hub.example.net", &queue)
//!     .with_state_callback(|prev, new| println!("{prev} -> {new}"));
//!
//! let mut messenger = Messenger::create(config, my_session, Utf8Codec)?;
//! messenger.start()?;
//!
//! queue.enqueue("hello".to_string(), |outcome| println!("delivery: {outcome}"));
//! loop {
//!     messenger.do_work();
//!     // ... sleep or wait for the next tick
//! }
//! ```

mod alloc;
pub mod codec;
pub mod config;
pub mod error;
mod in_flight;
mod link;
pub mod memory;
pub mod messenger;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod state;

pub use codec::{MessageCodec, RawCodec, Utf8Codec};
pub use config::{MessengerConfig, MessengerOptions};
pub use error::{CodecError, LinkError, MessengerError, MessengerResult};
pub use memory::MemorySession;
pub use messenger::{MessageCallback, Messenger, SendStatus};
pub use queue::{DeliveryOutcome, OutcomeCallback, PendingMessage, PendingQueue, WeakPendingQueue};
pub use receiver::{ReceiveLink, ReceiveLinkPeer};
pub use sender::{SendLink, SendLinkPeer, Settlement};
pub use session::{
    AnyLink, DeliveryTag, Disposition, LinkAddress, LinkRole, PendingClose, PendingLink, Session,
    Transfer,
};
pub use state::{MessengerState, StateChangeCallback};
