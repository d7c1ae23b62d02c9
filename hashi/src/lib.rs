//! Hashi - sandbox bridge for hosted learning content
//!
//! Packaged HTML5, H5P, SCORM and Bloom content runs in a sandboxed frame
//! with no access to the host application. Hashi gives it the browser and
//! LMS APIs it expects, implemented as shims whose state lives with the
//! host and crosses the boundary only as messages.
//!
//! ## Architecture
//!
//! ```text
//!  host application                         sandboxed frame
//! ┌──────────────────────┐               ┌──────────────────────────┐
//! │ MainClient           │               │ SandboxClient            │
//! │  ├─ SessionStore     │  {namespace,  │  ├─ localStorage         │
//! │  ├─ host shims       │◄─ event, ────►│  ├─ document.cookie      │
//! │  └─ ContentProvider  │   data}       │  ├─ API (SCORM 1.2)      │
//! │                      │               │  ├─ xAPI                 │
//! │ Mediator             │               │  ├─ kolibri, H5P, bloom  │
//! └──────────────────────┘               │ Mediator                 │
//!                                        └──────────────────────────┘
//! ```
//!
//! - **Mediator**: routes messages to handlers by `(namespace, event)` and
//!   correlates request/reply pairs by `message_id`
//! - **Shims**: one per emulated API; push state to the host after every
//!   mutation and rehydrate from it on `StateUpdate`
//! - **Packages**: unpack H5P and Bloom zips and publish their files as
//!   blob URLs
//!
//! ## Features
//!
//! - `cli` - Build the `hashi` command line tool

pub mod client;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod error;
pub mod host;
pub mod mediator;
pub mod package;
pub mod shim;
pub mod shims;
pub mod window;

pub use client::SandboxClient;
pub use clock::VirtualClock;
pub use config::protocol::{DataType, EventKind, Message, MessageStatus, Namespace};
pub use config::HashiConfig;
pub use error::{HashiError, Result};
pub use host::{ContentProvider, MainClient, SessionStore, StaticContentProvider};
pub use mediator::{
    callback, connect_pair, Callback, ChannelTransport, Mediator, RecordingTransport, Transport,
};
pub use package::{BlobRegistry, BloomPackage, H5pPackage, PackageError};
pub use shim::{Shim, ShimCore};
pub use window::ContentWindow;
