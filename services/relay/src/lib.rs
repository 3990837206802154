//! Photo Relay
//!
//! Point-to-point photo delivery between devices that know each other only by
//! a short receiver identifier. A sender uploads an image to object storage and
//! appends a metadata record under the receiver's collection in a realtime
//! database; a listening receiver is pushed the collection on every change and
//! surfaces the newest record.
//!
//! ## Features
//!
//! - **Receiver identities**: 8-character lowercase hex identifiers drawn from
//!   the OS random source, with a clock-seeded fallback
//! - **Transport**: S3-compatible uploads (multipart for large images) paired
//!   with append-only records in a Firebase Realtime Database
//! - **Subscriptions**: one live subscription per receiver session, always
//!   surfacing the record with the greatest timestamp
//! - **Offline backend**: local directory plus in-process database for running
//!   sender and receiver side by side
//!
//! ## Architecture
//!
//! ```text
//!   Sender                    Object Storage             Realtime Database
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────────────┐
//! │ Transport    │──upload──▶│ {receiver}/  │          │ receivers/           │
//! │ Client       │           │   {ts}_{id}  │          │   {receiver}/images/ │
//! └──────────────┘           └──────────────┘          │     {pushKey}        │
//!        │                                             └──────────────────────┘
//!        └──────────────────append record─────────────────────▶│
//!                                                              │ snapshots
//!                                                              ▼
//!                            ┌──────────────┐          ┌──────────────┐
//!                            │ Image        │◀─────────│ Receiver     │
//!                            │ Selector     │          │ Session      │
//!                            └──────────────┘          └──────────────┘
//!                                   │
//!                                   ▼
//!                            ┌──────────────┐          ┌──────────────┐
//!                            │ Inbox        │─────────▶│ Gallery      │
//!                            └──────────────┘          └──────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod event_stream;
pub mod firebase_db;
pub mod gallery;
pub mod identity;
pub mod image_selector;
pub mod inbox;
pub mod memory_db;
pub mod models;
pub mod object_store;
pub mod realtime_db;
pub mod s3_uploader;
pub mod subscription;
pub mod transport;

pub use backend::{Backend, Transport};
pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use firebase_db::FirebaseDatabase;
pub use gallery::{Gallery, PermissionState};
pub use identity::ReceiverIdentity;
pub use image_selector::{select_most_recent, SelectionDecision};
pub use inbox::{Inbox, ReceivedImage};
pub use memory_db::MemoryDatabase;
pub use models::{ImageRecord, IncomingImage, Snapshot, SnapshotEntry};
pub use object_store::{LocalObjectStore, ObjectStore, ObjectStoreError};
pub use realtime_db::{DatabaseError, RealtimeDatabase, Subscription};
pub use s3_uploader::S3Uploader;
pub use subscription::{ReceiverEvent, ReceiverSession};
pub use transport::{SentImage, TransportClient};
