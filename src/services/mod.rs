//! Service layer for the feed.
//!
//! This module contains the business logic for:
//! - Portal session tracking (`SessionManager`)
//! - Live page retrieval (`Fetcher`)
//! - Table extraction (`Extractor`)
//! - Platform classification (`classify`)

pub mod classifier;
pub mod extractor;
pub mod fetcher;
pub mod session;

pub use classifier::{DEFAULT_PLATFORM, classify};
pub use extractor::{Extractor, PageExtraction};
pub use fetcher::Fetcher;
pub use session::{AuthResult, ConnectionObserver, SessionManager, SessionState};
