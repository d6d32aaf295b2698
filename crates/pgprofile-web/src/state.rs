//! Shared application state and the global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use axum::extract::State;

use pgprofile_core::PublishedState;
use pgprofile_core::source::PgSource;

use crate::generator::LoadGenerator;

pub(crate) struct WebAppInner {
    /// Diagnosis and scenario info, written by the analysis loop.
    pub(crate) published: PublishedState,
    /// Connection used by request handlers (settings, dashboard).
    pub(crate) db: Arc<PgSource>,
    pub(crate) generator: LoadGenerator,
}

pub(crate) type SharedState = Arc<WebAppInner>;

pub(crate) type AppState = State<SharedState>;
