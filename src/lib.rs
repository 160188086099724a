pub mod core;
pub mod schemas;
pub mod services;
pub mod session;

mod cli;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use clap::Parser;

use crate::core::{config::Settings, telemetry, time::SystemClock};
use crate::services::{FileKeyStore, HttpExamBackend};
use crate::session::{ExamSession, MountOptions, SessionTiming};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = cli::Args::parse();
    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;

    let backend = Arc::new(HttpExamBackend::from_settings(&settings)?);
    let key_store = Arc::new(FileKeyStore::open(&settings.storage().session_store_dir)?);

    tracing::info!(
        environment = settings.runtime().environment.as_str(),
        api = %settings.api().base_url,
        store = %key_store.path().display(),
        "Starting exam client"
    );

    let mut options = MountOptions::new(args.exam, args.student)
        .with_timing(SessionTiming::from_settings(settings.exam()));
    if let Some(session_id) = args.session {
        options = options.with_session_id(session_id);
    }

    let session = ExamSession::mount(backend, key_store, Arc::new(SystemClock), options).await?;
    cli::run_session(session).await
}
