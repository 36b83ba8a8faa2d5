pub mod config;
pub mod error;
pub mod handlers;
pub mod mib;
pub mod models;
pub mod oid;
pub mod parser;
pub mod poller;
pub mod snmp;
pub mod store;
pub mod trap_receiver;
pub mod walk_template;

use std::path::PathBuf;
use std::sync::Arc;

use mib::MibMapper;
use poller::PollScheduler;
use store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub poller: Arc<PollScheduler>,
    pub mib: Arc<MibMapper>,
    pub assets_dir: PathBuf,
}
